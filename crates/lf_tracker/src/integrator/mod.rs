// crates/lf_tracker/src/integrator/mod.rs

//! 单步积分器
//!
//! 粒子状态方程 dx/dt = f(x, t) 由积分模型提供右端项，积分器只负责
//! 推进一步并报告状态。每个工作线程持有自己的积分器实例，
//! 各级斜率缓冲随实例复用。
//!
//! ## 失败语义
//!
//! - 第一级右端项求值失败：`x_next = x_prev`，状态 `OutOfDomain`，
//!   实际步长为 0
//! - 后续某一级失败：`x_next` 为该级的中间状态，状态 `OutOfDomain`，
//!   实际步长为该级对应的部分步长
//! - 结果出现 NaN 或无穷：状态 `UnexpectedValue`
//!
//! ## 可用积分器
//!
//! - [`Rk2`]: 中点法，二阶
//! - [`Rk4`]: 经典四阶
//! - [`Rk45`]: Cash-Karp 嵌入式自适应步长

mod cash_karp;
mod runge_kutta;

pub use cash_karp::Rk45;
pub use runge_kutta::{Rk2, Rk4};

use lf_config::IntegratorKind;
use std::fmt;

/// 单步积分结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationStatus {
    /// 正常完成
    Ok,
    /// 积分器未就绪（变量个数为零或缓冲长度不符）
    NotInitialized,
    /// 右端项求值失败（离开计算域）
    OutOfDomain,
    /// 出现非有限值或步长参数非法
    UnexpectedValue,
}

/// 右端项函数集
pub trait FunctionSet {
    /// 方程个数
    fn n_equations(&self) -> usize;

    /// 在 `(x, t)` 处求值，失败（点不在任何单元内等）返回 false
    fn evaluate(&mut self, x: &[f64], t: f64, f: &mut [f64]) -> bool;
}

/// 步长控制参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepControl {
    /// 当前时间
    pub t: f64,
    /// 期望步长
    pub dt: f64,
    /// 最小步长
    pub dt_min: f64,
    /// 最大步长
    pub dt_max: f64,
    /// 自适应积分允许的最大误差
    pub max_error: f64,
}

/// 单步积分输出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub status: IntegrationStatus,
    /// 实际推进的步长
    pub dt_actual: f64,
    /// 建议的下一步长（非自适应积分器等于输入步长）
    pub dt_next: f64,
    /// 误差估计（非自适应积分器为 0）
    pub error: f64,
}

impl StepOutcome {
    pub(crate) fn new(status: IntegrationStatus, dt_actual: f64, dt_next: f64) -> Self {
        Self {
            status,
            dt_actual,
            dt_next,
            error: 0.0,
        }
    }
}

/// 单步积分器
pub trait StepIntegrator: Send + fmt::Debug {
    /// 名称
    fn name(&self) -> &'static str;

    /// 是否自适应调整步长
    fn is_adaptive(&self) -> bool {
        false
    }

    /// 从 `x_prev` 推进一步写入 `x_next`
    fn compute_next_step(
        &mut self,
        func: &mut dyn FunctionSet,
        x_prev: &[f64],
        x_next: &mut [f64],
        control: &StepControl,
    ) -> StepOutcome;
}

/// 按配置创建积分器
pub fn create_integrator(kind: IntegratorKind) -> Box<dyn StepIntegrator> {
    match kind {
        IntegratorKind::Rk2 => Box::new(Rk2::new()),
        IntegratorKind::Rk4 => Box::new(Rk4::new()),
        IntegratorKind::Rk45 => Box::new(Rk45::new()),
    }
}

/// 检查缓冲是否与方程个数一致
pub(crate) fn check_buffers(func: &dyn FunctionSet, x_prev: &[f64], x_next: &[f64]) -> bool {
    let n = func.n_equations();
    n > 0 && x_prev.len() >= n && x_next.len() >= n
}

#[cfg(test)]
pub(crate) mod test_functions {
    use super::FunctionSet;

    /// dx/dt = 1, dv/dt = -v（x 为位置分量，v 为速度分量）
    pub struct Decay {
        pub calls: usize,
        /// 第几次求值开始失败
        pub fail_after: Option<usize>,
    }

    impl Decay {
        pub fn new() -> Self {
            Self {
                calls: 0,
                fail_after: None,
            }
        }
    }

    impl FunctionSet for Decay {
        fn n_equations(&self) -> usize {
            2
        }

        fn evaluate(&mut self, x: &[f64], _t: f64, f: &mut [f64]) -> bool {
            self.calls += 1;
            if let Some(n) = self.fail_after {
                if self.calls > n {
                    return false;
                }
            }
            f[0] = 1.0;
            f[1] = -x[1];
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_names() {
        assert_eq!(create_integrator(IntegratorKind::Rk2).name(), "rk2");
        assert_eq!(create_integrator(IntegratorKind::Rk4).name(), "rk4");
        let rk45 = create_integrator(IntegratorKind::Rk45);
        assert_eq!(rk45.name(), "rk45");
        assert!(rk45.is_adaptive());
    }
}
