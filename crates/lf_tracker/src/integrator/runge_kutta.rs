// crates/lf_tracker/src/integrator/runge_kutta.rs

//! 显式 Runge-Kutta（固定步长）
//!
//! RK2 与 RK4 共用同一个按 Butcher 表推进的实现。
//! 第 k 级中间状态 y_k = x + dt * Σ a_kj k_j，对应时间 t + c_k dt。

use super::{check_buffers, FunctionSet, IntegrationStatus, StepControl, StepIntegrator, StepOutcome};

/// Butcher 表（只存下三角）
struct Tableau {
    a: &'static [&'static [f64]],
    b: &'static [f64],
    c: &'static [f64],
}

const MIDPOINT: Tableau = Tableau {
    a: &[&[], &[0.5]],
    b: &[0.0, 1.0],
    c: &[0.0, 0.5],
};

const CLASSIC_RK4: Tableau = Tableau {
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    c: &[0.0, 0.5, 0.5, 1.0],
};

/// 各级斜率与中间状态缓冲
#[derive(Debug, Default, Clone)]
struct StageBuffers {
    k: Vec<Vec<f64>>,
    y: Vec<f64>,
}

impl StageBuffers {
    fn ensure(&mut self, stages: usize, n: usize) {
        self.k.resize_with(stages, Vec::new);
        for k in &mut self.k {
            k.resize(n, 0.0);
        }
        self.y.resize(n, 0.0);
    }
}

fn explicit_step(
    tableau: &Tableau,
    buffers: &mut StageBuffers,
    func: &mut dyn FunctionSet,
    x_prev: &[f64],
    x_next: &mut [f64],
    control: &StepControl,
) -> StepOutcome {
    let dt = control.dt;
    if !check_buffers(func, x_prev, x_next) {
        return StepOutcome::new(IntegrationStatus::NotInitialized, 0.0, dt);
    }
    let n = func.n_equations();
    let stages = tableau.b.len();
    buffers.ensure(stages, n);

    for stage in 0..stages {
        let c = tableau.c[stage];
        buffers.y[..n].copy_from_slice(&x_prev[..n]);
        for (j, &a) in tableau.a[stage].iter().enumerate() {
            if a != 0.0 {
                for (y, k) in buffers.y.iter_mut().zip(&buffers.k[j]) {
                    *y += dt * a * k;
                }
            }
        }

        if !func.evaluate(&buffers.y, control.t + c * dt, &mut buffers.k[stage]) {
            // 失败时停在本级中间状态
            x_next[..n].copy_from_slice(&buffers.y[..n]);
            return StepOutcome::new(IntegrationStatus::OutOfDomain, c * dt, dt);
        }
    }

    for i in 0..n {
        let mut incr = 0.0;
        for (stage, &b) in tableau.b.iter().enumerate() {
            incr += b * buffers.k[stage][i];
        }
        x_next[i] = x_prev[i] + dt * incr;
    }

    if x_next[..n].iter().any(|v| !v.is_finite()) {
        return StepOutcome::new(IntegrationStatus::UnexpectedValue, dt, dt);
    }
    StepOutcome::new(IntegrationStatus::Ok, dt, dt)
}

/// 二阶中点法
#[derive(Debug, Default)]
pub struct Rk2 {
    buffers: StageBuffers,
}

impl Rk2 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepIntegrator for Rk2 {
    fn name(&self) -> &'static str {
        "rk2"
    }

    fn compute_next_step(
        &mut self,
        func: &mut dyn FunctionSet,
        x_prev: &[f64],
        x_next: &mut [f64],
        control: &StepControl,
    ) -> StepOutcome {
        explicit_step(&MIDPOINT, &mut self.buffers, func, x_prev, x_next, control)
    }
}

/// 经典四阶 Runge-Kutta
#[derive(Debug, Default)]
pub struct Rk4 {
    buffers: StageBuffers,
}

impl Rk4 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepIntegrator for Rk4 {
    fn name(&self) -> &'static str {
        "rk4"
    }

    fn compute_next_step(
        &mut self,
        func: &mut dyn FunctionSet,
        x_prev: &[f64],
        x_next: &mut [f64],
        control: &StepControl,
    ) -> StepOutcome {
        explicit_step(&CLASSIC_RK4, &mut self.buffers, func, x_prev, x_next, control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::test_functions::Decay;

    fn control(dt: f64) -> StepControl {
        StepControl {
            t: 0.0,
            dt,
            dt_min: dt,
            dt_max: dt,
            max_error: 0.0,
        }
    }

    #[test]
    fn test_rk4_accuracy() {
        let mut rk4 = Rk4::new();
        let mut f = Decay::new();
        let mut x = [0.0, 1.0];
        let mut next = [0.0; 2];
        for _ in 0..10 {
            let out = rk4.compute_next_step(&mut f, &x, &mut next, &control(0.1));
            assert_eq!(out.status, IntegrationStatus::Ok);
            x = next;
        }
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - (-1.0f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_rk2_second_order() {
        let mut rk2 = Rk2::new();
        let mut f = Decay::new();
        let mut next = [0.0; 2];
        let out = rk2.compute_next_step(&mut f, &[0.0, 1.0], &mut next, &control(0.1));
        assert_eq!(out.status, IntegrationStatus::Ok);
        // 中点法: v1 = 1 - dt * (1 - dt/2)
        assert!((next[1] - 0.905).abs() < 1e-12);
        assert_eq!(f.calls, 2);
    }

    #[test]
    fn test_first_stage_failure_keeps_previous_state() {
        let mut rk4 = Rk4::new();
        let mut f = Decay::new();
        f.fail_after = Some(0);
        let mut next = [9.0; 2];
        let out = rk4.compute_next_step(&mut f, &[0.5, 1.0], &mut next, &control(0.1));
        assert_eq!(out.status, IntegrationStatus::OutOfDomain);
        assert_eq!(out.dt_actual, 0.0);
        assert_eq!(next, [0.5, 1.0]);
    }

    #[test]
    fn test_later_stage_failure_reports_partial_step() {
        let mut rk4 = Rk4::new();
        let mut f = Decay::new();
        f.fail_after = Some(1);
        let mut next = [0.0; 2];
        let out = rk4.compute_next_step(&mut f, &[0.0, 1.0], &mut next, &control(0.2));
        assert_eq!(out.status, IntegrationStatus::OutOfDomain);
        assert!((out.dt_actual - 0.1).abs() < 1e-15);
        assert!((next[0] - 0.1).abs() < 1e-15);
    }

    #[test]
    fn test_not_initialized() {
        let mut rk2 = Rk2::new();
        let mut f = Decay::new();
        let mut next = [0.0; 1];
        let out = rk2.compute_next_step(&mut f, &[0.0, 1.0], &mut next, &control(0.1));
        assert_eq!(out.status, IntegrationStatus::NotInitialized);
    }
}
