// crates/lf_tracker/src/model/mod.rs

//! 积分模型
//!
//! 分两层：
//!
//! - [`PhysicsModel`]: 物理模型能力。给出粒子状态方程右端项，
//!   并提供表面交互、自由飞行终止、粒子初始化等可覆盖的钩子。
//! - [`IntegrationModel`]: 持有流场与表面数据集及其定位器、
//!   输入数组表，负责定位、插值和表面交互计算，把物理模型
//!   包装成积分器可用的右端项函数。
//!
//! 数据集注册完成后模型只读，可被所有工作线程共享。

pub mod arrays;
mod integration;
mod interaction;
mod matida;

pub use arrays::{
    ArrayAssociation, ArrayInfo, ArraySchema, InputArraySpec, InputArrayTable, InputPort,
    FIRST_MODEL_SLOT, SLOT_INITIAL_INTEGRATION_TIME, SLOT_INITIAL_VELOCITY, SLOT_SURFACE_TYPE,
};
pub use integration::{CellLocation, FlowSample, IntegrationModel, ParticleFunctionSet, SurfaceEntry};
pub use interaction::{bounce_particle, break_particle, terminate_particle, PassThroughSet, SurfaceInteractionResult};
pub use matida::MatidaModel;

use crate::integrator::{StepControl, StepOutcome};
use crate::particle::{Particle, ParticleIdAllocator};
use glam::DVec3;
use lf_config::{ModelConfig, PhysicsModelKind};
use lf_foundation::{FlatIndex, SurfaceIndex};
use lf_mesh::DataSet;
use std::fmt;

// ============================================================
// 表面类型
// ============================================================

/// 用户自定义表面类型的起始值，小于此值的类型保留给内置行为
pub const USER_SURFACE_TYPE: i32 = 100;

/// 表面单元的交互类型
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceType {
    /// 交给物理模型处理
    ModelDefined = 0,
    /// 终止粒子
    Terminate = 1,
    /// 反弹
    Bounce = 2,
    /// 破碎为两个子粒子
    BreakUp = 3,
    /// 穿越，只记录交互点
    PassThrough = 4,
}

impl SurfaceType {
    /// 从表面类型数组中的数值恢复，用户类型返回 None
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::ModelDefined,
            1 => Self::Terminate,
            2 => Self::Bounce,
            3 => Self::BreakUp,
            4 => Self::PassThrough,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }
}

// ============================================================
// 钩子参数
// ============================================================

/// 一次表面命中
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHit<'a> {
    /// 表面在注册表中的位置
    pub surface: SurfaceIndex,
    /// 表面的扁平索引
    pub flat_index: FlatIndex,
    /// 表面数据集
    pub dataset: &'a dyn DataSet,
    /// 命中单元
    pub cell_id: usize,
    /// 单元单位法向
    pub normal: DVec3,
    /// 命中点在当前位置到下一位置之间的比例
    pub factor: f64,
}

/// 交互中派生新粒子的出口
///
/// 派生粒子先存入工作线程本地缓冲，由追踪器在本次交互结束后
/// 送入回传通道。
pub struct SpawnContext<'a> {
    ids: &'a ParticleIdAllocator,
    spawned: &'a mut Vec<Particle>,
}

impl<'a> SpawnContext<'a> {
    pub fn new(ids: &'a ParticleIdAllocator, spawned: &'a mut Vec<Particle>) -> Self {
        Self { ids, spawned }
    }

    /// 分配新粒子编号
    pub fn new_particle_id(&self) -> i64 {
        self.ids.next_id()
    }

    /// 提交派生粒子
    pub fn spawn(&mut self, particle: Particle) {
        self.spawned.push(particle);
    }

    /// 已提交的派生粒子数
    pub fn len(&self) -> usize {
        self.spawned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spawned.is_empty()
    }
}

// ============================================================
// 物理模型
// ============================================================

/// 物理模型能力
///
/// 状态变量布局固定为：位置 3 分量、速度 3 分量、模型自定义变量。
pub trait PhysicsModel: Send + Sync + fmt::Debug {
    /// 模型名称
    fn name(&self) -> &'static str;

    /// 状态变量个数（至少 6）
    fn number_of_independent_variables(&self) -> usize {
        6
    }

    /// 跟踪用户数据个数
    fn number_of_tracked_user_data(&self) -> usize {
        0
    }

    /// 模型自定义槽位的默认数组来源
    fn input_arrays(&self) -> Vec<(usize, InputArraySpec)> {
        Vec::new()
    }

    /// 右端项 f = dx/dt
    ///
    /// `sample` 提供粒子所在流场单元的数据访问。返回 false 表示
    /// 数据不可用，本次求值失败。
    fn evaluate_derivative(
        &self,
        sample: &mut FlowSample<'_>,
        particle: &Particle,
        t: f64,
        x: &[f64],
        f: &mut [f64],
    ) -> bool;

    /// 处理模型自定义表面类型（含用户类型），返回是否记录交互点
    fn interact_with_surface(
        &self,
        _surface_type: i32,
        particle: &mut Particle,
        _hit: &SurfaceHit<'_>,
        _spawn: &mut SpawnContext<'_>,
    ) -> bool {
        terminate_particle(particle)
    }

    /// 自由飞行中是否终止粒子
    fn check_free_flight_termination(&self, _particle: &Particle) -> bool {
        false
    }

    /// 新粒子创建后的初始化
    fn initialize_particle(&self, _particle: &mut Particle) {}

    /// 该粒子是否参与自适应重积分
    fn check_adaptive_step_reintegration(&self, _particle: &Particle) -> bool {
        true
    }

    /// 手动积分，返回 None 时由积分器处理
    fn manual_integration(
        &self,
        _particle: &Particle,
        _x_prev: &[f64],
        _x_next: &mut [f64],
        _control: &StepControl,
    ) -> Option<StepOutcome> {
        None
    }

    /// 并行：标记为手动平移的粒子到达新进程后的平移
    fn parallel_manual_shift(&self, _particle: &mut Particle) {}
}

/// 按配置创建物理模型
pub fn create_physics_model(config: &ModelConfig) -> Box<dyn PhysicsModel> {
    match config.physics {
        PhysicsModelKind::Matida => Box::new(MatidaModel::new(DVec3::from_array(config.gravity))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_type_codes() {
        for code in 0..5 {
            assert_eq!(SurfaceType::from_code(code).unwrap().code(), code);
        }
        assert!(SurfaceType::from_code(USER_SURFACE_TYPE).is_none());
    }

    #[test]
    fn test_spawn_context() {
        let ids = ParticleIdAllocator::new(10, 2);
        let mut buffer = Vec::new();
        let mut spawn = SpawnContext::new(&ids, &mut buffer);
        let id = spawn.new_particle_id();
        spawn.spawn(Particle::new(6, 0, id, 0, 0, 0.0, Vec::new()));
        assert_eq!(spawn.len(), 1);
        assert_eq!(buffer[0].id, 10);
        assert_eq!(ids.peek(), 12);
    }

    #[test]
    fn test_factory() {
        let model = create_physics_model(&ModelConfig::default());
        assert_eq!(model.name(), "matida");
        assert!(model.number_of_independent_variables() >= 6);
    }
}
