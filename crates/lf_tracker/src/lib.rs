// crates/lf_tracker/src/lib.rs

//! 拉格朗日粒子追踪引擎
//!
//! 给定流场网格、带初始速度的种子点和可选的交互表面，用可替换的
//! 积分器和物理模型推进大量相互独立的粒子，处理粒子与表面的交互
//! （终止、反弹、破碎、穿越），并在流场被划分到多个进程时迁移
//! 跨越分区边界的粒子。
//!
//! # 模块概览
//!
//! - [`quad_intersection`]: 射线与非平面双线性四边形求交
//! - [`particle`]: 粒子记录（前一步、当前、下一步三组状态）
//! - [`integrator`]: RK2 / RK4 / Cash-Karp RK45 单步积分器
//! - [`model`]: 物理模型能力与积分模型（定位、插值、表面交互）
//! - [`threaded_data`]: 工作线程私有数据
//! - [`tracker`]: 串行追踪器（线程并行的批次积分与输出合并）
//! - [`parallel`]: 分布式追踪（粒子迁移与终止检测）
//!
//! # 示例
//!
//! ```ignore
//! use lf_tracker::{ParticleTracker, TrackerInput};
//!
//! let mut tracker = ParticleTracker::new(config)?;
//! let (output, summary) = tracker.run(input)?;
//! ```

pub mod error;
pub mod integrator;
pub mod model;
pub mod parallel;
pub mod particle;
pub mod quad_intersection;
pub mod threaded_data;
pub mod tracker;

pub use error::{TrackerError, TrackerResult};
pub use integrator::{create_integrator, IntegrationStatus, StepIntegrator};
pub use model::{
    create_physics_model, IntegrationModel, MatidaModel, PhysicsModel, SurfaceType, USER_SURFACE_TYPE,
};
pub use parallel::{Communicator, DistributedFeed, LocalCluster, LocalComm, MigrationStats};
pub use particle::{Interaction, Particle, Termination};
pub use quad_intersection::BilinearQuadIntersection;
pub use threaded_data::LocatorCacheStats;
pub use tracker::{
    AbortHandle, InteractionOutput, LocalFeed, ParticleTracker, RunSummary, SeedSet, TrackerHooks, TrackerInput,
    TrackerOutput,
};
