// crates/lf_tracker/src/tracker/mod.rs

//! 粒子追踪器
//!
//! 一次运行分为：
//!
//! 1. 注册流场与表面数据集，协商种子数组模式
//! 2. 由种子生成粒子，在流场中定位
//! 3. 按批次并行积分：每个工作线程持有一份 [`ThreadedData`]，
//!    派生粒子与进度通过有界通道回传协调线程
//! 4. 批次结束后串行合并各线程输出，派生粒子进入下一批
//! 5. 队列为空时向 [`TrackerHooks::particle_feed`] 请求新粒子，
//!    没有更多粒子时结束
//!
//! 分布式运行通过 [`TrackerHooks`] 接入，见 [`crate::parallel`]。
//!
//! [`ThreadedData`]: crate::threaded_data::ThreadedData

pub mod cell_length;
mod integrate;
pub mod output;
mod serial;

pub use output::{InteractionOutput, OutputLayout, TrackerOutput};
pub use serial::ParticleTracker;

use crate::error::TrackerResult;
use crate::model::{ArraySchema, IntegrationModel};
use crate::particle::{Particle, ParticleIdAllocator, Termination};
use crate::threaded_data::LocatorCacheStats;
use glam::DVec3;
use lf_config::TrackerConfig;
use lf_foundation::FlatIndex;
use lf_mesh::{DataArray, DataSet, FieldData};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

// ============================================================
// 输入
// ============================================================

/// 种子点及其点数据
#[derive(Debug, Clone, Default)]
pub struct SeedSet {
    pub positions: Vec<DVec3>,
    pub point_data: FieldData,
}

impl SeedSet {
    pub fn new(positions: Vec<DVec3>) -> Self {
        Self {
            positions,
            point_data: FieldData::new(),
        }
    }

    /// 添加种子点数组
    pub fn with_array(mut self, array: DataArray) -> Self {
        self.point_data.add_array(array);
        self
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// 追踪输入
#[derive(Debug, Clone, Default)]
pub struct TrackerInput {
    /// 流场数据集
    pub flow: Vec<Arc<dyn DataSet>>,
    /// 种子
    pub seeds: SeedSet,
    /// 交互表面，按扁平索引标识
    pub surfaces: Vec<(FlatIndex, Arc<dyn DataSet>)>,
}

// ============================================================
// 运行控制
// ============================================================

/// 取消句柄，每个批次开始前检查一次
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// 运行统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// 种子点数
    pub seeds: usize,
    /// 进入积分队列的粒子数
    pub particles_queued: u64,
    /// 积分完成的粒子数
    pub particles_integrated: u64,
    /// 交互派生的粒子数
    pub particles_spawned: u64,
    /// 批次数
    pub batches: u64,
    /// 本地终止原因分布
    pub terminations: BTreeMap<Termination, u64>,
    /// 轨迹条数
    pub paths: usize,
    /// 交互点数
    pub interaction_points: usize,
    /// 定位缓存统计
    pub locator_stats: LocatorCacheStats,
    /// 是否被取消
    pub aborted: bool,
}

impl RunSummary {
    pub(crate) fn record_termination(&mut self, termination: Termination) {
        *self.terminations.entry(termination).or_default() += 1;
    }

    /// 某种终止原因的粒子数
    pub fn count(&self, termination: Termination) -> u64 {
        self.terminations.get(&termination).copied().unwrap_or(0)
    }
}

/// 工作线程发往协调线程的消息
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// 交互派生的新粒子
    Spawned(Particle),
    /// 一个粒子积分完成
    Integrated(Termination),
}

// ============================================================
// 钩子
// ============================================================

/// 钩子可访问的运行上下文
pub struct FeedContext<'a> {
    pub model: &'a IntegrationModel,
    pub config: &'a TrackerConfig,
    pub ids: &'a ParticleIdAllocator,
}

/// 追踪器的可替换环节
///
/// 单进程运行使用 [`LocalFeed`]；分布式运行在这些环节上完成
/// 模式协商、粒子迁移与终止检测。
pub trait TrackerHooks: Send + Sync {
    /// 本进程粒子编号的 (起点, 步长)
    fn id_stride(&self) -> (i64, i64) {
        (0, 1)
    }

    /// 协商种子数组模式
    fn negotiate_seed_schema(&mut self, local: ArraySchema) -> TrackerResult<ArraySchema> {
        Ok(local)
    }

    /// 处理种子粒子，返回初始积分队列
    ///
    /// `located` 在本地流场中定位成功，`unresolved` 未能定位。
    fn generate_particles(
        &mut self,
        _ctx: &FeedContext<'_>,
        located: Vec<Particle>,
        unresolved: Vec<Particle>,
    ) -> TrackerResult<Vec<Particle>> {
        for particle in &unresolved {
            debug!("种子 {} 不在任何流场单元内，已丢弃", particle.seed_id);
        }
        Ok(located)
    }

    /// 本地队列耗尽时补充粒子，返回 false 表示不再有粒子
    fn particle_feed(&mut self, _ctx: &FeedContext<'_>, _queue: &mut Vec<Particle>) -> TrackerResult<bool> {
        Ok(false)
    }

    /// 粒子积分结束后调用，在工作线程中执行
    fn after_integration(&self, _ctx: &FeedContext<'_>, _particle: &mut Particle) {}

    /// 输出合并完成后调用
    fn finalize_outputs(&mut self, _output: &mut TrackerOutput) -> TrackerResult<()> {
        Ok(())
    }
}

/// 单进程运行的钩子
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFeed;

impl TrackerHooks for LocalFeed {}
