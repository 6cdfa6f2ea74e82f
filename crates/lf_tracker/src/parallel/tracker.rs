// crates/lf_tracker/src/parallel/tracker.rs

//! 分布式追踪钩子
//!
//! 在串行追踪器的各个环节上接入：
//!
//! - 粒子编号按 rank 交错分配，各进程互不重叠
//! - 种子数组模式在进程间协商
//! - 本地无法定位的种子发往其他进程；出域的粒子在积分结束后迁移
//! - 本地队列耗尽时进入终止检测
//! - 输出合并后按粒子编号统一各进程的终止原因

use super::comm::Communicator;
use super::quiescence::FeedCoordinator;
use super::schema;
use super::stream::ParticleStreamManager;
use crate::error::TrackerResult;
use crate::model::{ArraySchema, IntegrationModel};
use crate::particle::{Particle, Termination};
use crate::threaded_data::WorkerScratch;
use crate::tracker::{FeedContext, ParticleTracker, TrackerHooks, TrackerOutput};
use lf_config::TrackerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// 迁移统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStats {
    /// 发出的粒子数（一个粒子发往多个进程只计一次）
    pub sent: u64,
    /// 收到的粒子数
    pub received: u64,
    /// 收到后无法在本地定位而丢弃的粒子数
    pub discarded: u64,
    /// 终止原因被其他进程结果覆盖的轨迹数
    pub reconciled: usize,
}

/// 分布式追踪钩子
#[derive(Debug)]
pub struct DistributedFeed {
    comm: Arc<dyn Communicator>,
    /// 工作线程在粒子出域时发送，协调线程在播种和补充时收发
    stream: Mutex<Option<ParticleStreamManager>>,
    coordinator: FeedCoordinator,
    poll_interval: Duration,
    stats: MigrationStats,
}

impl DistributedFeed {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self {
            coordinator: FeedCoordinator::new(Arc::clone(&comm)),
            comm,
            stream: Mutex::new(None),
            poll_interval: FeedCoordinator::DEFAULT_POLL_INTERVAL,
            stats: MigrationStats::default(),
        }
    }

    /// 设置终止检测的轮询间隔
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn communicator(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    /// 最近一次运行的迁移统计
    pub fn stats(&self) -> MigrationStats {
        self.stats
    }
}

/// 接收其他进程发来的粒子，本地可定位的加入队列
fn receive_into(
    stream: &Mutex<Option<ParticleStreamManager>>,
    model: &IntegrationModel,
    queue: &mut Vec<Particle>,
    discarded: &mut u64,
) {
    let mut guard = stream.lock();
    let Some(stream) = guard.as_mut() else {
        return;
    };
    let mut scratch = WorkerScratch::new();
    while let Some(mut particle) = stream.receive_particle() {
        if particle.manual_shift {
            model.physics().parallel_manual_shift(&mut particle);
            particle.manual_shift = false;
        }
        if model
            .find_in_locators(particle.position(), &mut particle.locator_cache, &mut scratch)
            .is_some()
        {
            trace!("接收粒子 {}", particle.id);
            queue.push(particle);
        } else {
            *discarded += 1;
        }
    }
}

impl TrackerHooks for DistributedFeed {
    fn id_stride(&self) -> (i64, i64) {
        (self.comm.rank() as i64, self.comm.size() as i64)
    }

    fn negotiate_seed_schema(&mut self, local: ArraySchema) -> TrackerResult<ArraySchema> {
        schema::negotiate_seed_schema(self.comm.as_ref(), local)
    }

    fn generate_particles(
        &mut self,
        ctx: &FeedContext<'_>,
        located: Vec<Particle>,
        unresolved: Vec<Particle>,
    ) -> TrackerResult<Vec<Particle>> {
        self.stats = MigrationStats::default();
        self.coordinator = FeedCoordinator::new(Arc::clone(&self.comm)).with_poll_interval(self.poll_interval);

        let seed_components = ctx.model.seed_schema().total_components();
        let mut stream = ParticleStreamManager::new(Arc::clone(&self.comm), &ctx.model.flow_bounds(), seed_components);
        for particle in &unresolved {
            stream.send_particle(particle);
        }
        *self.stream.lock() = Some(stream);
        self.comm.barrier();

        let n_located = located.len();
        let mut queue = located;
        receive_into(&self.stream, ctx.model, &mut queue, &mut self.stats.discarded);
        debug!(
            "rank {}: 本地定位种子 {} 个, 未定位 {} 个, 接收 {} 个",
            self.comm.rank(),
            n_located,
            unresolved.len(),
            queue.len() - n_located
        );
        Ok(queue)
    }

    fn particle_feed(&mut self, ctx: &FeedContext<'_>, queue: &mut Vec<Particle>) -> TrackerResult<bool> {
        let Self {
            stream,
            coordinator,
            stats,
            ..
        } = self;
        receive_into(stream, ctx.model, queue, &mut stats.discarded);
        if !queue.is_empty() {
            return Ok(true);
        }
        let more = coordinator.feed(|q| receive_into(stream, ctx.model, q, &mut stats.discarded), queue);
        Ok(more)
    }

    fn after_integration(&self, _ctx: &FeedContext<'_>, particle: &mut Particle) {
        if particle.termination != Termination::OutOfDomain {
            return;
        }
        if !particle.manual_shift {
            particle.insert_previous_position = true;
        }
        if let Some(stream) = self.stream.lock().as_mut() {
            stream.send_particle(particle);
        }
    }

    fn finalize_outputs(&mut self, output: &mut TrackerOutput) -> TrackerResult<()> {
        let local: Vec<i64> = output
            .path_terminations()
            .into_iter()
            .filter(|(_, t)| *t != Termination::OutOfDomain)
            .flat_map(|(id, t)| [id, i64::from(t.code())])
            .collect();
        let remote: HashMap<i64, Termination> = self
            .comm
            .all_gather_i64(&local)
            .iter()
            .flat_map(|v| v.chunks_exact(2))
            .filter_map(|pair| {
                let code = i32::try_from(pair[1]).ok()?;
                Some((pair[0], Termination::from_code(code)?))
            })
            .collect();
        self.stats.reconciled = output.reconcile_terminations(&remote);

        if let Some(stream) = self.stream.lock().take() {
            self.stats.sent = stream.sent();
            self.stats.received = stream.received();
        }
        info!(
            "rank {}: 迁移发出 {}, 收到 {}, 丢弃 {}, 终止原因更新 {}",
            self.comm.rank(),
            self.stats.sent,
            self.stats.received,
            self.stats.discarded,
            self.stats.reconciled
        );
        Ok(())
    }
}

impl ParticleTracker<DistributedFeed> {
    /// 分布式追踪器，每个 rank 各创建一个，并在各自线程或进程中运行
    pub fn distributed(config: TrackerConfig, comm: Arc<dyn Communicator>) -> TrackerResult<Self> {
        Self::with_hooks(config, DistributedFeed::new(comm))
    }
}
