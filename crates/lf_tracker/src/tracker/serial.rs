// crates/lf_tracker/src/tracker/serial.rs

//! 批次调度

use super::integrate::{integrate_particle, send_event, WorkerContext};
use super::output::{OutputLayout, TrackerOutput};
use super::{
    AbortHandle, FeedContext, LocalFeed, RunSummary, SeedSet, TrackerHooks, TrackerInput, WorkerEvent,
};
use crate::error::{TrackerError, TrackerResult};
use crate::model::{
    create_physics_model, ArraySchema, IntegrationModel, PhysicsModel, SLOT_INITIAL_INTEGRATION_TIME,
    SLOT_INITIAL_VELOCITY,
};
use crate::particle::{Particle, ParticleIdAllocator};
use crate::threaded_data::{ThreadedData, WorkerScratch};
use glam::DVec3;
use lf_config::TrackerConfig;
use rayon::prelude::*;
use std::sync::mpsc::sync_channel;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info};

/// 粒子追踪器
pub struct ParticleTracker<H: TrackerHooks = LocalFeed> {
    config: TrackerConfig,
    hooks: H,
    abort: AbortHandle,
    pool: Option<rayon::ThreadPool>,
}

impl ParticleTracker<LocalFeed> {
    /// 单进程追踪器
    pub fn new(config: TrackerConfig) -> TrackerResult<Self> {
        Self::with_hooks(config, LocalFeed)
    }
}

impl<H: TrackerHooks> ParticleTracker<H> {
    /// 使用指定钩子创建追踪器
    pub fn with_hooks(config: TrackerConfig, hooks: H) -> TrackerResult<Self> {
        if let Err(e) = config.validate() {
            error!("追踪配置无效: {}", e);
            return Err(e.into());
        }
        let pool = if config.number_of_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.number_of_threads)
                .thread_name(|i| format!("lf-worker-{i}"))
                .build()
                .map_err(|e| TrackerError::Communication(format!("无法创建线程池: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            config,
            hooks,
            abort: AbortHandle::new(),
            pool,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// 取消句柄，可在其他线程调用
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// 使用配置中的物理模型运行
    pub fn run(&mut self, input: TrackerInput) -> TrackerResult<(TrackerOutput, RunSummary)> {
        let physics = create_physics_model(&self.config.model);
        self.run_with_physics(input, physics)
    }

    /// 使用指定物理模型运行
    pub fn run_with_physics(
        &mut self,
        input: TrackerInput,
        physics: Box<dyn PhysicsModel>,
    ) -> TrackerResult<(TrackerOutput, RunSummary)> {
        let started = Instant::now();
        let mut model = self.build_model(&input, physics)?;

        let local_schema = ArraySchema::from_field_data(&input.seeds.point_data);
        let schema = self.hooks.negotiate_seed_schema(local_schema)?;
        if !input.seeds.is_empty() {
            model.check_seed_arrays(&schema)?;
        }
        model.set_seed_schema(schema.clone());

        let surfaces = model.surfaces().iter().map(|s| s.flat_index).collect();
        let layout = OutputLayout::new(schema, surfaces);
        let (start, stride) = self.hooks.id_stride();
        let ids = ParticleIdAllocator::new(start, stride);

        let mut summary = RunSummary {
            seeds: input.seeds.len(),
            ..Default::default()
        };
        let mut output = TrackerOutput::new(&layout);

        let ctx = FeedContext {
            model: &model,
            config: &self.config,
            ids: &ids,
        };
        let (located, unresolved) = seed_particles(&ctx, &input.seeds)?;
        debug!(
            "种子 {} 个: 本地定位 {}, 未定位 {}",
            input.seeds.len(),
            located.len(),
            unresolved.len()
        );
        let mut queue = self.hooks.generate_particles(&ctx, located, unresolved)?;

        loop {
            if self.abort.is_aborted() {
                info!("追踪已取消，剩余 {} 个粒子未积分", queue.len());
                summary.aborted = true;
                break;
            }
            if queue.is_empty() {
                let more = self.hooks.particle_feed(&ctx, &mut queue)?;
                if queue.is_empty() {
                    if more {
                        continue;
                    }
                    break;
                }
            }

            let batch = std::mem::take(&mut queue);
            summary.batches += 1;
            summary.particles_queued += batch.len() as u64;
            let spawned = self.run_batch(&ctx, &layout, batch, &mut output, &mut summary)?;
            summary.particles_spawned += spawned.len() as u64;
            queue.extend(spawned);
        }

        if self.config.generate_poly_vertex_interaction_output {
            output.interactions.merge_into_poly_vertex();
        }
        self.hooks.finalize_outputs(&mut output)?;

        summary.paths = output.n_paths();
        summary.interaction_points = output.interactions.n_points();
        info!(
            "追踪完成: {} 个粒子, {} 个批次, {} 条轨迹, {} 个交互点, 用时 {:.3}s",
            summary.particles_integrated,
            summary.batches,
            summary.paths,
            summary.interaction_points,
            started.elapsed().as_secs_f64()
        );
        Ok((output, summary))
    }

    /// 注册数据集
    ///
    /// 空数据集记录错误后跳过；缺少数组等配置错误直接返回。
    fn build_model(&self, input: &TrackerInput, physics: Box<dyn PhysicsModel>) -> TrackerResult<IntegrationModel> {
        let mut model = IntegrationModel::new(physics, &self.config.model);
        for dataset in &input.flow {
            match model.add_flow_dataset(dataset.clone()) {
                Ok(_) | Err(TrackerError::InvalidDataSet(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if model.n_flow_datasets() == 0 {
            error!("没有可用的流场数据集");
            return Err(TrackerError::NoFlowData);
        }
        for (flat_index, surface) in &input.surfaces {
            match model.add_surface(*flat_index, surface.clone()) {
                Ok(_) | Err(TrackerError::InvalidDataSet(_)) => {}
                Err(e) => return Err(e),
            }
        }
        debug!(
            "积分模型 {}: {} 个流场, {} 个表面",
            model.physics().name(),
            model.n_flow_datasets(),
            model.surfaces().len()
        );
        Ok(model)
    }

    /// 并行积分一批粒子，返回派生粒子
    fn run_batch(
        &self,
        ctx: &FeedContext<'_>,
        layout: &OutputLayout,
        batch: Vec<Particle>,
        output: &mut TrackerOutput,
        summary: &mut RunSummary,
    ) -> TrackerResult<Vec<Particle>> {
        let n = batch.len();
        let (tx, rx) = sync_channel::<WorkerEvent>(self.config.channel_capacity);
        let hooks = &self.hooks;
        let pool = self.pool.as_ref();
        let kind = self.config.integrator;

        let mut spawned = Vec::new();
        let workers = thread::scope(|s| {
            let handle = s.spawn(move || {
                let worker = WorkerContext {
                    model: ctx.model,
                    config: ctx.config,
                    layout,
                    ids: ctx.ids,
                    events: &tx,
                };
                let job = || {
                    batch
                        .into_par_iter()
                        .fold(
                            || ThreadedData::new(kind, layout),
                            |mut data, mut particle| {
                                if let Err(e) = integrate_particle(&worker, &mut data, &mut particle) {
                                    error!("粒子 {} 输出写入失败: {}", particle.id, e);
                                }
                                hooks.after_integration(ctx, &mut particle);
                                send_event(&tx, WorkerEvent::Integrated(particle.termination));
                                data
                            },
                        )
                        .collect::<Vec<_>>()
                };
                match pool {
                    Some(pool) => pool.install(job),
                    None => job(),
                }
            });

            let mut done = 0usize;
            for event in rx.iter() {
                match event {
                    WorkerEvent::Spawned(particle) => spawned.push(particle),
                    WorkerEvent::Integrated(termination) => {
                        done += 1;
                        summary.record_termination(termination);
                        if done % 1000 == 0 {
                            debug!("批次进度 {}/{}", done, n);
                        }
                    }
                }
            }
            handle.join().map_err(|_| TrackerError::WorkerPanicked)
        })?;

        for data in &workers {
            output.append(&data.paths, &data.interactions);
            summary.locator_stats.merge(&data.scratch.stats);
            summary.particles_integrated += data.integrated;
        }
        debug!(
            "批次 {} 完成: {} 个粒子, {} 个工作分片, 派生 {}",
            summary.batches,
            n,
            workers.len(),
            spawned.len()
        );
        Ok(spawned)
    }
}

/// 由种子生成粒子并在本地流场中定位
///
/// 返回 (定位成功, 未定位)。
pub(crate) fn seed_particles(ctx: &FeedContext<'_>, seeds: &SeedSet) -> TrackerResult<(Vec<Particle>, Vec<Particle>)> {
    let model = ctx.model;
    let schema = model.seed_schema();
    let mut scratch = WorkerScratch::new();
    let mut located = Vec::with_capacity(seeds.len());
    let mut unresolved = Vec::new();
    let mut seed_data = Vec::new();

    for (i, &position) in seeds.positions.iter().enumerate() {
        schema.gather_tuple(&seeds.point_data, i, &mut seed_data);
        let id = ctx.ids.next_id();
        let mut particle = Particle::new(
            model.n_variables(),
            model.n_tracked_user_data(),
            id,
            id,
            i as i64,
            0.0,
            seed_data.clone(),
        );

        let velocity = model.seed_value(SLOT_INITIAL_VELOCITY, &particle).map_err(|e| {
            error!("种子 {} 无法读取初始速度: {}", i, e);
            e
        })?;
        let velocity = match velocity {
            [x, y, z, ..] => DVec3::new(*x, *y, *z),
            _ => {
                error!("种子 {} 的初始速度分量不足", i);
                return Err(TrackerError::invalid_array(SLOT_INITIAL_VELOCITY, "初始速度需要 3 个分量"));
            }
        };
        if model.use_initial_integration_time() {
            let time = model.seed_value(SLOT_INITIAL_INTEGRATION_TIME, &particle)?;
            particle.integration_time = time.first().copied().unwrap_or(0.0);
            particle.prev_integration_time = particle.integration_time;
        }

        particle.set_position(position);
        particle.set_velocity(velocity);
        particle.prev_equation_variables.clone_from(&particle.equation_variables);
        model.physics().initialize_particle(&mut particle);

        if model
            .find_in_locators(position, &mut particle.locator_cache, &mut scratch)
            .is_some()
        {
            located.push(particle);
        } else {
            unresolved.push(particle);
        }
    }
    Ok((located, unresolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let config = TrackerConfig {
            step_factor: -1.0,
            ..Default::default()
        };
        assert!(ParticleTracker::new(config).is_err());
    }

    #[test]
    fn test_no_flow_data() {
        let mut tracker = ParticleTracker::new(TrackerConfig::default()).unwrap();
        let err = tracker.run(TrackerInput::default()).unwrap_err();
        assert!(matches!(err, TrackerError::NoFlowData));
    }

    #[test]
    fn test_abort_handle_shared() {
        let tracker = ParticleTracker::new(TrackerConfig::default()).unwrap();
        let handle = tracker.abort_handle();
        handle.abort();
        assert!(tracker.abort.is_aborted());
    }
}
