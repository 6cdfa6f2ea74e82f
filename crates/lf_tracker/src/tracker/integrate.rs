// crates/lf_tracker/src/tracker/integrate.rs

//! 单粒子积分循环

use super::cell_length::compute_cell_length;
use super::output::OutputLayout;
use super::WorkerEvent;
use crate::error::TrackerResult;
use crate::integrator::{IntegrationStatus, StepControl, StepOutcome};
use crate::model::{IntegrationModel, ParticleFunctionSet, SpawnContext};
use crate::particle::{Particle, ParticleIdAllocator, Termination};
use crate::threaded_data::ThreadedData;
use lf_config::TrackerConfig;
use std::sync::mpsc::{SendError, SyncSender};
use tracing::{error, trace, warn};

/// 工作线程共享的只读上下文
pub(crate) struct WorkerContext<'a> {
    pub model: &'a IntegrationModel,
    pub config: &'a TrackerConfig,
    pub layout: &'a OutputLayout,
    pub ids: &'a ParticleIdAllocator,
    pub events: &'a SyncSender<WorkerEvent>,
}

/// 向协调线程发送事件，协调线程已退出时记录错误并返回 false
pub(crate) fn send_event(events: &SyncSender<WorkerEvent>, event: WorkerEvent) -> bool {
    match events.send(event) {
        Ok(()) => true,
        Err(SendError(WorkerEvent::Spawned(child))) => {
            error!("协调线程已退出，派生粒子 {} 丢失", child.id);
            false
        }
        Err(SendError(WorkerEvent::Integrated(termination))) => {
            error!("协调线程已退出，积分结果 {:?} 未计入统计", termination);
            false
        }
    }
}

/// 下一位置与当前位置在三个方向上都相同
fn is_stagnating(particle: &Particle) -> bool {
    let delta = (particle.next_position() - particle.position()).abs();
    delta.max_element() < f64::EPSILON
}

/// 推进一步：先交给物理模型的手动积分，否则使用积分器
fn advance(model: &IntegrationModel, data: &mut ThreadedData, particle: &mut Particle, control: &StepControl) -> StepOutcome {
    data.state.clone_from(&particle.equation_variables);
    data.next_state.clone_from(&particle.next_equation_variables);

    let outcome = match model
        .physics()
        .manual_integration(particle, &data.state, &mut data.next_state, control)
    {
        Some(outcome) => outcome,
        None => {
            let mut func = ParticleFunctionSet {
                model,
                particle: &mut *particle,
                scratch: &mut data.scratch,
            };
            data.integrator
                .compute_next_step(&mut func, &data.state, &mut data.next_state, control)
        }
    };
    particle.next_equation_variables.copy_from_slice(&data.next_state);
    outcome
}

/// 积分一个粒子直到终止
///
/// 轨迹点与交互点写入 `data` 的本地输出，派生粒子通过通道回传。
/// 积分器报告未初始化或非法值时记录错误并停止该粒子，
/// 此时粒子保持未终止状态。
pub(crate) fn integrate_particle(
    ctx: &WorkerContext<'_>,
    data: &mut ThreadedData,
    particle: &mut Particle,
) -> TrackerResult<()> {
    let WorkerContext {
        model,
        config,
        layout,
        ..
    } = *ctx;
    let record_path = config.generate_particle_paths_output;
    let mut line = Vec::new();
    if record_path {
        if particle.insert_previous_position {
            layout.insert_path_point(&mut data.paths, &mut line, particle, true)?;
        }
        layout.insert_path_point(&mut data.paths, &mut line, particle, false)?;
    }
    particle.insert_previous_position = false;

    let adaptive = data.integrator.is_adaptive() || config.adaptive_step_reintegration;
    let mut step_factor = config.step_factor;
    let mut reintegration = 1.0;
    let mut attempts = 0;
    let mut spawned = Vec::new();

    while !particle.is_terminated() {
        let velocity = reintegration * config.minimum_velocity_magnitude.max(particle.velocity().length());
        let Some(cell_length) = compute_cell_length(model, config.cell_length_computation_mode, particle, &mut data.scratch)
        else {
            particle.termination = Termination::OutOfDomain;
            break;
        };

        let step_time = step_factor * cell_length / velocity;
        let control = StepControl {
            t: particle.integration_time,
            dt: step_time,
            dt_min: config.step_factor_min * cell_length / velocity,
            dt_max: config.step_factor_max * cell_length / velocity,
            max_error: config.maximum_error,
        };
        let step_length_max = config.step_factor_max * cell_length;

        let outcome = advance(model, data, particle, &control);
        particle.step_time = outcome.dt_actual;
        if matches!(
            outcome.status,
            IntegrationStatus::NotInitialized | IntegrationStatus::UnexpectedValue
        ) {
            error!("粒子 {} 积分失败: {:?}", particle.id, outcome.status);
            break;
        }

        let stagnating = is_stagnating(particle);
        let out_of_domain = outcome.status == IntegrationStatus::OutOfDomain && stagnating;

        if config.adaptive_step_reintegration && model.physics().check_adaptive_step_reintegration(particle) {
            let moved2 = particle.position().distance_squared(particle.next_position());
            if moved2 > step_length_max * step_length_max {
                if attempts < config.maximum_reintegration_attempts {
                    attempts += 1;
                    reintegration *= 2.0;
                    continue;
                }
                warn!(
                    "粒子 {} 重积分 {} 次后步长仍超限，接受当前步",
                    particle.id, attempts
                );
            }
            reintegration = 1.0;
            attempts = 0;
        }

        if out_of_domain {
            particle.termination = Termination::OutOfDomain;
            break;
        }

        if !stagnating {
            let mut spawn = SpawnContext::new(ctx.ids, &mut spawned);
            let result = model.compute_surface_interaction(particle, &mut data.scratch, &mut spawn);
            for (flat_index, pass) in &result.pass_throughs {
                layout.insert_interaction_point(&mut data.interactions, *flat_index, pass)?;
            }
            if let Some((flat_index, snapshot)) = &result.interaction {
                layout.insert_interaction_point(&mut data.interactions, *flat_index, snapshot)?;
            }
            for child in spawned.drain(..) {
                send_event(ctx.events, WorkerEvent::Spawned(child));
            }

            if particle.is_terminated() {
                particle.move_to_next_position();
                if record_path {
                    layout.insert_path_point(&mut data.paths, &mut line, particle, false)?;
                }
                break;
            }
        }

        if model.physics().check_free_flight_termination(particle) {
            particle.termination = Termination::FlightTerminated;
            break;
        }

        particle.move_to_next_position();
        if record_path {
            layout.insert_path_point(&mut data.paths, &mut line, particle, false)?;
        }

        if adaptive && step_time > 0.0 && outcome.dt_next.is_finite() && outcome.dt_next > 0.0 {
            let ratio = (outcome.dt_next / step_time).max(config.minimum_reduction_factor);
            step_factor = (step_factor * ratio).clamp(config.step_factor_min, config.step_factor_max);
        }

        if config.steps_reached(particle.number_of_steps) {
            particle.termination = Termination::OutOfSteps;
        } else if config.time_reached(particle.integration_time) {
            particle.termination = Termination::OutOfTime;
        }
    }

    trace!(
        "粒子 {} 结束: {:?}, {} 步",
        particle.id,
        particle.termination,
        particle.number_of_steps
    );
    if record_path {
        layout.finish_path(&mut data.paths, line, particle)?;
    }
    data.integrated += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stagnation_threshold() {
        let mut p = Particle::new(6, 0, 0, 0, 0, 0.0, Vec::new());
        assert!(is_stagnating(&p));
        p.set_next_position(glam::DVec3::new(0.0, 1e-17, 0.0));
        assert!(is_stagnating(&p));
        p.set_next_position(glam::DVec3::new(0.0, 0.0, 1e-12));
        assert!(!is_stagnating(&p));
    }

    #[test]
    fn test_send_event_reports_closed_channel() {
        let (tx, rx) = std::sync::mpsc::sync_channel::<WorkerEvent>(2);
        assert!(send_event(&tx, WorkerEvent::Integrated(Termination::OutOfDomain)));
        assert!(matches!(rx.recv(), Ok(WorkerEvent::Integrated(Termination::OutOfDomain))));

        drop(rx);
        assert!(!send_event(&tx, WorkerEvent::Integrated(Termination::OutOfSteps)));
        let child = Particle::new(6, 0, 3, 0, 0, 0.0, Vec::new());
        assert!(!send_event(&tx, WorkerEvent::Spawned(child)));
    }
}
