// crates/lf_tracker/src/model/matida.rs

//! Matida 球形颗粒拖曳模型
//!
//! 颗粒受流体拖曳与浮力修正后的重力：
//!
//! ```text
//! τ  = ρp d² / (18 μ)
//! Re = ρf |u - v| d / μ
//! Cd = 1 + 0.15 Re^0.687
//! dv/dt = (u - v) Cd / τ + g (1 - ρf / ρp)
//! ```

use super::arrays::{ArrayAssociation, InputArraySpec, InputPort};
use super::{FlowSample, PhysicsModel};
use crate::particle::Particle;
use glam::DVec3;
use tracing::trace;

/// 流场速度槽位
pub const SLOT_FLOW_VELOCITY: usize = 3;
/// 流体密度槽位
pub const SLOT_FLOW_DENSITY: usize = 4;
/// 流体动力粘度槽位
pub const SLOT_FLOW_DYNAMIC_VISCOSITY: usize = 5;
/// 颗粒直径槽位
pub const SLOT_PARTICLE_DIAMETER: usize = 6;
/// 颗粒密度槽位
pub const SLOT_PARTICLE_DENSITY: usize = 7;

/// Matida 模型
#[derive(Debug, Clone)]
pub struct MatidaModel {
    gravity: DVec3,
}

impl Default for MatidaModel {
    fn default() -> Self {
        Self::new(DVec3::new(0.0, 0.0, -9.8))
    }
}

impl MatidaModel {
    pub fn new(gravity: DVec3) -> Self {
        Self { gravity }
    }

    pub fn gravity(&self) -> DVec3 {
        self.gravity
    }

    /// 松弛时间，粘度为零时为无穷大
    pub fn relaxation_time(dynamic_viscosity: f64, diameter: f64, density: f64) -> f64 {
        if dynamic_viscosity == 0.0 {
            f64::INFINITY
        } else {
            density * diameter * diameter / (18.0 * dynamic_viscosity)
        }
    }

    /// 颗粒雷诺数
    pub fn reynolds_number(
        flow_velocity: DVec3,
        particle_velocity: DVec3,
        dynamic_viscosity: f64,
        diameter: f64,
        flow_density: f64,
    ) -> f64 {
        if dynamic_viscosity == 0.0 {
            return f64::INFINITY;
        }
        flow_density * (flow_velocity - particle_velocity).length() * diameter / dynamic_viscosity
    }

    /// 拖曳修正系数
    pub fn drag_coefficient(reynolds: f64) -> f64 {
        1.0 + 0.15 * reynolds.powf(0.687)
    }
}

impl PhysicsModel for MatidaModel {
    fn name(&self) -> &'static str {
        "matida"
    }

    fn input_arrays(&self) -> Vec<(usize, InputArraySpec)> {
        vec![
            (
                SLOT_FLOW_VELOCITY,
                InputArraySpec::new(InputPort::Flow, ArrayAssociation::Points, "FlowVelocity"),
            ),
            (
                SLOT_FLOW_DENSITY,
                InputArraySpec::new(InputPort::Flow, ArrayAssociation::Points, "FlowDensity"),
            ),
            (
                SLOT_FLOW_DYNAMIC_VISCOSITY,
                InputArraySpec::new(InputPort::Flow, ArrayAssociation::Points, "FlowDynamicViscosity"),
            ),
            (
                SLOT_PARTICLE_DIAMETER,
                InputArraySpec::new(InputPort::Seed, ArrayAssociation::Points, "ParticleDiameter"),
            ),
            (
                SLOT_PARTICLE_DENSITY,
                InputArraySpec::new(InputPort::Seed, ArrayAssociation::Points, "ParticleDensity"),
            ),
        ]
    }

    fn evaluate_derivative(
        &self,
        sample: &mut FlowSample<'_>,
        particle: &Particle,
        _t: f64,
        x: &[f64],
        f: &mut [f64],
    ) -> bool {
        if x.len() < 6 || f.len() < 6 {
            return false;
        }

        let mut flow_velocity = [0.0; 3];
        let mut flow_density = [0.0];
        let mut viscosity = [0.0];
        let flow = sample
            .flow_data(SLOT_FLOW_VELOCITY, &mut flow_velocity)
            .and_then(|_| sample.flow_data(SLOT_FLOW_DENSITY, &mut flow_density))
            .and_then(|_| sample.flow_data(SLOT_FLOW_DYNAMIC_VISCOSITY, &mut viscosity));
        if let Err(e) = flow {
            trace!("粒子 {} 流场数据不可用: {}", particle.id, e);
            return false;
        }

        let (diameter, particle_density) = match (
            sample.seed_value(SLOT_PARTICLE_DIAMETER, particle),
            sample.seed_value(SLOT_PARTICLE_DENSITY, particle),
        ) {
            (Ok(d), Ok(rho)) if !d.is_empty() && !rho.is_empty() => (d[0], rho[0]),
            _ => {
                trace!("粒子 {} 缺少颗粒直径或密度", particle.id);
                return false;
            }
        };

        let u = DVec3::from_array(flow_velocity);
        let v = DVec3::new(x[3], x[4], x[5]);
        let flow_density = flow_density[0];
        let viscosity = viscosity[0];

        let relax = Self::relaxation_time(viscosity, diameter, particle_density);
        let reynolds = Self::reynolds_number(u, v, viscosity, diameter, flow_density);
        let drag = Self::drag_coefficient(reynolds);
        let buoyancy = if particle_density != 0.0 {
            1.0 - flow_density / particle_density
        } else {
            0.0
        };

        for i in 0..3 {
            f[i] = x[i + 3];
            let slip = u[i] - v[i];
            f[i + 3] = if relax == 0.0 {
                f64::INFINITY.copysign(slip)
            } else if relax.is_infinite() {
                // 无粘流体不产生拖曳
                0.0
            } else {
                slip * drag / relax
            };
            f[i + 3] += self.gravity[i] * buoyancy;
        }
        for value in f.iter_mut().skip(6) {
            *value = 0.0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relaxation_time() {
        let tau = MatidaModel::relaxation_time(1e-3, 1e-4, 2500.0);
        assert!((tau - 2500.0 * 1e-8 / 18e-3).abs() < 1e-15);
        assert!(MatidaModel::relaxation_time(0.0, 1e-4, 2500.0).is_infinite());
    }

    #[test]
    fn test_drag_coefficient_stokes_limit() {
        assert_eq!(MatidaModel::drag_coefficient(0.0), 1.0);
        let re = MatidaModel::reynolds_number(DVec3::X, DVec3::ZERO, 1e-3, 1e-3, 1000.0);
        assert!((re - 1000.0).abs() < 1e-9);
        assert!(MatidaModel::drag_coefficient(re) > 1.0);
    }

    #[test]
    fn test_input_array_slots() {
        let model = MatidaModel::default();
        let slots: Vec<usize> = model.input_arrays().into_iter().map(|(s, _)| s).collect();
        assert_eq!(slots, vec![3, 4, 5, 6, 7]);
        assert_eq!(model.gravity(), DVec3::new(0.0, 0.0, -9.8));
    }
}
