// crates/lf_tracker/src/integrator/cash_karp.rs

//! Cash-Karp 嵌入式 Runge-Kutta 4(5)
//!
//! 同一组六级斜率给出五阶解与四阶解，二者之差作为误差估计。
//! 误差超过 `max_error` 时缩小步长重算，满足时按经验公式放大
//! 建议步长，步长始终限制在 `[dt_min, dt_max]` 内。
//! `max_error <= 0` 或 `dt_min == dt_max == dt` 时退化为单步。

use super::{check_buffers, FunctionSet, IntegrationStatus, StepControl, StepIntegrator, StepOutcome};

const C: [f64; 6] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 3.0 / 5.0, 1.0, 7.0 / 8.0];

const A: [&[f64]; 6] = [
    &[],
    &[1.0 / 5.0],
    &[3.0 / 40.0, 9.0 / 40.0],
    &[3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0],
    &[-11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0],
    &[
        1631.0 / 55296.0,
        175.0 / 512.0,
        575.0 / 13824.0,
        44275.0 / 110592.0,
        253.0 / 4096.0,
    ],
];

/// 五阶权重
const B5: [f64; 6] = [37.0 / 378.0, 0.0, 250.0 / 621.0, 125.0 / 594.0, 0.0, 512.0 / 1771.0];

/// 四阶权重
const B4: [f64; 6] = [
    2825.0 / 27648.0,
    0.0,
    18575.0 / 48384.0,
    13525.0 / 55296.0,
    277.0 / 14336.0,
    1.0 / 4.0,
];

/// 步长调整安全系数
const SAFETY: f64 = 0.9;
const SHRINK_EXPONENT: f64 = -0.25;
const GROW_EXPONENT: f64 = -0.2;

/// Cash-Karp 自适应积分器
#[derive(Debug, Default)]
pub struct Rk45 {
    k: [Vec<f64>; 6],
    y: Vec<f64>,
}

enum SingleStep {
    Done { error: f64 },
    Failed(StepOutcome),
}

impl Rk45 {
    pub fn new() -> Self {
        Self::default()
    }

    fn single_step(
        &mut self,
        func: &mut dyn FunctionSet,
        x_prev: &[f64],
        x_next: &mut [f64],
        t: f64,
        dt: f64,
    ) -> SingleStep {
        let n = func.n_equations();
        for k in &mut self.k {
            k.resize(n, 0.0);
        }
        self.y.resize(n, 0.0);

        for stage in 0..6 {
            self.y[..n].copy_from_slice(&x_prev[..n]);
            for (j, &a) in A[stage].iter().enumerate() {
                for (y, k) in self.y.iter_mut().zip(&self.k[j]) {
                    *y += dt * a * k;
                }
            }
            if !func.evaluate(&self.y, t + C[stage] * dt, &mut self.k[stage]) {
                x_next[..n].copy_from_slice(&self.y[..n]);
                return SingleStep::Failed(StepOutcome::new(
                    IntegrationStatus::OutOfDomain,
                    C[stage] * dt,
                    dt,
                ));
            }
        }

        let mut err2 = 0.0;
        for i in 0..n {
            let mut fifth = 0.0;
            let mut fourth = 0.0;
            for stage in 0..6 {
                fifth += B5[stage] * self.k[stage][i];
                fourth += B4[stage] * self.k[stage][i];
            }
            x_next[i] = x_prev[i] + dt * fifth;
            let diff = dt * (fifth - fourth);
            err2 += diff * diff;
        }

        if x_next[..n].iter().any(|v| !v.is_finite()) {
            return SingleStep::Failed(StepOutcome::new(IntegrationStatus::UnexpectedValue, dt, dt));
        }
        SingleStep::Done { error: err2.sqrt() }
    }
}

impl StepIntegrator for Rk45 {
    fn name(&self) -> &'static str {
        "rk45"
    }

    fn is_adaptive(&self) -> bool {
        true
    }

    fn compute_next_step(
        &mut self,
        func: &mut dyn FunctionSet,
        x_prev: &[f64],
        x_next: &mut [f64],
        control: &StepControl,
    ) -> StepOutcome {
        if !check_buffers(func, x_prev, x_next) {
            return StepOutcome::new(IntegrationStatus::NotInitialized, 0.0, control.dt);
        }
        let dt_min = control.dt_min.abs();
        let dt_max = control.dt_max.abs();
        let mut dt = control.dt.abs();

        let fixed = dt_min == dt && dt_max == dt;
        if fixed || control.max_error <= 0.0 {
            return match self.single_step(func, x_prev, x_next, control.t, dt) {
                SingleStep::Done { error } => StepOutcome {
                    status: IntegrationStatus::Ok,
                    dt_actual: dt,
                    dt_next: dt,
                    error,
                },
                SingleStep::Failed(out) => out,
            };
        }
        if dt_min > dt_max {
            return StepOutcome::new(IntegrationStatus::UnexpectedValue, 0.0, dt);
        }
        dt = dt.clamp(dt_min, dt_max);

        loop {
            let error = match self.single_step(func, x_prev, x_next, control.t, dt) {
                SingleStep::Done { error } => error,
                SingleStep::Failed(out) => return out,
            };

            let ratio = error / control.max_error;
            if ratio <= 1.0 || dt <= dt_min {
                let grown = if ratio == 0.0 {
                    dt_max
                } else {
                    SAFETY * dt * ratio.powf(GROW_EXPONENT)
                };
                return StepOutcome {
                    status: IntegrationStatus::Ok,
                    dt_actual: dt,
                    dt_next: grown.clamp(dt_min, dt_max),
                    error,
                };
            }

            dt = (SAFETY * dt * ratio.powf(SHRINK_EXPONENT)).clamp(dt_min, dt_max);
            if control.t + dt == control.t {
                return StepOutcome::new(IntegrationStatus::UnexpectedValue, 0.0, dt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::test_functions::Decay;

    #[test]
    fn test_fixed_step_matches_exact_solution() {
        let mut rk45 = Rk45::new();
        let mut f = Decay::new();
        let mut next = [0.0; 2];
        let control = StepControl {
            t: 0.0,
            dt: 0.1,
            dt_min: 0.1,
            dt_max: 0.1,
            max_error: 1e-6,
        };
        let out = rk45.compute_next_step(&mut f, &[0.0, 1.0], &mut next, &control);
        assert_eq!(out.status, IntegrationStatus::Ok);
        assert_eq!(out.dt_actual, 0.1);
        assert!((next[1] - (-0.1f64).exp()).abs() < 1e-8);
        assert_eq!(f.calls, 6);
    }

    #[test]
    fn test_adaptive_step_shrinks_to_meet_error() {
        let mut rk45 = Rk45::new();
        let mut f = Decay::new();
        let mut next = [0.0; 2];
        let control = StepControl {
            t: 0.0,
            dt: 1.0,
            dt_min: 1e-4,
            dt_max: 2.0,
            max_error: 1e-10,
        };
        let out = rk45.compute_next_step(&mut f, &[0.0, 1.0], &mut next, &control);
        assert_eq!(out.status, IntegrationStatus::Ok);
        assert!(out.dt_actual < 1.0);
        assert!(out.error <= 1e-10);
        assert!(out.dt_next >= control.dt_min && out.dt_next <= control.dt_max);
        assert!((next[1] - (-out.dt_actual).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_step_grows_when_error_is_small() {
        let mut rk45 = Rk45::new();
        let mut f = Decay::new();
        let mut next = [0.0; 2];
        let control = StepControl {
            t: 0.0,
            dt: 0.01,
            dt_min: 0.001,
            dt_max: 0.5,
            max_error: 1e-3,
        };
        let out = rk45.compute_next_step(&mut f, &[0.0, 1.0], &mut next, &control);
        assert_eq!(out.dt_actual, 0.01);
        assert!(out.dt_next > 0.01);
    }

    #[test]
    fn test_invalid_bounds() {
        let mut rk45 = Rk45::new();
        let mut f = Decay::new();
        let mut next = [0.0; 2];
        let control = StepControl {
            t: 0.0,
            dt: 0.1,
            dt_min: 0.5,
            dt_max: 0.2,
            max_error: 1e-6,
        };
        let out = rk45.compute_next_step(&mut f, &[0.0, 1.0], &mut next, &control);
        assert_eq!(out.status, IntegrationStatus::UnexpectedValue);
    }
}
