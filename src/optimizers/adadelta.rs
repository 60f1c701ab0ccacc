//! AdaDelta optimizer implementation.

use crate::optimizers::Optimizer;
use crate::params::ParamRegistry;

/// AdaDelta (Zeiler, 2012).
///
/// Per-element update with decay `rho` and stability floor `epsilon`:
///
/// ```text
/// E[g²]  = ρ·E[g²] + (1-ρ)·g²
/// Δx     = -( √(E[Δx²] + ε) / √(E[g²] + ε) ) · g
/// param += Δx
/// E[Δx²] = ρ·E[Δx²] + (1-ρ)·Δx²
/// ```
///
/// The step for an element divides the old root-mean-square of its updates
/// by the fresh root-mean-square of its gradients: E[g²] is updated before
/// Δx is formed, E[Δx²] after. Both accumulators live in the parameter
/// registry, start at zero (so the first step is g scaled by √ε/√E[g²]),
/// and persist for the whole run.
///
/// The configured learning rate is carried for reporting but does not enter
/// the rule; AdaDelta derives its effective step size from the accumulators.
pub struct AdaDelta {
    learning_rate: f32,
    rho: f32,
    epsilon: f32,
}

impl AdaDelta {
    /// Creates an AdaDelta optimizer with decay `rho` and floor `epsilon`.
    pub fn new(learning_rate: f32, rho: f32, epsilon: f32) -> Self {
        assert!(rho > 0.0 && rho < 1.0, "rho must lie in (0, 1), got {}", rho);
        assert!(epsilon > 0.0, "epsilon must be positive, got {}", epsilon);
        Self {
            learning_rate,
            rho,
            epsilon,
        }
    }

    pub fn rho(&self) -> f32 {
        self.rho
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }
}

impl Optimizer for AdaDelta {
    fn step(&mut self, params: &mut ParamRegistry) {
        for tensor in params.iter_mut() {
            if !tensor.is_trainable() {
                continue;
            }
            let (values, grad, grad_sq_avg, delta_sq_avg) = tensor.update_buffers();
            for i in 0..values.len() {
                let g = grad[i];
                grad_sq_avg[i] = self.rho * grad_sq_avg[i] + (1.0 - self.rho) * g * g;
                let delta = -((delta_sq_avg[i] + self.epsilon).sqrt()
                    / (grad_sq_avg[i] + self.epsilon).sqrt())
                    * g;
                values[i] += delta;
                delta_sq_avg[i] =
                    self.rho * delta_sq_avg[i] + (1.0 - self.rho) * delta * delta;
            }
        }
    }

    /// Zeroes both accumulators of every tensor, trainable or not.
    fn reset(&mut self, params: &mut ParamRegistry) {
        for tensor in params.iter_mut() {
            let (_, _, grad_sq_avg, delta_sq_avg) = tensor.update_buffers();
            for v in grad_sq_avg.iter_mut() {
                *v = 0.0;
            }
            for v in delta_sq_avg.iter_mut() {
                *v = 0.0;
            }
        }
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn single_param(value: f32, grad: f32, trainable: bool) -> ParamRegistry {
        let mut params = ParamRegistry::new();
        let id = params.register("w", &[1], vec![value], 0.0, trainable);
        params.grad_mut(id)[0] = grad;
        params
    }

    #[test]
    fn test_adadelta_first_step_formula() {
        let mut params = single_param(1.0, 2.0, true);
        let mut optimizer = AdaDelta::new(0.1, 0.95, 1e-6);
        optimizer.step(&mut params);

        // E[g²] = 0.05 * 4 = 0.2; Δx = -√(1e-6)/√(0.200001) * 2 ≈ -0.0044721
        let id = params.find("w").unwrap();
        let eg = 0.05f32 * 4.0;
        let delta = -((0.0f32 + 1e-6).sqrt() / (eg + 1e-6).sqrt()) * 2.0;
        assert_relative_eq!(params.values(id)[0], 1.0 + delta, epsilon = 1e-7);
        assert_relative_eq!(params.get(id).grad_sq_avg()[0], eg, epsilon = 1e-7);
        assert_relative_eq!(
            params.get(id).delta_sq_avg()[0],
            0.05 * delta * delta,
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_adadelta_accumulators_persist_across_steps() {
        let mut params = single_param(1.0, 2.0, true);
        let id = params.find("w").unwrap();
        let mut optimizer = AdaDelta::new(0.1, 0.95, 1e-6);

        optimizer.step(&mut params);
        let eg_first = params.get(id).grad_sq_avg()[0];
        params.grad_mut(id)[0] = 2.0;
        optimizer.step(&mut params);

        // Second step decays the first accumulator: 0.95 * 0.2 + 0.05 * 4.
        assert_relative_eq!(
            params.get(id).grad_sq_avg()[0],
            0.95 * eg_first + 0.05 * 4.0,
            epsilon = 1e-7
        );
        assert!(params.get(id).delta_sq_avg()[0] > 0.0);
    }

    #[test]
    fn test_adadelta_grows_steps_from_cold_start() {
        // With a constant gradient the update magnitude rises as E[Δx²]
        // accumulates, the hallmark of the rule warming up from zero.
        let mut params = single_param(1.0, 2.0, true);
        let id = params.find("w").unwrap();
        let mut optimizer = AdaDelta::new(0.1, 0.95, 1e-6);

        let mut previous = params.values(id)[0];
        let mut last_step = 0.0f32;
        for _ in 0..5 {
            params.zero_grads();
            params.grad_mut(id)[0] = 2.0;
            optimizer.step(&mut params);
            let current = params.values(id)[0];
            let step = (previous - current).abs();
            assert!(step > last_step, "step {} did not grow past {}", step, last_step);
            last_step = step;
            previous = current;
        }
    }

    #[test]
    fn test_adadelta_skips_frozen_groups() {
        let mut params = single_param(1.0, 2.0, false);
        let id = params.find("w").unwrap();
        let mut optimizer = AdaDelta::new(0.1, 0.95, 1e-6);
        optimizer.step(&mut params);

        assert_eq!(params.values(id)[0], 1.0);
        assert_eq!(params.get(id).grad_sq_avg()[0], 0.0);
        assert_eq!(params.get(id).delta_sq_avg()[0], 0.0);
    }

    #[test]
    fn test_adadelta_reset_clears_accumulators() {
        let mut params = single_param(1.0, 2.0, true);
        let id = params.find("w").unwrap();
        let mut optimizer = AdaDelta::new(0.1, 0.95, 1e-6);
        optimizer.step(&mut params);
        let value_after_step = params.values(id)[0];

        optimizer.reset(&mut params);
        assert_eq!(params.get(id).grad_sq_avg()[0], 0.0);
        assert_eq!(params.get(id).delta_sq_avg()[0], 0.0);
        assert_eq!(params.values(id)[0], value_after_step);
    }

    #[test]
    fn test_adadelta_learning_rate_accessors() {
        let mut optimizer = AdaDelta::new(0.1, 0.95, 1e-6);
        assert_eq!(optimizer.learning_rate(), 0.1);
        optimizer.set_learning_rate(0.5);
        assert_eq!(optimizer.learning_rate(), 0.5);
        assert_eq!(optimizer.rho(), 0.95);
        assert_eq!(optimizer.epsilon(), 1e-6);
    }
}
