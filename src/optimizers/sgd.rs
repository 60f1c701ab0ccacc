//! Fixed-learning-rate gradient descent.

use crate::optimizers::Optimizer;
use crate::params::ParamRegistry;

/// Vanilla stochastic gradient descent, `param -= learning_rate * grad`.
///
/// The minimal baseline against the adaptive rule; it reads nothing from the
/// registry's accumulators and leaves them at zero.
pub struct Sgd {
    learning_rate: f32,
}

impl Sgd {
    /// Creates an SGD optimizer with the given step size.
    pub fn new(learning_rate: f32) -> Self {
        assert!(
            learning_rate >= 0.0,
            "learning rate must be non-negative, got {}",
            learning_rate
        );
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut ParamRegistry) {
        for tensor in params.iter_mut() {
            if !tensor.is_trainable() {
                continue;
            }
            let (values, grad, _, _) = tensor.update_buffers();
            for (value, g) in values.iter_mut().zip(grad.iter()) {
                *value -= self.learning_rate * g;
            }
        }
    }

    /// No optimizer state; nothing to clear.
    fn reset(&mut self, _params: &mut ParamRegistry) {}

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }
}
