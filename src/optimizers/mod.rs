//! Optimizers over the parameter registry.
//!
//! An optimizer walks the registry once per minibatch and applies its update
//! rule to every trainable tensor. Frozen tensors (`trainable = false`) are
//! skipped even though the backward pass still fills their gradients, which
//! is how delayed embedding learning is expressed. AdaDelta's running
//! averages live inside the registry entries, so optimizer values themselves
//! hold only hyperparameters.

pub mod adadelta;
pub mod sgd;

pub use adadelta::AdaDelta;
pub use sgd::Sgd;

use crate::config::{OptimizerKind, TrainConfig};
use crate::params::ParamRegistry;

/// Uniform interface over the parameter update rules.
pub trait Optimizer {
    /// Applies one update step to every trainable tensor in the registry.
    ///
    /// Gradients must already be accumulated (including any L2 terms); the
    /// step never touches the gradient buffers themselves.
    fn step(&mut self, params: &mut ParamRegistry);

    /// Clears any optimizer state stored in the registry.
    ///
    /// Meant for starting a fresh run on the same model. A run in progress
    /// never resets; the accumulators are part of the trajectory.
    fn reset(&mut self, params: &mut ParamRegistry);

    /// Base learning rate. Adaptive rules may not consume it directly.
    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, lr: f32);
}

/// Builds the optimizer selected by the training configuration.
pub fn from_config(cfg: &TrainConfig) -> Box<dyn Optimizer> {
    match cfg.optimizer {
        OptimizerKind::AdaDelta => {
            Box::new(AdaDelta::new(cfg.learning_rate, cfg.rho, cfg.epsilon))
        }
        OptimizerKind::Sgd => Box::new(Sgd::new(cfg.learning_rate)),
    }
}
