//! Dropout layer.
//!
//! Applied at three points in the pipeline: on the embedded sentence matrix
//! and after each conv-fold-pool stage. During training each element is
//! dropped independently with probability `drop_rate` and survivors are
//! scaled by 1/(1-drop_rate) so expected activation magnitude is preserved;
//! during inference the input passes through unchanged.

use crate::utils::rng::SimpleRng;
use std::cell::RefCell;

/// Elementwise stochastic masking with a train/inference toggle.
///
/// The layer has no trainable parameters and no fixed size; it masks
/// whatever buffer it is given. The mask from the last training-mode forward
/// pass is cached for the backward pass. Each instance owns a child RNG
/// forked from the root generator at construction, so masks are reproducible
/// for a fixed seed and draw order.
#[derive(Debug)]
pub struct DropoutLayer {
    drop_rate: f32,
    training: bool,
    mask: RefCell<Vec<f32>>,
    rng: RefCell<SimpleRng>,
}

impl DropoutLayer {
    /// Creates a dropout layer, forking a child generator from `rng`.
    ///
    /// Starts in training mode. `drop_rate` must lie in [0.0, 1.0).
    pub fn new(drop_rate: f32, rng: &mut SimpleRng) -> Self {
        assert!(
            (0.0..1.0).contains(&drop_rate),
            "drop_rate must be in range [0.0, 1.0)"
        );
        Self {
            drop_rate,
            training: true,
            mask: RefCell::new(Vec::new()),
            rng: RefCell::new(rng.fork()),
        }
    }

    /// Switches between training (masking) and inference (pass-through).
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn drop_rate(&self) -> f32 {
        self.drop_rate
    }

    /// Forward pass. In training mode draws a fresh mask; the kept units are
    /// scaled by 1/(1-drop_rate).
    pub fn forward(&self, input: &[f32], output: &mut [f32]) {
        assert_eq!(
            input.len(),
            output.len(),
            "dropout input/output length mismatch: {} vs {}",
            input.len(),
            output.len()
        );

        if !self.training {
            output.copy_from_slice(input);
            return;
        }

        let scale = 1.0 / (1.0 - self.drop_rate);
        let mut mask = self.mask.borrow_mut();
        let mut rng = self.rng.borrow_mut();
        if mask.len() != input.len() {
            mask.resize(input.len(), 0.0);
        }

        for i in 0..input.len() {
            if rng.next_f32() < self.drop_rate {
                mask[i] = 0.0;
                output[i] = 0.0;
            } else {
                mask[i] = 1.0;
                output[i] = input[i] * scale;
            }
        }
    }

    /// Backward pass: applies the cached mask and scale to the gradient.
    ///
    /// Must follow a forward pass over a buffer of the same length.
    pub fn backward(&self, grad_output: &[f32], grad_input: &mut [f32]) {
        assert_eq!(
            grad_output.len(),
            grad_input.len(),
            "dropout gradient length mismatch: {} vs {}",
            grad_output.len(),
            grad_input.len()
        );

        if !self.training {
            grad_input.copy_from_slice(grad_output);
            return;
        }

        let mask = self.mask.borrow();
        assert_eq!(
            mask.len(),
            grad_output.len(),
            "dropout backward called without a matching forward pass"
        );
        let scale = 1.0 / (1.0 - self.drop_rate);
        for i in 0..grad_output.len() {
            grad_input[i] = grad_output[i] * mask[i] * scale;
        }
    }
}
