//! Softmax output layer.

use crate::params::{ParamId, ParamRegistry};
use crate::utils::activations::softmax_rows;
use crate::utils::matrix::{accumulate_row_sums, add_bias, sgemm_wrapper};
use crate::utils::rng::SimpleRng;
use std::cell::RefCell;

/// Affine map to class logits followed by a row softmax.
///
/// Weights are stored (in_features x n_classes) so the forward pass is a
/// single GEMM over the flattened feature maps. Initialization is uniform
/// in [-limit, limit] with limit = sqrt(6 / (in_features + n_classes)).
#[derive(Debug)]
pub struct SoftmaxClassifier {
    in_features: usize,
    n_classes: usize,
    weights: ParamId,
    bias: ParamId,
    delta_buf: RefCell<Vec<f32>>,
}

impl SoftmaxClassifier {
    /// Builds the layer and registers `softmax_W` and `softmax_b`.
    pub fn new(
        params: &mut ParamRegistry,
        rng: &mut SimpleRng,
        in_features: usize,
        n_classes: usize,
        l2: f32,
    ) -> Self {
        assert!(in_features >= 1, "classifier needs at least one input feature");
        assert!(n_classes >= 2, "classifier needs at least two classes");

        let limit = (6.0f32 / (in_features + n_classes) as f32).sqrt();
        let mut weight_values = vec![0.0f32; in_features * n_classes];
        for value in &mut weight_values {
            *value = rng.gen_range_f32(-limit, limit);
        }

        let weights = params.register(
            "softmax_W",
            &[in_features, n_classes],
            weight_values,
            l2,
            true,
        );
        let bias = params.register("softmax_b", &[n_classes], vec![0.0f32; n_classes], 0.0, true);

        Self {
            in_features,
            n_classes,
            weights,
            bias,
            delta_buf: RefCell::new(Vec::new()),
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn weight_id(&self) -> ParamId {
        self.weights
    }

    pub fn bias_id(&self) -> ParamId {
        self.bias
    }

    /// Writes one probability row per instance into `output`.
    pub fn forward(
        &self,
        params: &ParamRegistry,
        input: &[f32],
        output: &mut [f32],
        batch_size: usize,
    ) {
        assert_eq!(
            input.len(),
            batch_size * self.in_features,
            "classifier input length mismatch: expected {}, got {}",
            batch_size * self.in_features,
            input.len()
        );
        assert_eq!(
            output.len(),
            batch_size * self.n_classes,
            "classifier output length mismatch: expected {}, got {}",
            batch_size * self.n_classes,
            output.len()
        );

        sgemm_wrapper(
            batch_size,
            self.n_classes,
            self.in_features,
            input,
            self.in_features,
            params.values(self.weights),
            self.n_classes,
            output,
            self.n_classes,
            false,
            false,
            1.0,
            0.0,
        );
        add_bias(output, batch_size, self.n_classes, params.values(self.bias));
        softmax_rows(output, batch_size, self.n_classes);
    }

    /// Mean negative log-likelihood of the true classes.
    ///
    /// Probabilities are clamped at 1e-9 before the log so an underflowed
    /// softmax row reports a large finite loss instead of infinity.
    pub fn loss(&self, probs: &[f32], labels: &[u8], batch_size: usize) -> f32 {
        assert!(labels.len() >= batch_size, "label buffer shorter than batch");
        let mut total = 0.0f32;
        for (i, &label) in labels.iter().take(batch_size).enumerate() {
            let label = label as usize;
            assert!(
                label < self.n_classes,
                "label {} out of range for {} classes",
                label,
                self.n_classes
            );
            total -= probs[i * self.n_classes + label].max(1e-9).ln();
        }
        total / batch_size as f32
    }

    /// Backward pass from the softmax/NLL pair.
    ///
    /// The combined gradient at the logits is (p - onehot) / batch_size.
    /// Weight and bias gradients accumulate into the registry; `grad_input`
    /// is fully overwritten.
    pub fn backward(
        &self,
        params: &mut ParamRegistry,
        input: &[f32],
        probs: &[f32],
        labels: &[u8],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        assert_eq!(
            grad_input.len(),
            batch_size * self.in_features,
            "classifier input gradient length mismatch: expected {}, got {}",
            batch_size * self.in_features,
            grad_input.len()
        );

        let mut delta = self.delta_buf.borrow_mut();
        delta.resize(batch_size * self.n_classes, 0.0);
        let inv_batch = 1.0 / batch_size as f32;
        for i in 0..batch_size {
            let label = labels[i] as usize;
            for c in 0..self.n_classes {
                let mut d = probs[i * self.n_classes + c];
                if c == label {
                    d -= 1.0;
                }
                delta[i * self.n_classes + c] = d * inv_batch;
            }
        }

        accumulate_row_sums(&delta, batch_size, self.n_classes, params.grad_mut(self.bias));
        {
            let gw = params.grad_mut(self.weights);
            // dW += X^T * delta
            sgemm_wrapper(
                self.in_features,
                self.n_classes,
                batch_size,
                input,
                self.in_features,
                &delta,
                self.n_classes,
                gw,
                self.n_classes,
                true,
                false,
                1.0,
                1.0,
            );
        }
        // dX = delta * W^T
        sgemm_wrapper(
            batch_size,
            self.in_features,
            self.n_classes,
            &delta,
            self.n_classes,
            params.values(self.weights),
            self.n_classes,
            grad_input,
            self.in_features,
            false,
            true,
            1.0,
            0.0,
        );
    }

    /// Class with the highest probability per row; ties go to the lower index.
    pub fn predict(&self, probs: &[f32], batch_size: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(batch_size);
        for row in probs.chunks_exact(self.n_classes).take(batch_size) {
            out.push(argmax(row) as u8);
        }
        out
    }

    /// Number of misclassified instances in the batch.
    pub fn errors(&self, probs: &[f32], labels: &[u8], batch_size: usize) -> usize {
        let mut wrong = 0;
        for (row, &label) in probs
            .chunks_exact(self.n_classes)
            .take(batch_size)
            .zip(labels.iter())
        {
            if argmax(row) != label as usize {
                wrong += 1;
            }
        }
        wrong
    }
}

fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (c, &p) in row.iter().enumerate() {
        if p > row[best] {
            best = c;
        }
    }
    best
}
