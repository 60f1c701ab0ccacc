//! Parameter registry.
//!
//! Every trainable tensor in the network is registered here exactly once, at
//! model construction, together with its gradient buffer, its AdaDelta
//! accumulators, its L2 coefficient, and its trainable flag. Layers hold
//! [`ParamId`] handles instead of owning tensors, and the optimizer receives
//! the registry by mutable reference; parameters and accumulators are never
//! duplicated or reallocated for the lifetime of a run.

use std::error::Error;
use std::io;

/// Handle to one registered parameter tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamId(usize);

/// One named parameter tensor with its training state.
///
/// `grad_sq_avg` and `delta_sq_avg` are the AdaDelta running averages E[g^2]
/// and E[dx^2]; both start at zero and are only ever written by the
/// optimizer. `l2` is this group's weight-decay coefficient (0 disables it);
/// `trainable` gates optimizer updates without stopping gradient flow.
#[derive(Debug)]
pub struct ParamTensor {
    name: String,
    shape: Vec<usize>,
    values: Vec<f32>,
    grad: Vec<f32>,
    grad_sq_avg: Vec<f32>,
    delta_sq_avg: Vec<f32>,
    l2: f32,
    trainable: bool,
}

impl ParamTensor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of scalar elements.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn grad_sq_avg(&self) -> &[f32] {
        &self.grad_sq_avg
    }

    pub fn delta_sq_avg(&self) -> &[f32] {
        &self.delta_sq_avg
    }

    pub fn l2(&self) -> f32 {
        self.l2
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    /// Mean absolute gradient, the per-parameter magnitude diagnostic.
    pub fn grad_abs_mean(&self) -> f32 {
        if self.grad.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.grad.iter().map(|g| g.abs()).sum();
        sum / self.grad.len() as f32
    }

    /// Mean effective AdaDelta step scale, sqrt(E[dx^2]+eps)/sqrt(E[g^2]+eps).
    pub fn step_scale_mean(&self, epsilon: f32) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0f32;
        for (ex, eg) in self.delta_sq_avg.iter().zip(self.grad_sq_avg.iter()) {
            sum += (ex + epsilon).sqrt() / (eg + epsilon).sqrt();
        }
        sum / self.values.len() as f32
    }

    /// Split borrow for the optimizer: (values, grad, E[g^2], E[dx^2]).
    pub(crate) fn update_buffers(&mut self) -> (&mut [f32], &[f32], &mut [f32], &mut [f32]) {
        (
            &mut self.values,
            &self.grad,
            &mut self.grad_sq_avg,
            &mut self.delta_sq_avg,
        )
    }
}

/// The set of all parameter tensors, in registration order.
#[derive(Debug, Default)]
pub struct ParamRegistry {
    tensors: Vec<ParamTensor>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self {
            tensors: Vec::new(),
        }
    }

    /// Registers a tensor and returns its handle.
    ///
    /// The gradient buffer and both accumulators are allocated zeroed with
    /// the same element count as `values`. Names must be unique; the element
    /// count must match the product of `shape`.
    pub fn register(
        &mut self,
        name: &str,
        shape: &[usize],
        values: Vec<f32>,
        l2: f32,
        trainable: bool,
    ) -> ParamId {
        let expected: usize = shape.iter().product();
        assert_eq!(
            values.len(),
            expected,
            "parameter '{}': {} values do not fill shape {:?}",
            name,
            values.len(),
            shape
        );
        assert!(
            self.find(name).is_none(),
            "parameter '{}' registered twice",
            name
        );
        let n = values.len();
        self.tensors.push(ParamTensor {
            name: name.to_string(),
            shape: shape.to_vec(),
            values,
            grad: vec![0.0; n],
            grad_sq_avg: vec![0.0; n],
            delta_sq_avg: vec![0.0; n],
            l2,
            trainable,
        });
        ParamId(self.tensors.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<ParamId> {
        self.tensors
            .iter()
            .position(|t| t.name == name)
            .map(ParamId)
    }

    pub fn get(&self, id: ParamId) -> &ParamTensor {
        &self.tensors[id.0]
    }

    pub fn values(&self, id: ParamId) -> &[f32] {
        &self.tensors[id.0].values
    }

    pub fn values_mut(&mut self, id: ParamId) -> &mut [f32] {
        &mut self.tensors[id.0].values
    }

    pub fn grad(&self, id: ParamId) -> &[f32] {
        &self.tensors[id.0].grad
    }

    pub fn grad_mut(&mut self, id: ParamId) -> &mut [f32] {
        &mut self.tensors[id.0].grad
    }

    /// Simultaneous read of values and write of the gradient for one tensor,
    /// the borrow shape every layer backward pass needs.
    pub fn values_and_grad_mut(&mut self, id: ParamId) -> (&[f32], &mut [f32]) {
        let t = &mut self.tensors[id.0];
        (&t.values, &mut t.grad)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamTensor> {
        self.tensors.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ParamTensor> {
        self.tensors.iter_mut()
    }

    /// Clears every gradient buffer; called once per minibatch before the
    /// backward pass accumulates into them.
    pub fn zero_grads(&mut self) {
        for t in &mut self.tensors {
            for g in &mut t.grad {
                *g = 0.0;
            }
        }
    }

    /// The weighted L2 penalty, sum over groups of l2 * sum(w^2).
    pub fn l2_penalty(&self) -> f32 {
        let mut total = 0.0f32;
        for t in &self.tensors {
            if t.l2 == 0.0 {
                continue;
            }
            let sq: f32 = t.values.iter().map(|v| v * v).sum();
            total += t.l2 * sq;
        }
        total
    }

    /// Adds the penalty gradient 2 * l2 * w to each regularized group.
    pub fn add_l2_gradients(&mut self) {
        for t in &mut self.tensors {
            if t.l2 == 0.0 {
                continue;
            }
            let coeff = 2.0 * t.l2;
            for (g, v) in t.grad.iter_mut().zip(t.values.iter()) {
                *g += coeff * v;
            }
        }
    }

    /// Fails if any gradient entry is NaN or infinite, naming the tensor.
    ///
    /// Run after the backward pass and before the optimizer step so a
    /// corrupted minibatch can never contaminate the accumulators.
    pub fn check_finite_grads(&self) -> Result<(), Box<dyn Error>> {
        for t in &self.tensors {
            if t.grad.iter().any(|g| !g.is_finite()) {
                return Err(Box::new(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non-finite gradient in parameter '{}'", t.name),
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tensor_registry() -> (ParamRegistry, ParamId, ParamId) {
        let mut reg = ParamRegistry::new();
        let w = reg.register("w", &[2, 2], vec![1.0, -2.0, 3.0, -4.0], 0.01, true);
        let b = reg.register("b", &[2], vec![0.5, 0.5], 0.0, true);
        (reg, w, b)
    }

    #[test]
    fn register_and_look_up() {
        let (reg, w, b) = two_tensor_registry();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.find("w"), Some(w));
        assert_eq!(reg.find("b"), Some(b));
        assert_eq!(reg.find("missing"), None);
        assert_eq!(reg.get(w).shape(), &[2, 2]);
        assert_eq!(reg.get(w).len(), 4);
        assert!(reg.get(b).grad_sq_avg().iter().all(|&v| v == 0.0));
        assert!(reg.get(b).delta_sq_avg().iter().all(|&v| v == 0.0));
    }

    #[test]
    #[should_panic(expected = "do not fill shape")]
    fn register_rejects_shape_mismatch() {
        let mut reg = ParamRegistry::new();
        reg.register("w", &[3, 3], vec![0.0; 4], 0.0, true);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn register_rejects_duplicate_names() {
        let mut reg = ParamRegistry::new();
        reg.register("w", &[1], vec![0.0], 0.0, true);
        reg.register("w", &[1], vec![0.0], 0.0, true);
    }

    #[test]
    fn zero_grads_clears_every_buffer() {
        let (mut reg, w, b) = two_tensor_registry();
        reg.grad_mut(w).copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        reg.grad_mut(b).copy_from_slice(&[2.0, 2.0]);
        reg.zero_grads();
        assert!(reg.grad(w).iter().all(|&g| g == 0.0));
        assert!(reg.grad(b).iter().all(|&g| g == 0.0));
    }

    #[test]
    fn l2_penalty_and_gradient_match_hand_computation() {
        let (mut reg, w, b) = two_tensor_registry();
        // 0.01 * (1 + 4 + 9 + 16) = 0.3; the bias group is unregularized.
        assert!((reg.l2_penalty() - 0.3).abs() < 1e-6);

        reg.add_l2_gradients();
        let gw = reg.grad(w);
        assert!((gw[0] - 0.02).abs() < 1e-7);
        assert!((gw[1] + 0.04).abs() < 1e-7);
        assert!((gw[3] + 0.08).abs() < 1e-7);
        assert!(reg.grad(b).iter().all(|&g| g == 0.0));
    }

    #[test]
    fn finite_check_names_the_offending_tensor() {
        let (mut reg, _w, b) = two_tensor_registry();
        assert!(reg.check_finite_grads().is_ok());

        reg.grad_mut(b)[1] = f32::NAN;
        let err = reg.check_finite_grads().unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn grad_abs_mean_averages_magnitudes() {
        let (mut reg, w, _b) = two_tensor_registry();
        reg.grad_mut(w).copy_from_slice(&[1.0, -3.0, 0.0, 4.0]);
        assert!((reg.get(w).grad_abs_mean() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn step_scale_is_one_at_zero_accumulators() {
        let (reg, w, _b) = two_tensor_registry();
        // sqrt(eps)/sqrt(eps) = 1 elementwise before any update.
        let scale = reg.get(w).step_scale_mean(1e-6);
        assert!((scale - 1.0).abs() < 1e-5);
    }

    #[test]
    fn split_borrow_reads_values_while_writing_grad() {
        let (mut reg, w, _b) = two_tensor_registry();
        let (values, grad) = reg.values_and_grad_mut(w);
        for (g, v) in grad.iter_mut().zip(values.iter()) {
            *g = 2.0 * v;
        }
        assert_eq!(reg.grad(w), &[2.0, -4.0, 6.0, -8.0]);
    }
}
