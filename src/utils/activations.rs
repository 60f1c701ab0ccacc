//! Activation functions.
//!
//! The pipeline uses exactly two nonlinearities: a rectifier after each
//! pooled convolution stage and a row-wise softmax at the classifier.

/// ReLU applied in-place: negative values become 0.0, the rest pass through.
pub fn relu_inplace(data: &mut [f32]) {
    for value in data.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }
}

/// Masks a gradient by the rectifier's derivative, read off the activations.
///
/// `activations` must hold post-ReLU values; wherever an activation is not
/// strictly positive the corresponding gradient entry is zeroed. The
/// derivative at exactly zero input is defined as 0.
pub fn relu_mask_grad(activations: &[f32], grad: &mut [f32]) {
    assert_eq!(
        activations.len(),
        grad.len(),
        "activation/gradient length mismatch in relu_mask_grad"
    );
    for (g, &a) in grad.iter_mut().zip(activations.iter()) {
        if a <= 0.0 {
            *g = 0.0;
        }
    }
}

/// Row-wise softmax in place, with max subtraction for numerical stability.
///
/// # Arguments
/// * `outputs` - Flat row-major matrix data
/// * `rows` - Number of rows
/// * `cols` - Number of columns
pub fn softmax_rows(outputs: &mut [f32], rows: usize, cols: usize) {
    if cols == 0 {
        return;
    }
    assert_eq!(
        outputs.len(),
        rows * cols,
        "outputs length mismatch in softmax_rows"
    );

    for row in outputs.chunks_exact_mut(cols).take(rows) {
        let mut max_value = row[0];
        for &value in row.iter().skip(1) {
            if value > max_value {
                max_value = value;
            }
        }

        let mut sum = 0.0f32;
        for value in row.iter_mut() {
            *value = (*value - max_value).exp();
            sum += *value;
        }

        let inv_sum = 1.0f32 / sum;
        for value in row.iter_mut() {
            *value *= inv_sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON_F32: f32 = 1e-6;

    #[test]
    fn relu_zeroes_negatives_only() {
        let mut data = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        relu_inplace(&mut data);
        assert_eq!(data, vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn relu_mask_routes_gradient_through_active_units() {
        let acts = vec![0.0, 3.0, 0.0, 0.5];
        let mut grad = vec![1.0, 1.0, 1.0, 1.0];
        relu_mask_grad(&acts, &mut grad);
        assert_eq!(grad, vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn relu_gradient_at_zero_is_zero() {
        // An activation of exactly zero means the pre-activation was <= 0;
        // the adopted convention sends no gradient through.
        let acts = vec![0.0];
        let mut grad = vec![7.0];
        relu_mask_grad(&acts, &mut grad);
        assert_eq!(grad, vec![0.0]);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let mut data = vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0];
        softmax_rows(&mut data, 2, 3);
        for row in data.chunks_exact(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < EPSILON_F32);
        }
    }

    #[test]
    fn softmax_uniform_input_gives_uniform_probabilities() {
        let mut data = vec![0.5, 0.5, 0.5, 0.5];
        softmax_rows(&mut data, 1, 4);
        for &v in &data {
            assert!((v - 0.25).abs() < EPSILON_F32);
        }
    }

    #[test]
    fn softmax_survives_large_logits() {
        let mut data = vec![1000.0, 1001.0, 1002.0];
        softmax_rows(&mut data, 1, 3);
        let sum: f32 = data.iter().sum();
        assert!((sum - 1.0).abs() < EPSILON_F32);
        assert!(data.iter().all(|v| v.is_finite()));
    }
}
