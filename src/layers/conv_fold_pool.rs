//! Convolution, folding and k-max pooling layer.
//!
//! One trainable stage of the sentence model: a wide (zero-padded)
//! convolution against a learned filter bank, pairwise averaging of adjacent
//! rows along the embedding axis, k-max pooling along the sequence axis with
//! original order preserved, then a broadcast bias add and a rectifier.

use crate::params::{ParamId, ParamRegistry};
use crate::pooling;
use crate::utils::activations::{relu_inplace, relu_mask_grad};
use crate::utils::rng::SimpleRng;
use std::cell::RefCell;
use std::error::Error;
use std::io;

/// Wide convolution + fold + k-max pooling + bias/ReLU.
///
/// Input is a flat (batch, in_maps, in_rows, in_cols) tensor; output is
/// (batch, num_filters, in_rows'/2, k) where in_rows' = in_rows + filter_h - 1.
/// The convolution is a cross-correlation over an input zero-padded by
/// filter length - 1 on each side, so every axis *grows* by filter length - 1.
///
/// # Fields
///
/// * `in_maps` - Number of input feature maps
/// * `num_filters` - Number of filters (output feature maps)
/// * `filter_h`, `filter_w` - Filter extent along the embedding and sequence axes
/// * `in_rows`, `in_cols` - Per-map input extent
/// * `k` - Pooling size along the sequence axis, fixed at construction
/// * `weights`, `bias` - Registry handles for the filter bank and bias vector
#[derive(Debug)]
pub struct ConvFoldPoolLayer {
    in_maps: usize,
    num_filters: usize,
    filter_h: usize,
    filter_w: usize,
    in_rows: usize,
    in_cols: usize,
    k: usize,
    weights: ParamId,
    bias: ParamId,
    // Selected pooling positions from the last forward pass.
    pool_idx: RefCell<Vec<usize>>,
    // Scratch for the forward intermediates and backward gradients.
    conv_buf: RefCell<Vec<f32>>,
    fold_buf: RefCell<Vec<f32>>,
    gpool_buf: RefCell<Vec<f32>>,
    gfold_buf: RefCell<Vec<f32>>,
    gconv_buf: RefCell<Vec<f32>>,
}

impl ConvFoldPoolLayer {
    /// Builds the layer and registers `{name}_W` and `{name}_b`.
    ///
    /// Filter weights are drawn uniformly from [-bound, bound] with
    /// bound = sqrt(6 / (fan_in + fan_out)), fan_in = in_maps * filter_h *
    /// filter_w and fan_out = num_filters * filter_h * filter_w / k; tying
    /// fan_out to the pooling size shrinks the init for weakly-pooled
    /// layers. The bias starts at zero and is not L2-regularized.
    ///
    /// Fails when the post-convolution row count is odd (folding needs
    /// pairs) or when k does not fit the convolved sequence length.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: &mut ParamRegistry,
        rng: &mut SimpleRng,
        name: &str,
        in_maps: usize,
        in_rows: usize,
        in_cols: usize,
        num_filters: usize,
        filter_h: usize,
        filter_w: usize,
        k: usize,
        l2: f32,
    ) -> Result<Self, Box<dyn Error>> {
        if in_maps == 0 || num_filters == 0 || filter_h == 0 || filter_w == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("layer '{}': map and filter counts must be positive", name),
            )));
        }
        if in_rows == 0 || in_cols == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("layer '{}': input extent must be positive", name),
            )));
        }
        let conv_rows = in_rows + filter_h - 1;
        let conv_cols = in_cols + filter_w - 1;
        if conv_rows % 2 != 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "layer '{}': folding needs an even row count after convolution, got {}",
                    name, conv_rows
                ),
            )));
        }
        if k < 1 || k > conv_cols {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "layer '{}': pooling size k = {} must lie in [1, {}] (convolved sequence length)",
                    name, k, conv_cols
                ),
            )));
        }

        let fan_in = (in_maps * filter_h * filter_w) as f32;
        let fan_out = (num_filters * filter_h * filter_w) as f32 / k as f32;
        let bound = (6.0f32 / (fan_in + fan_out)).sqrt();

        let weight_count = num_filters * in_maps * filter_h * filter_w;
        let mut weight_values = vec![0.0f32; weight_count];
        for value in &mut weight_values {
            *value = rng.gen_range_f32(-bound, bound);
        }

        let weights = params.register(
            &format!("{}_W", name),
            &[num_filters, in_maps, filter_h, filter_w],
            weight_values,
            l2,
            true,
        );
        let bias = params.register(
            &format!("{}_b", name),
            &[num_filters],
            vec![0.0f32; num_filters],
            0.0,
            true,
        );

        Ok(Self {
            in_maps,
            num_filters,
            filter_h,
            filter_w,
            in_rows,
            in_cols,
            k,
            weights,
            bias,
            pool_idx: RefCell::new(Vec::new()),
            conv_buf: RefCell::new(Vec::new()),
            fold_buf: RefCell::new(Vec::new()),
            gpool_buf: RefCell::new(Vec::new()),
            gfold_buf: RefCell::new(Vec::new()),
            gconv_buf: RefCell::new(Vec::new()),
        })
    }

    pub fn in_maps(&self) -> usize {
        self.in_maps
    }

    pub fn num_filters(&self) -> usize {
        self.num_filters
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Row count after convolution, before folding.
    pub fn conv_rows(&self) -> usize {
        self.in_rows + self.filter_h - 1
    }

    /// Sequence length after convolution, before pooling.
    pub fn conv_cols(&self) -> usize {
        self.in_cols + self.filter_w - 1
    }

    /// Row count of the output maps (post-fold).
    pub fn output_rows(&self) -> usize {
        self.conv_rows() / 2
    }

    /// Per-instance input element count.
    pub fn input_size(&self) -> usize {
        self.in_maps * self.in_rows * self.in_cols
    }

    /// Per-instance output element count.
    pub fn output_size(&self) -> usize {
        self.num_filters * self.output_rows() * self.k
    }

    pub fn weight_id(&self) -> ParamId {
        self.weights
    }

    pub fn bias_id(&self) -> ParamId {
        self.bias
    }

    /// Forward pass: wide convolution, fold, k-max pool, bias, ReLU.
    ///
    /// Pooling indices are cached for the backward pass.
    pub fn forward(
        &self,
        params: &ParamRegistry,
        input: &[f32],
        output: &mut [f32],
        batch_size: usize,
    ) {
        assert_eq!(
            input.len(),
            batch_size * self.input_size(),
            "conv-fold-pool input length mismatch: expected {}, got {}",
            batch_size * self.input_size(),
            input.len()
        );
        assert_eq!(
            output.len(),
            batch_size * self.output_size(),
            "conv-fold-pool output length mismatch: expected {}, got {}",
            batch_size * self.output_size(),
            output.len()
        );

        let conv_rows = self.conv_rows();
        let conv_cols = self.conv_cols();
        let out_rows = self.output_rows();
        let pad_h = self.filter_h - 1;
        let pad_w = self.filter_w - 1;

        let mut conv = self.conv_buf.borrow_mut();
        let mut fold = self.fold_buf.borrow_mut();
        let mut pool_idx = self.pool_idx.borrow_mut();
        conv.resize(batch_size * self.num_filters * conv_rows * conv_cols, 0.0);
        fold.resize(batch_size * self.num_filters * out_rows * conv_cols, 0.0);
        pool_idx.resize(batch_size * self.num_filters * out_rows * self.k, 0);

        // Wide convolution: the input is implicitly zero-padded by
        // filter length - 1 on each side of both spatial axes.
        let weights = params.values(self.weights);
        for b in 0..batch_size {
            for f in 0..self.num_filters {
                for r in 0..conv_rows {
                    for c in 0..conv_cols {
                        let mut sum = 0.0f32;
                        for m in 0..self.in_maps {
                            for i in 0..self.filter_h {
                                let ir = r + i;
                                if ir < pad_h || ir - pad_h >= self.in_rows {
                                    continue;
                                }
                                let ir = ir - pad_h;
                                for j in 0..self.filter_w {
                                    let ic = c + j;
                                    if ic < pad_w || ic - pad_w >= self.in_cols {
                                        continue;
                                    }
                                    let ic = ic - pad_w;
                                    sum += input
                                        [((b * self.in_maps + m) * self.in_rows + ir)
                                            * self.in_cols
                                            + ic]
                                        * weights[((f * self.in_maps + m) * self.filter_h + i)
                                            * self.filter_w
                                            + j];
                                }
                            }
                        }
                        conv[((b * self.num_filters + f) * conv_rows + r) * conv_cols + c] = sum;
                    }
                }
            }
        }

        // Fold: average adjacent row pairs, halving the embedding axis.
        let maps = batch_size * self.num_filters;
        for bf in 0..maps {
            for r in 0..out_rows {
                for c in 0..conv_cols {
                    let top = conv[(bf * conv_rows + 2 * r) * conv_cols + c];
                    let bottom = conv[(bf * conv_rows + 2 * r + 1) * conv_cols + c];
                    fold[(bf * out_rows + r) * conv_cols + c] = 0.5 * (top + bottom);
                }
            }
        }

        // K-max pooling along the sequence axis, order preserved.
        pooling::kmax_forward(&fold, conv_cols, self.k, output, &mut pool_idx);

        // Bias broadcast over batch, rows and pooled columns, then ReLU.
        let bias = params.values(self.bias);
        for b in 0..batch_size {
            for f in 0..self.num_filters {
                let bf_bias = bias[f];
                let base = (b * self.num_filters + f) * out_rows * self.k;
                for x in &mut output[base..base + out_rows * self.k] {
                    *x += bf_bias;
                }
            }
        }
        relu_inplace(output);
    }

    /// Backward pass.
    ///
    /// `input` and `output` must be the buffers of the matching forward
    /// call. Filter and bias gradients accumulate into the registry;
    /// `grad_input` is fully overwritten.
    pub fn backward(
        &self,
        params: &mut ParamRegistry,
        input: &[f32],
        output: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        assert_eq!(
            grad_output.len(),
            batch_size * self.output_size(),
            "conv-fold-pool output gradient length mismatch: expected {}, got {}",
            batch_size * self.output_size(),
            grad_output.len()
        );
        assert_eq!(
            grad_input.len(),
            batch_size * self.input_size(),
            "conv-fold-pool input gradient length mismatch: expected {}, got {}",
            batch_size * self.input_size(),
            grad_input.len()
        );
        assert_eq!(output.len(), grad_output.len(), "output buffer length mismatch");

        let conv_rows = self.conv_rows();
        let conv_cols = self.conv_cols();
        let out_rows = self.output_rows();
        let pad_h = self.filter_h - 1;
        let pad_w = self.filter_w - 1;

        let mut gpool = self.gpool_buf.borrow_mut();
        let mut gfold = self.gfold_buf.borrow_mut();
        let mut gconv = self.gconv_buf.borrow_mut();
        gpool.resize(grad_output.len(), 0.0);
        gfold.resize(batch_size * self.num_filters * out_rows * conv_cols, 0.0);
        gconv.resize(batch_size * self.num_filters * conv_rows * conv_cols, 0.0);

        // ReLU: no gradient through inactive units. The bias sits inside the
        // rectifier, so its gradient uses the masked values.
        gpool.copy_from_slice(grad_output);
        relu_mask_grad(output, &mut gpool);

        {
            let gb = params.grad_mut(self.bias);
            for b in 0..batch_size {
                for f in 0..self.num_filters {
                    let base = (b * self.num_filters + f) * out_rows * self.k;
                    let mut sum = 0.0f32;
                    for &g in &gpool[base..base + out_rows * self.k] {
                        sum += g;
                    }
                    gb[f] += sum;
                }
            }
        }

        // Route the pooled gradient back to the selected positions.
        let pool_idx = self.pool_idx.borrow();
        pooling::kmax_backward(&gpool, conv_cols, self.k, &pool_idx, &mut gfold);

        // Fold: each averaged row feeds half its gradient to both parents.
        let maps = batch_size * self.num_filters;
        for bf in 0..maps {
            for r in 0..out_rows {
                for c in 0..conv_cols {
                    let g = 0.5 * gfold[(bf * out_rows + r) * conv_cols + c];
                    gconv[(bf * conv_rows + 2 * r) * conv_cols + c] = g;
                    gconv[(bf * conv_rows + 2 * r + 1) * conv_cols + c] = g;
                }
            }
        }

        // Convolution: accumulate the filter gradient and build the input
        // gradient in one sweep over the output positions.
        for g in grad_input.iter_mut() {
            *g = 0.0;
        }
        let (weights, gw) = params.values_and_grad_mut(self.weights);
        for b in 0..batch_size {
            for f in 0..self.num_filters {
                for r in 0..conv_rows {
                    for c in 0..conv_cols {
                        let g =
                            gconv[((b * self.num_filters + f) * conv_rows + r) * conv_cols + c];
                        if g == 0.0 {
                            continue;
                        }
                        for m in 0..self.in_maps {
                            for i in 0..self.filter_h {
                                let ir = r + i;
                                if ir < pad_h || ir - pad_h >= self.in_rows {
                                    continue;
                                }
                                let ir = ir - pad_h;
                                for j in 0..self.filter_w {
                                    let ic = c + j;
                                    if ic < pad_w || ic - pad_w >= self.in_cols {
                                        continue;
                                    }
                                    let ic = ic - pad_w;
                                    let iidx = ((b * self.in_maps + m) * self.in_rows + ir)
                                        * self.in_cols
                                        + ic;
                                    let widx = ((f * self.in_maps + m) * self.filter_h + i)
                                        * self.filter_w
                                        + j;
                                    gw[widx] += g * input[iidx];
                                    grad_input[iidx] += g * weights[widx];
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_odd_fold_height() {
        let mut params = ParamRegistry::new();
        let mut rng = SimpleRng::new(42);
        // 3 input rows with filter_h = 1 leave 3 rows to fold.
        let err = ConvFoldPoolLayer::new(&mut params, &mut rng, "conv", 1, 3, 4, 2, 1, 2, 2, 0.0)
            .unwrap_err();
        assert!(err.to_string().contains("even row count"));
    }

    #[test]
    fn rejects_oversized_k() {
        let mut params = ParamRegistry::new();
        let mut rng = SimpleRng::new(42);
        // Convolved length is 4 + 2 - 1 = 5; k = 6 cannot fit.
        let err = ConvFoldPoolLayer::new(&mut params, &mut rng, "conv", 1, 2, 4, 2, 1, 2, 6, 0.0)
            .unwrap_err();
        assert!(err.to_string().contains("pooling size"));
    }

    #[test]
    fn init_respects_pooling_coupled_glorot_bound() {
        let mut params = ParamRegistry::new();
        let mut rng = SimpleRng::new(42);
        let layer =
            ConvFoldPoolLayer::new(&mut params, &mut rng, "conv", 2, 4, 6, 3, 1, 3, 4, 3e-4)
                .unwrap();

        let fan_in = (2 * 1 * 3) as f32;
        let fan_out = (3 * 1 * 3) as f32 / 4.0;
        let bound = (6.0f32 / (fan_in + fan_out)).sqrt();
        for &w in params.values(layer.weight_id()) {
            assert!(w >= -bound && w <= bound, "weight {} outside [{}, {}]", w, -bound, bound);
        }
        assert!(params.values(layer.bias_id()).iter().all(|&b| b == 0.0));
        assert_eq!(params.get(layer.weight_id()).shape(), &[3, 2, 1, 3]);
    }

    #[test]
    fn deterministic_init_for_equal_seeds() {
        let build = || {
            let mut params = ParamRegistry::new();
            let mut rng = SimpleRng::new(999);
            let layer =
                ConvFoldPoolLayer::new(&mut params, &mut rng, "conv", 1, 4, 5, 2, 1, 3, 3, 0.0)
                    .unwrap();
            params.values(layer.weight_id()).to_vec()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn forward_matches_hand_computation() {
        let mut params = ParamRegistry::new();
        let mut rng = SimpleRng::new(42);
        // 2x2 input, one 1x2 filter, k spans the whole convolved length.
        let layer =
            ConvFoldPoolLayer::new(&mut params, &mut rng, "conv", 1, 2, 2, 1, 1, 2, 3, 0.0)
                .unwrap();
        params.values_mut(layer.weight_id()).copy_from_slice(&[1.0, 2.0]);
        params.values_mut(layer.bias_id()).copy_from_slice(&[0.5]);

        let input = vec![1.0, 2.0, 3.0, 4.0];
        let mut output = vec![0.0; layer.output_size()];
        layer.forward(&params, &input, &mut output, 1);

        // conv rows: [2, 5, 2] and [6, 11, 4]; fold: [4, 8, 3]; + bias 0.5.
        assert_eq!(output, vec![4.5, 8.5, 3.5]);
    }

    #[test]
    fn rectifier_clamps_negative_responses() {
        let mut params = ParamRegistry::new();
        let mut rng = SimpleRng::new(42);
        let layer =
            ConvFoldPoolLayer::new(&mut params, &mut rng, "conv", 1, 2, 2, 1, 1, 2, 3, 0.0)
                .unwrap();
        params.values_mut(layer.weight_id()).copy_from_slice(&[-1.0, -1.0]);

        let input = vec![1.0, 2.0, 3.0, 4.0];
        let mut output = vec![0.0; layer.output_size()];
        layer.forward(&params, &input, &mut output, 1);
        assert!(output.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn backward_routes_through_pooling_and_fold() {
        let mut params = ParamRegistry::new();
        let mut rng = SimpleRng::new(42);
        // Identity convolution (single 1x1 weight of 1.0) isolates the
        // fold/pool routing: fold averages the two rows, k-max keeps 2 of 4.
        let layer =
            ConvFoldPoolLayer::new(&mut params, &mut rng, "conv", 1, 2, 4, 1, 1, 1, 2, 0.0)
                .unwrap();
        params.values_mut(layer.weight_id()).copy_from_slice(&[1.0]);

        let input = vec![
            1.0, 5.0, 2.0, 4.0, // row 0
            3.0, 1.0, 2.0, 0.0, // row 1
        ];
        let mut output = vec![0.0; layer.output_size()];
        layer.forward(&params, &input, &mut output, 1);
        // fold = [2, 3, 2, 2]; top-2 in order = positions 0 and 1.
        assert_eq!(output, vec![2.0, 3.0]);

        let grad_output = vec![1.0, 1.0];
        let mut grad_input = vec![0.0; 8];
        layer.backward(&mut params, &input, &output, &grad_output, &mut grad_input, 1);

        assert_eq!(
            grad_input,
            vec![0.5, 0.5, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0]
        );
        assert_eq!(params.grad(layer.weight_id()), &[5.0]);
        assert_eq!(params.grad(layer.bias_id()), &[2.0]);
    }

    #[test]
    fn output_size_tracks_geometry() {
        let mut params = ParamRegistry::new();
        let mut rng = SimpleRng::new(42);
        let layer =
            ConvFoldPoolLayer::new(&mut params, &mut rng, "conv", 1, 48, 7, 6, 1, 10, 5, 0.0)
                .unwrap();
        assert_eq!(layer.conv_rows(), 48);
        assert_eq!(layer.conv_cols(), 16);
        assert_eq!(layer.output_rows(), 24);
        assert_eq!(layer.output_size(), 6 * 24 * 5);
    }
}
