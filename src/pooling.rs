//! Order-preserving k-max selection along the last axis.
//!
//! The operator treats its input as a (rows x axis_len) view of an N-d
//! tensor flattened over all leading axes. For every row it keeps the k
//! largest values *in their original left-to-right order*, so a downstream
//! convolution still sees a coherent compressed sequence rather than a
//! magnitude-sorted one. The selected source positions are recorded so the
//! backward pass can scatter gradients to exactly those positions.
//!
//! Ties are broken toward earlier positions: sorting by (value descending,
//! position ascending) and keeping the first k gives the same selection.

/// Forward k-max pooling over the last axis.
///
/// `input` is a flat (rows x axis_len) view; `output` and `indices` are flat
/// (rows x k) buffers. `indices` receives, per row, the selected positions in
/// ascending order; `output` receives the corresponding values.
pub fn kmax_forward(
    input: &[f32],
    axis_len: usize,
    k: usize,
    output: &mut [f32],
    indices: &mut [usize],
) {
    assert!(axis_len > 0, "k-max pooling requires a nonempty axis");
    assert!(
        k >= 1 && k <= axis_len,
        "k-max pooling requires 1 <= k <= axis length (k = {}, axis length = {})",
        k,
        axis_len
    );
    assert_eq!(
        input.len() % axis_len,
        0,
        "input length {} is not a multiple of axis length {}",
        input.len(),
        axis_len
    );
    let rows = input.len() / axis_len;
    assert_eq!(output.len(), rows * k, "output buffer size mismatch");
    assert_eq!(indices.len(), rows * k, "index buffer size mismatch");

    for row in 0..rows {
        let base = row * axis_len;
        let sel = &mut indices[row * k..(row + 1) * k];

        // Running selection of the k largest positions.
        for pos in 0..axis_len {
            if pos < k {
                sel[pos] = pos;
                continue;
            }
            let v = input[base + pos];
            // Weakest current member: smallest value, latest position on ties.
            let mut weakest = 0;
            for s in 1..k {
                let vs = input[base + sel[s]];
                let vw = input[base + sel[weakest]];
                if vs < vw || (vs == vw && sel[s] > sel[weakest]) {
                    weakest = s;
                }
            }
            if v > input[base + sel[weakest]] {
                sel[weakest] = pos;
            }
        }

        // Restore original ordering, then gather the values.
        sel.sort_unstable();
        for (j, &src) in sel.iter().enumerate() {
            output[row * k + j] = input[base + src];
        }
    }
}

/// Backward k-max pooling: scatter the pooled gradient to the selected
/// source positions, zero everywhere else.
///
/// `indices` must be the buffer filled by [`kmax_forward`] for the matching
/// forward pass. `grad_input` is fully overwritten.
pub fn kmax_backward(
    grad_output: &[f32],
    axis_len: usize,
    k: usize,
    indices: &[usize],
    grad_input: &mut [f32],
) {
    assert!(
        k >= 1 && k <= axis_len,
        "k-max pooling requires 1 <= k <= axis length (k = {}, axis length = {})",
        k,
        axis_len
    );
    assert_eq!(
        grad_input.len() % axis_len,
        0,
        "gradient input length {} is not a multiple of axis length {}",
        grad_input.len(),
        axis_len
    );
    let rows = grad_input.len() / axis_len;
    assert_eq!(grad_output.len(), rows * k, "pooled gradient size mismatch");
    assert_eq!(indices.len(), rows * k, "index buffer size mismatch");

    for g in grad_input.iter_mut() {
        *g = 0.0;
    }
    for row in 0..rows {
        let base = row * axis_len;
        for j in 0..k {
            let src = indices[row * k + j];
            debug_assert!(src < axis_len, "pooling index out of range");
            grad_input[base + src] += grad_output[row * k + j];
        }
    }
}
