//! Row-major matrix helpers over the BLAS backend.

use cblas::{sgemm, Layout, Transpose};

/// Row-major single-precision GEMM: C = alpha * op(A) * op(B) + beta * C.
///
/// `m`, `n`, `k` are the dimensions after transposition: op(A) is m x k,
/// op(B) is k x n, C is m x n. Leading dimensions are those of the stored
/// (untransposed) matrices.
#[allow(clippy::too_many_arguments)]
pub fn sgemm_wrapper(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    c: &mut [f32],
    ldc: usize,
    transpose_a: bool,
    transpose_b: bool,
    alpha: f32,
    beta: f32,
) {
    let trans_a = if transpose_a {
        Transpose::Ordinary
    } else {
        Transpose::None
    };
    let trans_b = if transpose_b {
        Transpose::Ordinary
    } else {
        Transpose::None
    };

    unsafe {
        sgemm(
            Layout::RowMajor,
            trans_a,
            trans_b,
            m as i32,
            n as i32,
            k as i32,
            alpha,
            a,
            lda as i32,
            b,
            ldb as i32,
            beta,
            c,
            ldc as i32,
        );
    }
}

/// Adds a bias vector to each row of a row-major matrix.
pub fn add_bias(data: &mut [f32], rows: usize, cols: usize, bias: &[f32]) {
    assert_eq!(bias.len(), cols, "bias length mismatch in add_bias");
    for row in data.chunks_exact_mut(cols).take(rows) {
        for (value, b) in row.iter_mut().zip(bias) {
            *value += *b;
        }
    }
}

/// Accumulates column sums of a row-major matrix into `out` (`out += sums`).
pub fn accumulate_row_sums(data: &[f32], rows: usize, cols: usize, out: &mut [f32]) {
    assert_eq!(out.len(), cols, "output length mismatch in accumulate_row_sums");
    for row in data.chunks_exact(cols).take(rows) {
        for (value, sum) in row.iter().zip(out.iter_mut()) {
            *sum += *value;
        }
    }
}
