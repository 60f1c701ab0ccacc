//! Word embedding layer.
//!
//! Maps a batch of padded token-id sequences to the 4D sentence tensor
//! (batch, 1, embed_dim, seq_len): column t holds the embedding of token t,
//! so the embedding dimension runs down the rows the convolution sees.

use crate::params::{ParamId, ParamRegistry};
use crate::utils::rng::SimpleRng;

/// Embedding lookup over a (vocab_size x embed_dim) table.
///
/// The table is initialized uniformly in [-1, 1] except for the reserved pad
/// row (the last vocabulary index), which starts at zero. Nothing in this
/// layer keeps the pad row at zero once updates run; freezing the whole
/// group (`trainable = false`) is what preserves it.
#[derive(Debug)]
pub struct EmbeddingLayer {
    vocab_size: usize,
    embed_dim: usize,
    seq_len: usize,
    weights: ParamId,
}

impl EmbeddingLayer {
    /// Initializes the table and registers it as `"embeddings"`.
    pub fn new(
        params: &mut ParamRegistry,
        rng: &mut SimpleRng,
        vocab_size: usize,
        embed_dim: usize,
        seq_len: usize,
        l2: f32,
        trainable: bool,
    ) -> Self {
        assert!(vocab_size >= 2, "vocabulary needs at least one real token plus the pad token");
        assert!(embed_dim >= 1, "embedding dimension must be positive");
        assert!(seq_len >= 1, "sentence length must be positive");

        let mut values = vec![0.0f32; vocab_size * embed_dim];
        for v in &mut values {
            *v = rng.gen_range_f32(-1.0, 1.0);
        }
        // The <PAD> row is the last vocabulary index and starts at zero.
        for v in &mut values[(vocab_size - 1) * embed_dim..] {
            *v = 0.0;
        }

        let weights = params.register(
            "embeddings",
            &[vocab_size, embed_dim],
            values,
            l2,
            trainable,
        );
        Self {
            vocab_size,
            embed_dim,
            seq_len,
            weights,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Reserved padding id, the last vocabulary index.
    pub fn pad_id(&self) -> u32 {
        (self.vocab_size - 1) as u32
    }

    /// Per-instance output element count (1 x embed_dim x seq_len).
    pub fn output_size(&self) -> usize {
        self.embed_dim * self.seq_len
    }

    pub fn param_id(&self) -> ParamId {
        self.weights
    }

    /// Gathers embedding rows into the (batch, 1, embed_dim, seq_len) tensor.
    pub fn forward(
        &self,
        params: &ParamRegistry,
        tokens: &[u32],
        output: &mut [f32],
        batch_size: usize,
    ) {
        assert_eq!(
            tokens.len(),
            batch_size * self.seq_len,
            "token buffer length mismatch: expected {}, got {}",
            batch_size * self.seq_len,
            tokens.len()
        );
        assert_eq!(
            output.len(),
            batch_size * self.output_size(),
            "embedding output length mismatch: expected {}, got {}",
            batch_size * self.output_size(),
            output.len()
        );

        let table = params.values(self.weights);
        for b in 0..batch_size {
            for t in 0..self.seq_len {
                let id = tokens[b * self.seq_len + t] as usize;
                assert!(
                    id < self.vocab_size,
                    "token id {} out of range for vocabulary of {}",
                    id,
                    self.vocab_size
                );
                let row = &table[id * self.embed_dim..(id + 1) * self.embed_dim];
                for (d, &value) in row.iter().enumerate() {
                    output[(b * self.embed_dim + d) * self.seq_len + t] = value;
                }
            }
        }
    }

    /// Scatters the output gradient back into the table's gradient buffer,
    /// accumulating over repeated token ids.
    pub fn backward(
        &self,
        params: &mut ParamRegistry,
        tokens: &[u32],
        grad_output: &[f32],
        batch_size: usize,
    ) {
        assert_eq!(
            grad_output.len(),
            batch_size * self.output_size(),
            "embedding gradient length mismatch: expected {}, got {}",
            batch_size * self.output_size(),
            grad_output.len()
        );

        let grad = params.grad_mut(self.weights);
        for b in 0..batch_size {
            for t in 0..self.seq_len {
                let id = tokens[b * self.seq_len + t] as usize;
                for d in 0..self.embed_dim {
                    grad[id * self.embed_dim + d] +=
                        grad_output[(b * self.embed_dim + d) * self.seq_len + t];
                }
            }
        }
    }
}
