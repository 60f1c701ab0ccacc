//! Dynamic convolutional neural networks for sentence classification.
//!
//! The pipeline is embedding lookup, dropout, two stacked
//! convolution/fold/k-max-pooling stages, dropout, and a softmax classifier,
//! trained by minibatch gradient descent with AdaDelta. All tensors are flat
//! row-major `Vec<f32>` buffers with explicit index arithmetic; forward and
//! backward passes are written by hand.
//!
//! # Modules
//!
//! - `config`: JSON model/training configuration with validation
//! - `dataset`: padded sentence sets, vocabulary, batch gathering
//! - `diagnostics`: enumerated diagnostic toggles and structured records
//! - `layers`: embedding, dropout, conv-fold-pool, softmax classifier
//! - `model`: the wired network and its scratch workspace
//! - `optimizers`: Optimizer trait and implementations (AdaDelta, SGD)
//! - `params`: the parameter registry (values, gradients, accumulators)
//! - `pooling`: order-preserving k-max selection over the last axis
//! - `trainer`: the epoch/minibatch training driver
//! - `utils`: shared utilities (RNG, activation functions, GEMM helpers)

extern crate blas_src;

pub mod config;
pub mod dataset;
pub mod diagnostics;
pub mod layers;
pub mod model;
pub mod optimizers;
pub mod params;
pub mod pooling;
pub mod trainer;
pub mod utils;
