//! Layers of the sentence convolution network.
//!
//! The pipeline is fixed (embedding, two convolution stages, softmax), so
//! layers expose plain forward/backward methods over flat `f32` buffers
//! instead of a shared trait; the model wires them together and owns the
//! inter-layer buffers.

pub mod classifier;
pub mod conv_fold_pool;
pub mod dropout;
pub mod embedding;

pub use classifier::SoftmaxClassifier;
pub use conv_fold_pool::ConvFoldPoolLayer;
pub use dropout::DropoutLayer;
pub use embedding::EmbeddingLayer;
