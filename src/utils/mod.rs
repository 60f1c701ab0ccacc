//! Shared utilities: seeded RNG, activation functions, BLAS matrix helpers.

pub mod activations;
pub mod matrix;
pub mod rng;
