//! CUDA implementations of the backend op traits.

pub mod disentangled;
