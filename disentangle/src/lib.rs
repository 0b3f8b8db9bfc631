//! Disentangled-attention relative-position bias kernels
//!
//! This crate provides the kernel configuration, validation, tile
//! decomposition and the host reference bodies of the two fused kernels.
//! Backend-specific execution (CPU, CUDA) plugs in through
//! [`DisentangledOps`]; the CUDA backend lives behind the `cuda` feature.

#![allow(
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod attributes;
pub mod backend;
pub mod config;
pub mod dtype;
pub mod element;
pub mod error;
pub mod fused;
pub mod plugin;
pub mod position;
pub mod tensor;
pub mod tile;
pub mod validate;
pub mod variant;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use attributes::{field_collection, Field, FieldCollection, FieldData, FieldSpec, FieldType};
pub use backend::{Backend, DisentangledOps};
pub use config::{DisentangledConfig, SERIALIZED_SIZE};
pub use dtype::{DType, TensorDType};
pub use element::Element;
pub use error::{Error, Result};
pub use plugin::{
    ComputeKernel, DisentangledAttention, DisentangledAttentionCreator, KERNEL_NAME,
    KERNEL_VERSION,
};
pub use position::{relative_offset, LogicalShape};
pub use tensor::{Tensor, TensorDesc, TensorFormat};
pub use tile::{LaunchGrid, TileConfig, TileCoord, BLOCK_DIM_Y, TILE_SIZE};
pub use variant::Variant;
