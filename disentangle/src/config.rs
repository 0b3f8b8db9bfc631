//! Kernel configuration: relative-position span and bias scale factor
//!
//! The pair is the only state a kernel instance owns. It is fixed at
//! construction and crosses process boundaries as exactly eight bytes:
//! the span as a native-endian `i32` followed by the factor as a
//! native-endian `f32`, with no padding and no version tag.

use serde::{Deserialize, Serialize};

use crate::attributes::{field_collection, Field, FieldData};
use crate::error::{Error, Result};

/// Size of the serialized configuration in bytes
pub const SERIALIZED_SIZE: usize = std::mem::size_of::<i32>() + std::mem::size_of::<f32>();

/// Configuration of one disentangled-attention kernel instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisentangledConfig {
    /// Maximum relative distance with its own bias entry
    #[serde(default = "default_span")]
    pub span: i32,

    /// Scale applied to the summed position biases
    #[serde(default = "default_factor")]
    pub factor: f32,
}

fn default_span() -> i32 {
    1
}

fn default_factor() -> f32 {
    1e-5
}

impl Default for DisentangledConfig {
    fn default() -> Self {
        Self {
            span: default_span(),
            factor: default_factor(),
        }
    }
}

impl DisentangledConfig {
    #[must_use]
    pub const fn new(span: i32, factor: f32) -> Self {
        Self { span, factor }
    }

    /// Width of the relative-position tensors, `2 * span`.
    ///
    /// # Errors
    /// Returns `InvalidSpan` if the span is negative.
    pub fn span_width(&self) -> Result<usize> {
        usize::try_from(self.span)
            .map(|span| 2 * span)
            .map_err(|_| Error::InvalidSpan(format!("span must be non-negative, got {}", self.span)))
    }

    /// Serialize as `span` then `factor`, native byte order
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SERIALIZED_SIZE] {
        let mut out = [0u8; SERIALIZED_SIZE];
        out[..4].copy_from_slice(&self.span.to_ne_bytes());
        out[4..].copy_from_slice(&self.factor.to_ne_bytes());
        out
    }

    /// Inverse of [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    /// Returns `Deserialize` unless `bytes` is exactly [`SERIALIZED_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; SERIALIZED_SIZE] = bytes.try_into().map_err(|_| Error::Deserialize {
            expected: SERIALIZED_SIZE,
            got: bytes.len(),
        })?;
        let span = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let factor = f32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self { span, factor })
    }

    /// Parse attributes from a JSON object, e.g. `{"span": 256, "factor": 0.0625}`.
    /// Missing keys take the defaults (`span = 1`, `factor = 1e-5`).
    ///
    /// # Errors
    /// Returns `Json` if the text is not a valid attribute object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build from named attributes. Unknown names are skipped; absent
    /// attributes take the defaults.
    ///
    /// # Errors
    /// Returns `InvalidAttribute` if a known attribute has the wrong type or
    /// number of values.
    pub fn from_fields(fields: &[Field]) -> Result<Self> {
        let mut config = Self::default();
        for field in fields {
            let Some(spec) = field_collection().get(&field.name) else {
                log::debug!("ignoring unknown attribute '{}'", field.name);
                continue;
            };
            if field.data.field_type() != spec.field_type || field.data.len() != spec.length {
                return Err(Error::InvalidAttribute {
                    name: field.name.clone(),
                    reason: format!(
                        "expected {} x{}, got {} x{}",
                        spec.field_type,
                        spec.length,
                        field.data.field_type(),
                        field.data.len()
                    ),
                });
            }
            match (&*field.name, &field.data) {
                ("span", FieldData::Int32(v)) => config.span = v[0],
                ("factor", FieldData::Float32(v)) => config.factor = v[0],
                _ => {}
            }
        }
        Ok(config)
    }
}
