//! Relative-position offsets and logical tensor shapes
//!
//! Scores are addressed as `(bn, row, col)` where `bn` is the flattened
//! batch × heads index. The auxiliary bias matrices are `2 * span` wide and
//! are indexed by a bounded offset derived from the `(row, col)` pair.

use crate::error::{Error, Result};

/// Bounded relative offset for query `row` and key `col`:
/// `clamp(col - row + span, 0, 2 * span - 1)`.
///
/// `span` must be at least 1; the caller validates this before launch.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn relative_offset(row: usize, col: usize, span: usize) -> usize {
    debug_assert!(span > 0, "relative_offset: span must be positive");
    let max = 2 * span as i64 - 1;
    let delta = col as i64 - row as i64 + span as i64;
    delta.clamp(0, max) as usize
}

/// Logical 3-D shape `(bn, seq_len, width)` of one kernel operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalShape {
    /// Batch size × attention heads
    pub bn: usize,
    /// Sequence length
    pub seq_len: usize,
    /// Innermost dimension: `seq_len` for score tensors, `2 * span` for
    /// relative-position tensors
    pub width: usize,
}

impl LogicalShape {
    #[must_use]
    pub const fn new(bn: usize, seq_len: usize, width: usize) -> Self {
        Self {
            bn,
            seq_len,
            width,
        }
    }

    /// Interpret a 3-D tensor shape.
    ///
    /// # Errors
    /// Returns `InvalidShape` if `dims` is not exactly 3-D.
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match *dims {
            [bn, seq_len, width] => Ok(Self::new(bn, seq_len, width)),
            _ => Err(Error::InvalidShape(format!(
                "expected a 3-D tensor, got {} dims {dims:?}",
                dims.len()
            ))),
        }
    }

    /// Number of elements in one `bn` plane
    #[must_use]
    pub const fn plane_len(&self) -> usize {
        self.seq_len * self.width
    }

    #[must_use]
    pub const fn numel(&self) -> usize {
        self.bn * self.plane_len()
    }

    /// Row-major linear index of `(b, row, col)`
    #[must_use]
    pub const fn index(&self, b: usize, row: usize, col: usize) -> usize {
        (b * self.seq_len + row) * self.width + col
    }

    #[must_use]
    pub fn dims(&self) -> [usize; 3] {
        [self.bn, self.seq_len, self.width]
    }
}
