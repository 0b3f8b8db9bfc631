//! The two fusion kernels and the build-time choice between them

use std::fmt;

use crate::dtype::DType;

/// Which fused kernel an instance runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Variant 1: gather from two score tables through two index tensors
    /// and add the results. Half precision only.
    ///
    /// Inputs: `data1 (bn, s, 2*span)`, `index1 (bn, s, s)`,
    /// `data2 (bn, s, 2*span)`, `index2 (bn, s, s)`.
    GatherCombine,
    /// Variant 2: add the factor-scaled content-to-position and
    /// position-to-content biases to the content-to-content scores.
    ///
    /// Inputs: `c2c (bn, s, s)`, `c2p (bn, s, 2*span)`, `p2c (bn, s, 2*span)`.
    BiasAdd,
}

impl Variant {
    /// Variant selected for this build (`gather-combine` feature)
    #[cfg(feature = "gather-combine")]
    pub const BUILD: Self = Self::GatherCombine;

    /// Variant selected for this build (`gather-combine` feature)
    #[cfg(not(feature = "gather-combine"))]
    pub const BUILD: Self = Self::BiasAdd;

    #[must_use]
    pub const fn num_inputs(self) -> usize {
        match self {
            Self::GatherCombine => 4,
            Self::BiasAdd => 3,
        }
    }

    /// Role names of the inputs, by position
    #[must_use]
    pub const fn input_names(self) -> &'static [&'static str] {
        match self {
            Self::GatherCombine => &["data1", "index1", "data2", "index2"],
            Self::BiasAdd => &["c2c", "c2p", "p2c"],
        }
    }

    /// Input whose shape the output takes
    #[must_use]
    pub const fn output_shape_source(self) -> usize {
        match self {
            Self::GatherCombine => 1,
            Self::BiasAdd => 0,
        }
    }

    /// Element types this variant can compute in
    #[must_use]
    pub const fn score_types(self) -> &'static [DType] {
        match self {
            Self::GatherCombine => &[DType::F16],
            Self::BiasAdd => &[DType::F32, DType::F16, DType::I8],
        }
    }

    /// Whether input `pos` carries gather indices rather than scores
    #[must_use]
    pub const fn is_index_input(self, pos: usize) -> bool {
        matches!(self, Self::GatherCombine) && (pos == 1 || pos == 3)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GatherCombine => write!(f, "gather-combine"),
            Self::BiasAdd => write!(f, "bias-add"),
        }
    }
}
