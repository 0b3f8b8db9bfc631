//! Shape, precision and layout checks run before any launch
//!
//! A rejected invocation never reaches a backend: no work is queued and the
//! output is left untouched.

use crate::config::DisentangledConfig;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::position::LogicalShape;
use crate::tensor::{Tensor, TensorDesc, TensorFormat};
use crate::variant::Variant;

/// Answer the format negotiation for one input/output position.
///
/// `in_out` lists the inputs followed by the outputs. A position is
/// acceptable when it is row-major and carries the variant's score type
/// matching position 0, or `I32` for a gather-index input.
#[must_use]
pub fn supports_format_combination(
    variant: Variant,
    pos: usize,
    in_out: &[TensorDesc],
    nb_inputs: usize,
) -> bool {
    let Some(desc) = in_out.get(pos) else {
        return false;
    };
    if desc.format != TensorFormat::Linear {
        return false;
    }
    if pos < nb_inputs && variant.is_index_input(pos) {
        return desc.dtype == DType::I32;
    }
    variant.score_types().contains(&desc.dtype) && desc.dtype == in_out[0].dtype
}

/// Output shape for the given inputs: input 1's shape for gather-combine,
/// input 0's shape for bias-add.
///
/// # Errors
/// Returns `InputCount` if the number of inputs does not match the variant.
pub fn output_shape(variant: Variant, inputs: &[TensorDesc]) -> Result<Vec<usize>> {
    check_count(variant, inputs.len())?;
    Ok(inputs[variant.output_shape_source()].shape.clone())
}

/// Output element type: always input 0's type.
///
/// # Errors
/// Returns `InputCount` if the number of inputs does not match the variant.
pub fn output_dtype(variant: Variant, input_types: &[DType]) -> Result<DType> {
    check_count(variant, input_types.len())?;
    Ok(input_types[0])
}

fn check_count(variant: Variant, got: usize) -> Result<()> {
    let expected = variant.num_inputs();
    if got == expected {
        Ok(())
    } else {
        Err(Error::InputCount { expected, got })
    }
}

/// Validate a full invocation and return the logical output shape
/// `(bn, s, s)`.
///
/// # Errors
/// Returns the first violated constraint: wrong tensor count, rank other
/// than 3, non-linear layout, unsupported or inconsistent element type,
/// negative span, or a shape disagreeing on `bn`, `s` or `2 * span`.
pub fn validate(
    variant: Variant,
    config: &DisentangledConfig,
    inputs: &[TensorDesc],
    outputs: &[TensorDesc],
) -> Result<LogicalShape> {
    let result = check(variant, config, inputs, outputs);
    if let Err(e) = &result {
        log::warn!("rejecting {variant} invocation: {e}");
    }
    result
}

fn check(
    variant: Variant,
    config: &DisentangledConfig,
    inputs: &[TensorDesc],
    outputs: &[TensorDesc],
) -> Result<LogicalShape> {
    check_count(variant, inputs.len())?;
    if outputs.len() != 1 {
        return Err(Error::OutputCount {
            expected: 1,
            got: outputs.len(),
        });
    }

    let names = variant.input_names();
    let tensors = || {
        names
            .iter()
            .copied()
            .zip(inputs)
            .enumerate()
            .chain(std::iter::once((inputs.len(), ("output", &outputs[0]))))
    };

    for (_, (name, desc)) in tensors() {
        if desc.ndim() != 3 {
            return Err(Error::InvalidShape(format!(
                "{name} must be 3-D, got {:?}",
                desc.shape
            )));
        }
        if desc.format != TensorFormat::Linear {
            return Err(Error::UnsupportedFormat(format!(
                "{name} must be linear (row-major), got {}",
                desc.format
            )));
        }
    }

    let dtype = inputs[0].dtype;
    if !variant.score_types().contains(&dtype) {
        return Err(Error::UnsupportedDtype(format!(
            "{variant} does not compute in {dtype}"
        )));
    }
    for (pos, (_, desc)) in tensors() {
        let expected = if pos < inputs.len() && variant.is_index_input(pos) {
            DType::I32
        } else {
            dtype
        };
        if desc.dtype != expected {
            return Err(Error::DtypeMismatch {
                expected,
                got: desc.dtype,
            });
        }
    }

    let width = config.span_width()?;
    let bn = inputs[0].shape[0];
    let seq_len = inputs[0].shape[1];
    if width == 0 && seq_len > 0 {
        return Err(Error::InvalidSpan(format!(
            "span 0 leaves no relative positions for sequence length {seq_len}"
        )));
    }

    let scores = vec![bn, seq_len, seq_len];
    let positions = vec![bn, seq_len, width];
    let expected_inputs: [&Vec<usize>; 4] = match variant {
        Variant::GatherCombine => [&positions, &scores, &positions, &scores],
        Variant::BiasAdd => [&scores, &positions, &positions, &scores],
    };
    for (pos, (name, desc)) in tensors() {
        let expected = if pos < inputs.len() {
            expected_inputs[pos]
        } else {
            &scores
        };
        if &desc.shape != expected {
            log::debug!("{name}: expected {expected:?}, got {:?}", desc.shape);
            return Err(Error::ShapeMismatch {
                expected: expected.clone(),
                got: desc.shape.clone(),
            });
        }
    }

    Ok(LogicalShape::new(bn, seq_len, seq_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bias_add_descs(bn: usize, s: usize, span: usize, dtype: DType) -> Vec<TensorDesc> {
        vec![
            TensorDesc::new(&[bn, s, s], dtype),
            TensorDesc::new(&[bn, s, 2 * span], dtype),
            TensorDesc::new(&[bn, s, 2 * span], dtype),
        ]
    }

    fn gather_descs(bn: usize, s: usize, span: usize) -> Vec<TensorDesc> {
        vec![
            TensorDesc::new(&[bn, s, 2 * span], DType::F16),
            TensorDesc::new(&[bn, s, s], DType::I32),
            TensorDesc::new(&[bn, s, 2 * span], DType::F16),
            TensorDesc::new(&[bn, s, s], DType::I32),
        ]
    }

    fn config(span: i32) -> DisentangledConfig {
        DisentangledConfig::new(span, 1.0)
    }

    #[test]
    fn test_bias_add_accepts_all_score_types() {
        for dtype in [DType::F32, DType::F16, DType::I8] {
            let inputs = bias_add_descs(2, 4, 2, dtype);
            let out = [TensorDesc::new(&[2, 4, 4], dtype)];
            let shape = validate(Variant::BiasAdd, &config(2), &inputs, &out).unwrap();
            assert_eq!(shape, LogicalShape::new(2, 4, 4));
        }
    }

    #[test]
    fn test_rejects_bn_mismatch() {
        let mut inputs = bias_add_descs(2, 4, 2, DType::F32);
        inputs[1] = TensorDesc::new(&[3, 4, 4], DType::F32);
        let out = [TensorDesc::new(&[2, 4, 4], DType::F32)];
        let err = validate(Variant::BiasAdd, &config(2), &inputs, &out).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rejects_seq_len_mismatch() {
        let mut inputs = bias_add_descs(1, 4, 2, DType::F32);
        inputs[2] = TensorDesc::new(&[1, 5, 4], DType::F32);
        let out = [TensorDesc::new(&[1, 4, 4], DType::F32)];
        assert!(validate(Variant::BiasAdd, &config(2), &inputs, &out).is_err());
    }

    #[test]
    fn test_rejects_non_square_scores() {
        let inputs = vec![
            TensorDesc::new(&[1, 4, 5], DType::F32),
            TensorDesc::new(&[1, 4, 4], DType::F32),
            TensorDesc::new(&[1, 4, 4], DType::F32),
        ];
        let out = [TensorDesc::new(&[1, 4, 5], DType::F32)];
        assert!(validate(Variant::BiasAdd, &config(2), &inputs, &out).is_err());
    }

    #[test]
    fn test_rejects_wrong_span_width() {
        let inputs = bias_add_descs(1, 4, 3, DType::F16);
        let out = [TensorDesc::new(&[1, 4, 4], DType::F16)];
        let err = validate(Variant::BiasAdd, &config(2), &inputs, &out).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch { ref expected, ref got } if expected == &[1, 4, 4] && got == &[1, 4, 6]
        ));
    }

    #[test]
    fn test_rejects_mixed_dtypes() {
        let mut inputs = bias_add_descs(1, 4, 2, DType::F32);
        inputs[1].dtype = DType::F16;
        let out = [TensorDesc::new(&[1, 4, 4], DType::F32)];
        assert!(matches!(
            validate(Variant::BiasAdd, &config(2), &inputs, &out),
            Err(Error::DtypeMismatch {
                expected: DType::F32,
                got: DType::F16
            })
        ));
    }

    #[test]
    fn test_rejects_output_dtype_promotion() {
        let inputs = bias_add_descs(1, 4, 2, DType::F16);
        let out = [TensorDesc::new(&[1, 4, 4], DType::F32)];
        assert!(validate(Variant::BiasAdd, &config(2), &inputs, &out).is_err());
    }

    #[test]
    fn test_rejects_unsupported_dtype() {
        let inputs = bias_add_descs(1, 4, 2, DType::I32);
        let out = [TensorDesc::new(&[1, 4, 4], DType::I32)];
        assert!(matches!(
            validate(Variant::BiasAdd, &config(2), &inputs, &out),
            Err(Error::UnsupportedDtype(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_rank() {
        let mut inputs = bias_add_descs(1, 4, 2, DType::F32);
        inputs[0] = TensorDesc::new(&[1, 1, 4, 4], DType::F32);
        let out = [TensorDesc::new(&[1, 4, 4], DType::F32)];
        assert!(matches!(
            validate(Variant::BiasAdd, &config(2), &inputs, &out),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn test_rejects_vectorized_format() {
        let mut inputs = bias_add_descs(1, 4, 2, DType::I8);
        inputs[0] = inputs[0].clone().with_format(TensorFormat::Vectorized(32));
        let out = [TensorDesc::new(&[1, 4, 4], DType::I8)];
        assert!(matches!(
            validate(Variant::BiasAdd, &config(2), &inputs, &out),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_rejects_tensor_counts() {
        let inputs = bias_add_descs(1, 4, 2, DType::F32);
        let out = TensorDesc::new(&[1, 4, 4], DType::F32);
        assert!(matches!(
            validate(Variant::BiasAdd, &config(2), &inputs[..2], &[out.clone()]),
            Err(Error::InputCount {
                expected: 3,
                got: 2
            })
        ));
        assert!(matches!(
            validate(Variant::BiasAdd, &config(2), &inputs, &[out.clone(), out]),
            Err(Error::OutputCount {
                expected: 1,
                got: 2
            })
        ));
    }

    #[test]
    fn test_rejects_negative_and_zero_span() {
        let inputs = bias_add_descs(1, 4, 0, DType::F32);
        let out = [TensorDesc::new(&[1, 4, 4], DType::F32)];
        assert!(matches!(
            validate(Variant::BiasAdd, &config(-1), &inputs, &out),
            Err(Error::InvalidSpan(_))
        ));
        assert!(matches!(
            validate(Variant::BiasAdd, &config(0), &inputs, &out),
            Err(Error::InvalidSpan(_))
        ));
    }

    #[test]
    fn test_zero_span_with_empty_sequence() {
        let inputs = bias_add_descs(2, 0, 0, DType::F32);
        let out = [TensorDesc::new(&[2, 0, 0], DType::F32)];
        assert!(validate(Variant::BiasAdd, &config(0), &inputs, &out).is_ok());
    }

    #[test]
    fn test_gather_combine_accepts_index_tensors() {
        let inputs = gather_descs(2, 3, 2);
        let out = [TensorDesc::new(&[2, 3, 3], DType::F16)];
        let shape = validate(Variant::GatherCombine, &config(2), &inputs, &out).unwrap();
        assert_eq!(shape, LogicalShape::new(2, 3, 3));
    }

    #[test]
    fn test_gather_combine_requires_half() {
        let mut inputs = gather_descs(1, 3, 2);
        inputs[0].dtype = DType::F32;
        inputs[2].dtype = DType::F32;
        let out = [TensorDesc::new(&[1, 3, 3], DType::F32)];
        assert!(validate(Variant::GatherCombine, &config(2), &inputs, &out).is_err());
    }

    #[test]
    fn test_gather_combine_requires_square_index() {
        let mut inputs = gather_descs(1, 3, 2);
        inputs[3] = TensorDesc::new(&[1, 3, 4], DType::I32);
        let out = [TensorDesc::new(&[1, 3, 3], DType::F16)];
        assert!(validate(Variant::GatherCombine, &config(2), &inputs, &out).is_err());
    }

    #[test]
    fn test_gather_combine_rejects_float_indices() {
        let mut inputs = gather_descs(1, 3, 2);
        inputs[1].dtype = DType::F16;
        let out = [TensorDesc::new(&[1, 3, 3], DType::F16)];
        assert!(matches!(
            validate(Variant::GatherCombine, &config(2), &inputs, &out),
            Err(Error::DtypeMismatch {
                expected: DType::I32,
                got: DType::F16
            })
        ));
    }

    #[test]
    fn test_output_shape_and_dtype() {
        let bias = bias_add_descs(2, 5, 3, DType::I8);
        assert_eq!(output_shape(Variant::BiasAdd, &bias).unwrap(), vec![2, 5, 5]);
        let gather = gather_descs(2, 5, 3);
        assert_eq!(
            output_shape(Variant::GatherCombine, &gather).unwrap(),
            vec![2, 5, 5]
        );
        assert_eq!(
            output_dtype(Variant::BiasAdd, &[DType::I8, DType::I8, DType::I8]).unwrap(),
            DType::I8
        );
        assert!(output_shape(Variant::BiasAdd, &gather).is_err());
        assert!(output_dtype(Variant::BiasAdd, &[]).is_err());
    }

    #[test]
    fn test_format_combination() {
        let mut in_out = bias_add_descs(1, 4, 2, DType::F16);
        in_out.push(TensorDesc::new(&[1, 4, 4], DType::F16));
        for pos in 0..4 {
            assert!(supports_format_combination(Variant::BiasAdd, pos, &in_out, 3));
        }
        assert!(!supports_format_combination(Variant::BiasAdd, 4, &in_out, 3));

        in_out[2].dtype = DType::F32;
        assert!(!supports_format_combination(Variant::BiasAdd, 2, &in_out, 3));

        in_out[2].dtype = DType::F16;
        in_out[1] = in_out[1].clone().with_format(TensorFormat::Vectorized(4));
        assert!(!supports_format_combination(Variant::BiasAdd, 1, &in_out, 3));
    }

    #[test]
    fn test_format_combination_gather() {
        let mut in_out = gather_descs(1, 3, 2);
        in_out.push(TensorDesc::new(&[1, 3, 3], DType::F16));
        for pos in 0..5 {
            assert!(supports_format_combination(Variant::GatherCombine, pos, &in_out, 4));
        }
        in_out[0].dtype = DType::F32;
        assert!(!supports_format_combination(Variant::GatherCombine, 0, &in_out, 4));
    }
}
