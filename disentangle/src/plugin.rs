//! Compute-kernel interface for host inference engines.
//!
//! [`ComputeKernel`] is the narrow, object-safe surface an engine drives:
//! shape/type queries, validation, launch, serialization and duplication.
//! [`DisentangledAttention`] implements it as a thin adapter over the
//! validator and a backend's [`DisentangledOps`]; none of the math lives
//! here.

use crate::attributes::{field_collection, Field, FieldCollection};
use crate::backend::{Backend, DisentangledOps};
use crate::config::{DisentangledConfig, SERIALIZED_SIZE};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorDesc};
use crate::tile::TileConfig;
use crate::validate;
use crate::variant::Variant;

/// Kernel type name reported to the engine
pub const KERNEL_NAME: &str = "DisentangledAttention";

/// Kernel version reported to the engine
pub const KERNEL_VERSION: &str = "1";

/// Interface an inference engine uses to drive a fused kernel.
pub trait ComputeKernel<B: Backend>: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str;

    fn num_outputs(&self) -> usize;

    /// Shape of output `index` for the given input shapes.
    ///
    /// # Errors
    /// Returns an error for an out-of-range output index or wrong input count.
    fn output_shape(&self, index: usize, inputs: &[TensorDesc]) -> Result<Vec<usize>>;

    /// Element type of output `index`.
    ///
    /// # Errors
    /// Returns an error for an out-of-range output index or wrong input count.
    fn output_dtype(&self, index: usize, input_types: &[DType]) -> Result<DType>;

    /// Whether position `pos` of `in_out` (inputs then outputs) is acceptable.
    fn supports_format_combination(&self, pos: usize, in_out: &[TensorDesc], nb_inputs: usize)
        -> bool;

    /// Check a full invocation before any launch.
    ///
    /// # Errors
    /// Returns the first violated shape, type or layout constraint.
    fn validate(&self, inputs: &[TensorDesc], outputs: &[TensorDesc]) -> Result<()>;

    /// Scratch memory needed per launch, in bytes.
    fn workspace_size(&self, inputs: &[TensorDesc], outputs: &[TensorDesc]) -> usize;

    /// Validate, then queue the computation on `stream`.
    ///
    /// # Errors
    /// Returns an error if validation fails (nothing is queued) or the stream
    /// reports a pending failure.
    fn enqueue(
        &self,
        inputs: &[&B::Tensor],
        outputs: &mut [B::Tensor],
        stream: &B::Stream,
    ) -> Result<()>;

    fn serialization_size(&self) -> usize;

    fn serialize(&self) -> Vec<u8>;

    /// Independent copy of this instance.
    fn clone_box(&self) -> Box<dyn ComputeKernel<B>>;
}

/// A configured disentangled-attention kernel.
///
/// The configuration and variant are fixed at construction; a changed
/// configuration means a new instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisentangledAttention {
    config: DisentangledConfig,
    variant: Variant,
    tile: TileConfig,
}

impl DisentangledAttention {
    /// Instance of the build-time variant with the default tile geometry.
    #[must_use]
    pub fn new(span: i32, factor: f32) -> Self {
        Self::from_config(DisentangledConfig::new(span, factor))
    }

    #[must_use]
    pub fn from_config(config: DisentangledConfig) -> Self {
        Self {
            config,
            variant: Variant::BUILD,
            tile: TileConfig::default(),
        }
    }

    /// Rebuild an instance from [`ComputeKernel::serialize`] output.
    ///
    /// # Errors
    /// Returns `Deserialize` unless `bytes` is exactly 8 bytes, and
    /// `InvalidSpan` if the stored span is negative.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Self::checked(DisentangledConfig::from_bytes(bytes)?)
    }

    fn checked(config: DisentangledConfig) -> Result<Self> {
        config.span_width()?;
        Ok(Self::from_config(config))
    }

    /// Same configuration, different kernel variant
    #[must_use]
    pub fn with_variant(self, variant: Variant) -> Self {
        Self { variant, ..self }
    }

    /// Same configuration, different tile geometry
    #[must_use]
    pub fn with_tile(self, tile: TileConfig) -> Self {
        Self { tile, ..self }
    }

    #[must_use]
    pub fn config(&self) -> &DisentangledConfig {
        &self.config
    }

    #[must_use]
    pub fn span(&self) -> i32 {
        self.config.span
    }

    #[must_use]
    pub fn factor(&self) -> f32 {
        self.config.factor
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.variant
    }

    #[must_use]
    pub fn tile(&self) -> TileConfig {
        self.tile
    }

    /// # Errors
    /// Returns the first violated shape, type or layout constraint.
    pub fn validate(&self, inputs: &[TensorDesc], outputs: &[TensorDesc]) -> Result<()> {
        validate::validate(self.variant, &self.config, inputs, outputs).map(|_| ())
    }

    fn check_output_index(index: usize) -> Result<()> {
        if index == 0 {
            Ok(())
        } else {
            Err(Error::OutputCount {
                expected: 1,
                got: index + 1,
            })
        }
    }
}

impl<B: DisentangledOps> ComputeKernel<B> for DisentangledAttention {
    fn name(&self) -> &'static str {
        KERNEL_NAME
    }

    fn version(&self) -> &'static str {
        KERNEL_VERSION
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn output_shape(&self, index: usize, inputs: &[TensorDesc]) -> Result<Vec<usize>> {
        Self::check_output_index(index)?;
        validate::output_shape(self.variant, inputs)
    }

    fn output_dtype(&self, index: usize, input_types: &[DType]) -> Result<DType> {
        Self::check_output_index(index)?;
        validate::output_dtype(self.variant, input_types)
    }

    fn supports_format_combination(
        &self,
        pos: usize,
        in_out: &[TensorDesc],
        nb_inputs: usize,
    ) -> bool {
        validate::supports_format_combination(self.variant, pos, in_out, nb_inputs)
    }

    fn validate(&self, inputs: &[TensorDesc], outputs: &[TensorDesc]) -> Result<()> {
        DisentangledAttention::validate(self, inputs, outputs)
    }

    fn workspace_size(&self, _inputs: &[TensorDesc], _outputs: &[TensorDesc]) -> usize {
        0
    }

    fn enqueue(
        &self,
        inputs: &[&B::Tensor],
        outputs: &mut [B::Tensor],
        stream: &B::Stream,
    ) -> Result<()> {
        let input_descs: Vec<TensorDesc> = inputs.iter().map(|t| t.desc()).collect();
        let output_descs: Vec<TensorDesc> = outputs.iter().map(Tensor::desc).collect();
        DisentangledAttention::validate(self, &input_descs, &output_descs)?;

        log::debug!(
            "{KERNEL_NAME}: enqueue {} span={} factor={}",
            self.variant,
            self.config.span,
            self.config.factor
        );
        let output = &mut outputs[0];
        match self.variant {
            Variant::GatherCombine => B::gather_combine(
                inputs[0],
                inputs[1],
                inputs[2],
                inputs[3],
                output,
                &self.config,
                self.tile,
                stream,
            ),
            Variant::BiasAdd => B::bias_add(
                inputs[0],
                inputs[1],
                inputs[2],
                output,
                &self.config,
                self.tile,
                stream,
            ),
        }
    }

    fn serialization_size(&self) -> usize {
        SERIALIZED_SIZE
    }

    fn serialize(&self) -> Vec<u8> {
        self.config.to_bytes().to_vec()
    }

    fn clone_box(&self) -> Box<dyn ComputeKernel<B>> {
        Box::new(*self)
    }
}

/// Factory that builds [`DisentangledAttention`] instances from named
/// attributes or serialized bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisentangledAttentionCreator;

impl DisentangledAttentionCreator {
    #[must_use]
    pub fn name(&self) -> &'static str {
        KERNEL_NAME
    }

    #[must_use]
    pub fn version(&self) -> &'static str {
        KERNEL_VERSION
    }

    /// Attributes accepted by [`create`](Self::create)
    #[must_use]
    pub fn field_names(&self) -> &'static FieldCollection {
        field_collection()
    }

    /// # Errors
    /// Returns `InvalidAttribute` if a known attribute has the wrong type or
    /// arity, and `InvalidSpan` if `span` is negative.
    pub fn create(&self, fields: &[Field]) -> Result<DisentangledAttention> {
        DisentangledAttention::checked(DisentangledConfig::from_fields(fields)?)
    }

    /// # Errors
    /// Returns `Deserialize` unless `bytes` is exactly 8 bytes, and
    /// `InvalidSpan` if the stored span is negative.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<DisentangledAttention> {
        DisentangledAttention::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Backend that records launches instead of computing.
    struct RecordingBackend;

    impl Backend for RecordingBackend {
        type Tensor = TensorDesc;
        type Stream = RefCell<Vec<&'static str>>;
    }

    impl DisentangledOps for RecordingBackend {
        fn gather_combine(
            _data1: &TensorDesc,
            _index1: &TensorDesc,
            _data2: &TensorDesc,
            _index2: &TensorDesc,
            _output: &mut TensorDesc,
            _config: &DisentangledConfig,
            _tile: TileConfig,
            stream: &Self::Stream,
        ) -> Result<()> {
            stream.borrow_mut().push("gather_combine");
            Ok(())
        }

        fn bias_add(
            _c2c: &TensorDesc,
            _c2p: &TensorDesc,
            _p2c: &TensorDesc,
            _output: &mut TensorDesc,
            _config: &DisentangledConfig,
            _tile: TileConfig,
            stream: &Self::Stream,
        ) -> Result<()> {
            stream.borrow_mut().push("bias_add");
            Ok(())
        }
    }

    fn as_kernel(k: &DisentangledAttention) -> &dyn ComputeKernel<RecordingBackend> {
        k
    }

    #[test]
    fn test_identity() {
        let k = DisentangledAttention::new(4, 0.5);
        let kernel = as_kernel(&k);
        assert_eq!(kernel.name(), "DisentangledAttention");
        assert_eq!(kernel.version(), "1");
        assert_eq!(kernel.num_outputs(), 1);
        assert_eq!(kernel.workspace_size(&[], &[]), 0);
    }

    #[test]
    fn test_serialize_round_trip() {
        let k = DisentangledAttention::new(512, -3.25);
        let bytes = as_kernel(&k).serialize();
        assert_eq!(bytes.len(), as_kernel(&k).serialization_size());
        let back = DisentangledAttention::deserialize(&bytes).unwrap();
        assert_eq!(back.span(), 512);
        assert_eq!(back.factor().to_bits(), (-3.25f32).to_bits());
        assert_eq!(back.variant(), Variant::BUILD);
    }

    #[test]
    fn test_deserialize_rejects_short_buffer() {
        assert!(DisentangledAttention::deserialize(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_deserialize_rejects_negative_span() {
        let bytes = DisentangledConfig::new(-3, 1.0).to_bytes();
        assert!(matches!(
            DisentangledAttention::deserialize(&bytes),
            Err(Error::InvalidSpan(_))
        ));
        assert!(matches!(
            DisentangledAttentionCreator.deserialize(&bytes),
            Err(Error::InvalidSpan(_))
        ));
        let zero = DisentangledConfig::new(0, 1.0).to_bytes();
        assert_eq!(DisentangledAttention::deserialize(&zero).unwrap().span(), 0);
    }

    #[test]
    fn test_creator_rejects_negative_span() {
        let result = DisentangledAttentionCreator.create(&[Field::int32("span", -1)]);
        assert!(matches!(result, Err(Error::InvalidSpan(_))));
    }

    #[test]
    fn test_clone_box_is_independent_copy() {
        let k = DisentangledAttention::new(3, 0.25).with_variant(Variant::GatherCombine);
        let copy = as_kernel(&k).clone_box();
        assert_eq!(copy.serialize(), as_kernel(&k).serialize());
        let in_out = [
            TensorDesc::new(&[1, 2, 6], DType::F16),
            TensorDesc::new(&[1, 2, 2], DType::I32),
        ];
        // the copy keeps the variant: position 1 is an index input
        assert!(copy.supports_format_combination(1, &in_out, 4));
    }

    #[test]
    fn test_enqueue_dispatches_bias_add() {
        let k = DisentangledAttention::new(2, 1.0).with_variant(Variant::BiasAdd);
        let c2c = TensorDesc::new(&[1, 4, 4], DType::F32);
        let aux = TensorDesc::new(&[1, 4, 4], DType::F32);
        let mut outputs = [TensorDesc::new(&[1, 4, 4], DType::F32)];
        let stream = RefCell::new(Vec::new());
        as_kernel(&k)
            .enqueue(&[&c2c, &aux, &aux], &mut outputs, &stream)
            .unwrap();
        assert_eq!(*stream.borrow(), vec!["bias_add"]);
    }

    #[test]
    fn test_enqueue_dispatches_gather_combine() {
        let k = DisentangledAttention::new(1, 1.0).with_variant(Variant::GatherCombine);
        let data = TensorDesc::new(&[1, 2, 2], DType::F16);
        let index = TensorDesc::new(&[1, 2, 2], DType::I32);
        let mut outputs = [TensorDesc::new(&[1, 2, 2], DType::F16)];
        let stream = RefCell::new(Vec::new());
        as_kernel(&k)
            .enqueue(&[&data, &index, &data, &index], &mut outputs, &stream)
            .unwrap();
        assert_eq!(*stream.borrow(), vec!["gather_combine"]);
    }

    #[test]
    fn test_rejected_invocation_never_launches() {
        let k = DisentangledAttention::new(2, 1.0).with_variant(Variant::BiasAdd);
        let c2c = TensorDesc::new(&[2, 4, 4], DType::F32);
        let c2p = TensorDesc::new(&[3, 4, 4], DType::F32);
        let p2c = TensorDesc::new(&[2, 4, 4], DType::F32);
        let mut outputs = [TensorDesc::new(&[2, 4, 4], DType::F32)];
        let stream = RefCell::new(Vec::new());
        let result = as_kernel(&k).enqueue(&[&c2c, &c2p, &p2c], &mut outputs, &stream);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        assert!(stream.borrow().is_empty());
    }

    #[test]
    fn test_output_queries() {
        let k = DisentangledAttention::new(2, 1.0).with_variant(Variant::BiasAdd);
        let kernel = as_kernel(&k);
        let inputs = [
            TensorDesc::new(&[2, 5, 5], DType::I8),
            TensorDesc::new(&[2, 5, 4], DType::I8),
            TensorDesc::new(&[2, 5, 4], DType::I8),
        ];
        assert_eq!(kernel.output_shape(0, &inputs).unwrap(), vec![2, 5, 5]);
        assert!(kernel.output_shape(1, &inputs).is_err());
        assert_eq!(
            kernel
                .output_dtype(0, &[DType::I8, DType::I8, DType::I8])
                .unwrap(),
            DType::I8
        );
    }

    #[test]
    fn test_creator() {
        let creator = DisentangledAttentionCreator;
        assert_eq!(creator.name(), KERNEL_NAME);
        assert_eq!(creator.field_names().len(), 2);

        let k = creator
            .create(&[Field::int32("span", 64), Field::float32("factor", 0.125)])
            .unwrap();
        assert_eq!(k.span(), 64);
        assert_eq!(k.factor(), 0.125);

        let defaults = creator.create(&[]).unwrap();
        assert_eq!(defaults.span(), 1);

        let bytes = k.config().to_bytes();
        assert_eq!(creator.deserialize(&bytes).unwrap(), k);
    }
}
