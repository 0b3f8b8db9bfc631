//! CPU tensor implementation.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use disentangle::dtype::{DType, TensorDType};
use disentangle::tensor::{Tensor, TensorFormat};
use disentangle::{Error, Result};
use half::f16;

/// Element buffer of a CPU tensor, tagged by element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I8(Vec<i8>),
    I32(Vec<i32>),
}

impl Storage {
    #[must_use]
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        match dtype {
            DType::F32 => Self::F32(vec![0.0; numel]),
            DType::F16 => Self::F16(vec![f16::ZERO; numel]),
            DType::I8 => Self::I8(vec![0; numel]),
            DType::I32 => Self::I32(vec![0; numel]),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F16(_) => DType::F16,
            Self::I8(_) => DType::I8,
            Self::I32(_) => DType::I32,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::F16(v) => v.len(),
            Self::I8(v) => v.len(),
            Self::I32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view of the buffer.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer does not hold `T`.
    pub fn as_slice<T: HostElement>(&self) -> Result<&[T]> {
        T::view(self).ok_or(Error::DtypeMismatch {
            expected: T::DTYPE,
            got: self.dtype(),
        })
    }

    /// Mutable typed view of the buffer.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer does not hold `T`.
    pub fn as_mut_slice<T: HostElement>(&mut self) -> Result<&mut [T]> {
        let got = self.dtype();
        T::view_mut(self).ok_or(Error::DtypeMismatch {
            expected: T::DTYPE,
            got,
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::F32(v) => bytemuck::cast_slice(v).to_vec(),
            Self::F16(v) => bytemuck::cast_slice(v).to_vec(),
            Self::I8(v) => bytemuck::cast_slice(v).to_vec(),
            Self::I32(v) => bytemuck::cast_slice(v).to_vec(),
        }
    }
}

/// Element types a [`Storage`] can hold.
pub trait HostElement: TensorDType + bytemuck::Pod {
    fn wrap(data: Vec<Self>) -> Storage;

    fn view(storage: &Storage) -> Option<&[Self]>;

    fn view_mut(storage: &mut Storage) -> Option<&mut [Self]>;
}

macro_rules! impl_host_element {
    ($ty:ty, $variant:ident) => {
        impl HostElement for $ty {
            fn wrap(data: Vec<Self>) -> Storage {
                Storage::$variant(data)
            }

            fn view(storage: &Storage) -> Option<&[Self]> {
                match storage {
                    Storage::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn view_mut(storage: &mut Storage) -> Option<&mut [Self]> {
                match storage {
                    Storage::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_host_element!(f32, F32);
impl_host_element!(f16, F16);
impl_host_element!(i8, I8);
impl_host_element!(i32, I32);

/// A CPU-resident tensor backed by shared, lockable storage.
///
/// Clones share the buffer, so a clone handed to a queued job sees (and
/// writes) the same elements as the caller's handle. Reads taken while a
/// job that writes this tensor is still queued observe whichever state the
/// job has reached; call [`CpuStream::synchronize`](crate::CpuStream::synchronize)
/// first.
#[derive(Debug, Clone)]
pub struct CpuTensor {
    storage: Arc<RwLock<Storage>>,
    shape: Vec<usize>,
    dtype: DType,
    format: TensorFormat,
}

impl CpuTensor {
    fn from_storage(shape: &[usize], storage: Storage) -> Self {
        Self {
            dtype: storage.dtype(),
            storage: Arc::new(RwLock::new(storage)),
            shape: shape.to_vec(),
            format: TensorFormat::Linear,
        }
    }

    /// Create a tensor from a typed slice.
    ///
    /// # Panics
    /// Panics if `data.len()` differs from the product of `shape`.
    #[must_use]
    pub fn from_slice<T: HostElement>(shape: &[usize], data: &[T]) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "data len {} != shape product {numel}",
            data.len()
        );
        Self::from_storage(shape, T::wrap(data.to_vec()))
    }

    /// Create a tensor of `dtype` from f32 values, converting each element
    /// (f16 rounds to nearest; i8 and i32 truncate toward zero and saturate).
    ///
    /// # Panics
    /// Panics if `data.len()` differs from the product of `shape`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_f32(shape: &[usize], dtype: DType, data: &[f32]) -> Self {
        match dtype {
            DType::F32 => Self::from_slice(shape, data),
            DType::F16 => {
                let v: Vec<f16> = data.iter().map(|&x| f16::from_f32(x)).collect();
                Self::from_slice(shape, &v)
            }
            DType::I8 => {
                let v: Vec<i8> = data.iter().map(|&x| x as i8).collect();
                Self::from_slice(shape, &v)
            }
            DType::I32 => {
                let v: Vec<i32> = data.iter().map(|&x| x as i32).collect();
                Self::from_slice(shape, &v)
            }
        }
    }

    /// Create a zero-filled tensor.
    #[must_use]
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        Self::from_storage(shape, Storage::zeros(dtype, numel))
    }

    /// Create a tensor from raw native-endian bytes.
    ///
    /// # Errors
    /// Returns `InvalidShape` if the byte count does not match `shape` and `dtype`.
    pub fn from_bytes(shape: &[usize], dtype: DType, bytes: &[u8]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        let expected = numel * dtype.size_in_bytes();
        if bytes.len() != expected {
            return Err(Error::InvalidShape(format!(
                "{} bytes cannot hold {shape:?} {dtype} ({expected} bytes)",
                bytes.len()
            )));
        }
        let storage = match dtype {
            DType::F32 => Storage::F32(bytemuck::pod_collect_to_vec(bytes)),
            DType::F16 => Storage::F16(bytemuck::pod_collect_to_vec(bytes)),
            DType::I8 => Storage::I8(bytemuck::pod_collect_to_vec(bytes)),
            DType::I32 => Storage::I32(bytemuck::pod_collect_to_vec(bytes)),
        };
        Ok(Self::from_storage(shape, storage))
    }

    /// Same buffer, tagged with a different memory layout
    #[must_use]
    pub fn with_format(mut self, format: TensorFormat) -> Self {
        self.format = format;
        self
    }

    /// Copy the elements out as `T`.
    ///
    /// # Panics
    /// Panics if the tensor does not hold `T`.
    #[must_use]
    pub fn to_vec<T: HostElement>(&self) -> Vec<T> {
        let storage = self.read();
        match storage.as_slice::<T>() {
            Ok(v) => v.to_vec(),
            Err(e) => panic!("to_vec: {e}"),
        }
    }

    /// Copy the elements out as native-endian bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.read().to_bytes()
    }

    /// Whether both handles refer to the same buffer
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Storage> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Storage> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Tensor for CpuTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn format(&self) -> TensorFormat {
        self.format
    }
}
