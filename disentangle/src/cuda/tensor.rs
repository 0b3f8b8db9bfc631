//! CUDA tensor implementation

use std::sync::Arc;

use cudarc::driver::{CudaSlice, DeviceRepr, ValidAsZeroBits};
use half::f16;

use crate::cuda::CudaContext;
use crate::dtype::{DType, TensorDType};
use crate::tensor::{Tensor, TensorFormat};
use crate::{Error, Result};

/// Device allocation tagged by element type
#[derive(Clone)]
pub enum DeviceBuffer {
    F32(CudaSlice<f32>),
    F16(CudaSlice<f16>),
    I8(CudaSlice<i8>),
    I32(CudaSlice<i32>),
}

impl DeviceBuffer {
    fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F16(_) => DType::F16,
            Self::I8(_) => DType::I8,
            Self::I32(_) => DType::I32,
        }
    }
}

/// Element types a [`DeviceBuffer`] can hold.
pub trait DeviceElement: TensorDType + DeviceRepr + ValidAsZeroBits + Unpin {
    fn wrap(slice: CudaSlice<Self>) -> DeviceBuffer;

    fn view(buffer: &DeviceBuffer) -> Option<&CudaSlice<Self>>;

    fn view_mut(buffer: &mut DeviceBuffer) -> Option<&mut CudaSlice<Self>>;
}

macro_rules! impl_device_element {
    ($ty:ty, $variant:ident) => {
        impl DeviceElement for $ty {
            fn wrap(slice: CudaSlice<Self>) -> DeviceBuffer {
                DeviceBuffer::$variant(slice)
            }

            fn view(buffer: &DeviceBuffer) -> Option<&CudaSlice<Self>> {
                match buffer {
                    DeviceBuffer::$variant(s) => Some(s),
                    _ => None,
                }
            }

            fn view_mut(buffer: &mut DeviceBuffer) -> Option<&mut CudaSlice<Self>> {
                match buffer {
                    DeviceBuffer::$variant(s) => Some(s),
                    _ => None,
                }
            }
        }
    };
}

impl_device_element!(f32, F32);
impl_device_element!(f16, F16);
impl_device_element!(i8, I8);
impl_device_element!(i32, I32);

/// A tensor stored on a CUDA GPU
///
/// The allocation is shared through `Arc`; mutable access is copy-on-write,
/// cloning the device buffer only while another handle still refers to it.
#[derive(Clone)]
pub struct CudaTensor {
    data: Arc<DeviceBuffer>,
    shape: Vec<usize>,
    format: TensorFormat,
    ctx: CudaContext,
}

impl CudaTensor {
    /// Create a new tensor on the GPU from host data
    ///
    /// # Errors
    /// Returns an error if the length does not match `shape` or the copy fails
    pub fn from_slice<T: DeviceElement>(
        ctx: &CudaContext,
        shape: &[usize],
        data: &[T],
    ) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(Error::InvalidShape(format!(
                "data length {} doesn't match shape {shape:?} (numel={numel})",
                data.len()
            )));
        }
        let slice = ctx.device().htod_sync_copy(data)?;
        Ok(Self::from_buffer(ctx, shape, T::wrap(slice)))
    }

    /// Create a zero-filled tensor on the GPU
    ///
    /// # Errors
    /// Returns an error if GPU memory allocation fails
    pub fn zeros(ctx: &CudaContext, shape: &[usize], dtype: DType) -> Result<Self> {
        let numel: usize = shape.iter().product();
        let device = ctx.device();
        let buffer = match dtype {
            DType::F32 => DeviceBuffer::F32(device.alloc_zeros(numel)?),
            DType::F16 => DeviceBuffer::F16(device.alloc_zeros(numel)?),
            DType::I8 => DeviceBuffer::I8(device.alloc_zeros(numel)?),
            DType::I32 => DeviceBuffer::I32(device.alloc_zeros(numel)?),
        };
        Ok(Self::from_buffer(ctx, shape, buffer))
    }

    fn from_buffer(ctx: &CudaContext, shape: &[usize], buffer: DeviceBuffer) -> Self {
        Self {
            data: Arc::new(buffer),
            shape: shape.to_vec(),
            format: TensorFormat::Linear,
            ctx: ctx.clone(),
        }
    }

    /// Same buffer, tagged with a different memory layout
    #[must_use]
    pub fn with_format(mut self, format: TensorFormat) -> Self {
        self.format = format;
        self
    }

    /// Copy tensor data back to host
    ///
    /// # Errors
    /// Returns an error if the tensor does not hold `T` or the copy fails
    pub fn to_vec<T: DeviceElement>(&self) -> Result<Vec<T>> {
        Ok(self.ctx.device().dtoh_sync_copy(self.cuda_slice::<T>()?)?)
    }

    /// Typed device slice
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the tensor does not hold `T`
    pub fn cuda_slice<T: DeviceElement>(&self) -> Result<&CudaSlice<T>> {
        T::view(&self.data).ok_or(Error::DtypeMismatch {
            expected: T::DTYPE,
            got: self.data.dtype(),
        })
    }

    /// Mutable typed device slice (copy-on-write)
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the tensor does not hold `T`
    pub fn cuda_slice_mut<T: DeviceElement>(&mut self) -> Result<&mut CudaSlice<T>> {
        let got = self.data.dtype();
        T::view_mut(Arc::make_mut(&mut self.data)).ok_or(Error::DtypeMismatch {
            expected: T::DTYPE,
            got,
        })
    }

    /// Whether both handles refer to the same allocation
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    #[must_use]
    pub fn context(&self) -> &CudaContext {
        &self.ctx
    }
}

impl Tensor for CudaTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.data.dtype()
    }

    fn format(&self) -> TensorFormat {
        self.format
    }
}
