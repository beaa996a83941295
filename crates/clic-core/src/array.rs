//! Device memory objects.
//!
//! An [`Array`] is a 1-3 dimensional block of elements of one [`DataType`],
//! stored on exactly one [`Device`] either as a linear buffer or as an image.
//! The representation is fixed at creation; changing it means copying into a
//! new array with [`Array::copy_to`].

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use tracing::trace;

use crate::device::{Device, Memory};
use crate::dtype::{DataType, Element, MemoryType};
use crate::error::{ClicError, ClicResult};
use crate::shape::{Dimensionality, Shape};

/// Storage layout of an array on its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    shape: Shape,
    dtype: DataType,
    mtype: MemoryType,
    /// Elements per stored row.
    pitch: usize,
    /// Native allocation size.
    bytes: u64,
}

impl MemoryLayout {
    pub(crate) fn new(shape: Shape, dtype: DataType, mtype: MemoryType, pitch: usize, bytes: u64) -> Self {
        Self { shape, dtype, mtype, pitch, bytes }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn mtype(&self) -> MemoryType {
        self.mtype
    }

    /// Row pitch in elements.
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Native allocation size in bytes, including padding.
    pub fn native_bytes(&self) -> u64 {
        self.bytes
    }

    /// Host size in bytes of the tightly packed contents.
    pub fn host_bytes(&self) -> usize {
        self.shape.size() * self.dtype.size()
    }

    pub fn row_bytes(&self) -> usize {
        self.shape.width() * self.dtype.size()
    }

    pub fn pitch_bytes(&self) -> usize {
        self.pitch * self.dtype.size()
    }

    /// Number of rows across all slices.
    pub fn rows(&self) -> usize {
        self.shape.height() * self.shape.depth()
    }

    /// Element strides along x, y and z.
    pub fn strides(&self) -> [usize; 3] {
        [1, self.pitch, self.pitch * self.shape.height()]
    }
}

/// N-dimensional memory object owned by one device.
///
/// Arrays are shared through `Arc<Array>`; the native allocation is released
/// when the last reference drops. Work already enqueued on the array still
/// completes.
pub struct Array {
    device: Arc<Device>,
    layout: MemoryLayout,
    memory: Memory,
}

impl Array {
    /// Allocates a zero-initialized array.
    pub fn create(
        width: usize,
        height: usize,
        depth: usize,
        dtype: DataType,
        mtype: MemoryType,
        device: &Arc<Device>,
    ) -> ClicResult<Arc<Array>> {
        Self::allocate(device, Shape::new(width, height, depth)?, dtype, mtype)
    }

    /// Allocates an array and uploads `data` into it.
    pub fn create_with_data<T: Pod>(
        width: usize,
        height: usize,
        depth: usize,
        dtype: DataType,
        mtype: MemoryType,
        data: &[T],
        device: &Arc<Device>,
    ) -> ClicResult<Arc<Array>> {
        let array = Self::create(width, height, depth, dtype, mtype, device)?;
        array.write(data)?;
        Ok(array)
    }

    /// New array with the shape, representation and device of `reference`.
    ///
    /// `dtype` overrides the element type; 1-D and 2-D shapes stay as they are.
    pub fn create_like(reference: &Array, dtype: Option<DataType>) -> ClicResult<Arc<Array>> {
        Self::allocate(
            &reference.device,
            reference.shape(),
            dtype.unwrap_or(reference.dtype()),
            reference.mtype(),
        )
    }

    /// Returns `dst` when given, otherwise a new array like `reference`.
    pub fn create_like_or(
        reference: &Array,
        dst: Option<Arc<Array>>,
        dtype: Option<DataType>,
    ) -> ClicResult<Arc<Array>> {
        match dst {
            Some(dst) => Ok(dst),
            None => Self::create_like(reference, dtype),
        }
    }

    /// Like [`create_like`](Self::create_like) with depth collapsed to 1.
    pub fn create_xy(reference: &Array, dtype: Option<DataType>) -> ClicResult<Arc<Array>> {
        Self::allocate(
            &reference.device,
            reference.shape().xy(),
            dtype.unwrap_or(reference.dtype()),
            reference.mtype(),
        )
    }

    pub(crate) fn allocate(
        device: &Arc<Device>,
        shape: Shape,
        dtype: DataType,
        mtype: MemoryType,
    ) -> ClicResult<Arc<Array>> {
        trace!(shape = %shape, dtype = %dtype, mtype = %mtype, device = %device.id(), "allocate");
        device.ensure_valid()?;
        let layout = device.layout(shape, dtype, mtype)?;
        let memory = device.allocate_memory(&layout)?;
        Ok(Arc::new(Array { device: Arc::clone(device), layout, memory }))
    }

    /// Uploads a full, tightly packed host buffer.
    pub fn write<T: Pod>(&self, data: &[T]) -> ClicResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.check_host_size(bytes.len())?;
        trace!(bytes = bytes.len(), shape = %self.shape(), "write");
        self.device.ensure_valid()?;
        self.device.write_memory(&self.memory, &self.layout, bytes)
    }

    /// Downloads the full contents, waiting for queued work on the device.
    pub fn read<T: Pod>(&self, data: &mut [T]) -> ClicResult<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        self.check_host_size(bytes.len())?;
        trace!(bytes = bytes.len(), shape = %self.shape(), "read");
        self.device.ensure_valid()?;
        self.device.read_memory(&self.memory, &self.layout, bytes)
    }

    /// Downloads the contents into a new vector.
    ///
    /// `T` must have the array's element size.
    pub fn read_vec<T: Element>(&self) -> ClicResult<Vec<T>> {
        let mut data = vec![T::zeroed(); self.size()];
        self.read(&mut data)?;
        Ok(data)
    }

    /// Device-to-device copy into `dst`.
    ///
    /// Shape and data type must match; representations may differ.
    pub fn copy_to(&self, dst: &Array) -> ClicResult<()> {
        trace!(src = %self.shape(), dst = %dst.shape(), "copy");
        if !Arc::ptr_eq(&self.device, &dst.device) {
            return Err(ClicError::DeviceMismatch {
                expected: self.device.id().to_string(),
                actual: dst.device.id().to_string(),
            });
        }
        if self.shape() != dst.shape() || self.dtype() != dst.dtype() {
            return Err(ClicError::SizeMismatch {
                expected: self.nbytes(),
                actual: dst.nbytes(),
            });
        }
        if std::ptr::eq(self, dst) {
            return Ok(());
        }
        self.device.ensure_valid()?;
        self.device.copy_memory(&self.memory, &self.layout, &dst.memory, &dst.layout)
    }

    fn check_host_size(&self, actual: usize) -> ClicResult<()> {
        let expected = self.nbytes();
        if actual != expected {
            return Err(ClicError::SizeMismatch { expected, actual });
        }
        Ok(())
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub(crate) fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn shape(&self) -> Shape {
        self.layout.shape
    }

    pub fn width(&self) -> usize {
        self.layout.shape.width()
    }

    pub fn height(&self) -> usize {
        self.layout.shape.height()
    }

    pub fn depth(&self) -> usize {
        self.layout.shape.depth()
    }

    pub fn dim(&self) -> Dimensionality {
        self.layout.shape.dim()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.layout.shape.size()
    }

    /// Host size in bytes.
    pub fn nbytes(&self) -> usize {
        self.layout.host_bytes()
    }

    pub fn strides(&self) -> [usize; 3] {
        self.layout.strides()
    }

    pub fn dtype(&self) -> DataType {
        self.layout.dtype
    }

    pub fn mtype(&self) -> MemoryType {
        self.layout.mtype
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("shape", &self.layout.shape)
            .field("dtype", &self.layout.dtype)
            .field("mtype", &self.layout.mtype)
            .field("pitch", &self.layout.pitch)
            .field("device", &self.device.id())
            .finish()
    }
}
