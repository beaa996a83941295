//! Native device operations abstraction.

use crate::array::MemoryLayout;
use crate::device::DeviceInfo;
use crate::dtype::{DataType, MemoryType, Scalar};
use crate::error::ClicResult;
use crate::kernel::{ArgDesc, BindPlan, DispatchInfo, RangeArray};
use crate::shape::Shape;

/// One kernel argument as handed to a backend.
pub(crate) enum BoundArg<'a, M> {
    Memory { memory: &'a M, layout: &'a MemoryLayout },
    /// Already converted to the formal's type.
    Scalar(Scalar),
}

/// Core native operations of one device context.
///
/// Everything enqueued goes to the context's single in-order queue.
pub(crate) trait DevicePrimitives: Send + Sync + Sized {
    /// Backend-specific allocation.
    type Memory: Send + Sync;
    /// Backend-specific compiled program.
    type Program: Send + Sync;

    /// Opens a context on the enumerated device.
    fn open(info: &DeviceInfo) -> ClicResult<Self>;

    /// Storage layout for an array, enforcing representation rules and
    /// native size limits.
    fn layout(&self, shape: Shape, dtype: DataType, mtype: MemoryType) -> ClicResult<MemoryLayout>;

    /// Zero-initialized allocation.
    fn allocate(&self, layout: &MemoryLayout) -> ClicResult<Self::Memory>;

    /// Uploads tightly packed host bytes.
    fn write(&self, memory: &Self::Memory, layout: &MemoryLayout, data: &[u8]) -> ClicResult<()>;

    /// Downloads into tightly packed host bytes, waiting for queued work.
    fn read(&self, memory: &Self::Memory, layout: &MemoryLayout, data: &mut [u8]) -> ClicResult<()>;

    /// Device-to-device copy between equally shaped arrays.
    fn copy(
        &self,
        src: &Self::Memory,
        src_layout: &MemoryLayout,
        dst: &Self::Memory,
        dst_layout: &MemoryLayout,
    ) -> ClicResult<()>;

    /// Compiles the full program text.
    fn compile(
        &self,
        kernel: &str,
        source: &str,
        plan: &BindPlan,
        args: &[ArgDesc<'_>],
    ) -> ClicResult<Self::Program>;

    /// Enqueues one dispatch covering `range`.
    fn dispatch(
        &self,
        program: &Self::Program,
        args: &[BoundArg<'_, Self::Memory>],
        info: &DispatchInfo,
        range: &RangeArray,
    ) -> ClicResult<()>;

    /// Blocks until every enqueued operation has completed.
    fn synchronize(&self) -> ClicResult<()>;
}
