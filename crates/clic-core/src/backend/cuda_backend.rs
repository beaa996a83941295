//! CUDA compute backend.
//!
//! Requires the `cuda` feature and an NVIDIA driver. Kernels are CUDA C++
//! compiled at run time by NVRTC. Buffers are linear allocations; images are
//! pitched allocations whose rows are 256-byte aligned.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use cudarc::driver::{
    CudaContext as NativeContext, CudaFunction, CudaModule, CudaSlice, CudaStream, DeviceRepr, DriverError,
    LaunchConfig, PushKernelArg, sys::CUresult,
};
use tracing::{trace, warn};

use super::primitives::{BoundArg, DevicePrimitives};
use super::{BackendKind, align_up, default_block};
use crate::array::MemoryLayout;
use crate::device::{DeviceInfo, DeviceType};
use crate::dtype::{DataType, MemoryType, Scalar};
use crate::error::{ClicError, ClicResult};
use crate::kernel::{ArgDesc, BindPlan, DispatchInfo, RangeArray};
use crate::shape::Shape;

/// Row alignment of image allocations, in bytes.
const IMAGE_PITCH_ALIGNMENT: u64 = 256;

/// Grid limit along y and z.
const MAX_GRID_YZ: u64 = 65_535;

// SAFETY: `DispatchInfo` is `repr(C)`, `Pod` and matches `clic_info_t`.
#[allow(unsafe_code)]
unsafe impl DeviceRepr for DispatchInfo {}

/// Device allocation. Writers take the lock exclusively; launches share it.
pub(crate) struct CudaMemory {
    slice: RwLock<CudaSlice<u8>>,
}

impl CudaMemory {
    fn read(&self) -> RwLockReadGuard<'_, CudaSlice<u8>> {
        self.slice.read().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct CudaProgram {
    kernel: String,
    /// Module kept alive for the function's lifetime.
    #[allow(dead_code)]
    module: Arc<CudaModule>,
    function: CudaFunction,
    takes_info: bool,
}

/// Opened CUDA device with its default stream.
pub(crate) struct CudaContext {
    ctx: Arc<NativeContext>,
    stream: Arc<CudaStream>,
}

fn driver_error(what: &str, e: DriverError) -> ClicError {
    ClicError::DeviceError(format!("{what}: {e:?}"))
}

fn is_out_of_memory(e: &DriverError) -> bool {
    e.0 == CUresult::CUDA_ERROR_OUT_OF_MEMORY
}

/// Runs a driver call that may panic when the CUDA library cannot be loaded.
fn guarded<T>(f: impl FnOnce() -> Result<T, DriverError>) -> ClicResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(|e| ClicError::DeviceInitError(format!("CUDA driver: {e:?}"))),
        Err(_) => Err(ClicError::DeviceInitError("CUDA driver library not found".into())),
    }
}

/// CUDA devices by ordinal. A missing driver yields an empty list.
pub(crate) fn enumerate() -> ClicResult<Vec<DeviceInfo>> {
    let count = match guarded(NativeContext::device_count) {
        Ok(count) => count.max(0) as usize,
        Err(e) => {
            warn!(error = %e, "CUDA unavailable");
            return Ok(Vec::new());
        }
    };
    let mut devices = Vec::with_capacity(count);
    for index in 0..count {
        let name = guarded(|| NativeContext::new(index).and_then(|ctx| ctx.name()))
            .unwrap_or_else(|_| format!("CUDA device {index}"));
        devices.push(DeviceInfo {
            backend: BackendKind::Cuda,
            index,
            name,
            vendor: "NVIDIA".to_string(),
            device_type: DeviceType::Gpu,
            rank: 4,
            driver: "CUDA".to_string(),
        });
    }
    Ok(devices)
}

/// Element range of one stored row.
fn row_range(layout: &MemoryLayout, row: usize, pitch_bytes: usize) -> Range<usize> {
    let start = row * pitch_bytes;
    start..start + layout.row_bytes()
}

impl DevicePrimitives for CudaContext {
    type Memory = CudaMemory;
    type Program = CudaProgram;

    fn open(info: &DeviceInfo) -> ClicResult<Self> {
        let ctx = guarded(|| NativeContext::new(info.index))?;
        let stream = ctx.default_stream();
        Ok(Self { ctx, stream })
    }

    fn layout(&self, shape: Shape, dtype: DataType, mtype: MemoryType) -> ClicResult<MemoryLayout> {
        match mtype {
            MemoryType::Buffer => {
                let bytes = (shape.size() * dtype.size()) as u64;
                Ok(MemoryLayout::new(shape, dtype, mtype, shape.width(), bytes))
            }
            MemoryType::Image => {
                if dtype.size() != 4 {
                    return Err(ClicError::UnsupportedFormat { dtype, mtype, backend: BackendKind::Cuda });
                }
                let pitch_bytes = align_up((shape.width() * dtype.size()) as u64, IMAGE_PITCH_ALIGNMENT);
                let rows = (shape.height() * shape.depth()) as u64;
                let pitch = pitch_bytes as usize / dtype.size();
                Ok(MemoryLayout::new(shape, dtype, mtype, pitch, pitch_bytes * rows))
            }
        }
    }

    fn allocate(&self, layout: &MemoryLayout) -> ClicResult<CudaMemory> {
        let slice = self
            .stream
            .alloc_zeros::<u8>(layout.native_bytes() as usize)
            .map_err(|e| {
                if is_out_of_memory(&e) {
                    ClicError::OutOfDeviceMemory {
                        bytes: layout.native_bytes(),
                        reason: format!("{e:?}"),
                    }
                } else {
                    driver_error("allocation failed", e)
                }
            })?;
        Ok(CudaMemory { slice: RwLock::new(slice) })
    }

    fn write(&self, memory: &CudaMemory, layout: &MemoryLayout, data: &[u8]) -> ClicResult<()> {
        let mut slice = memory.slice.write().unwrap_or_else(PoisonError::into_inner);
        let pitch_bytes = layout.pitch_bytes();
        if pitch_bytes == layout.row_bytes() {
            let mut view = slice.slice_mut(0..data.len());
            self.stream
                .memcpy_htod(data, &mut view)
                .map_err(|e| driver_error("upload failed", e))?;
        } else {
            for (row, chunk) in data.chunks_exact(layout.row_bytes()).enumerate() {
                let mut view = slice.slice_mut(row_range(layout, row, pitch_bytes));
                self.stream
                    .memcpy_htod(chunk, &mut view)
                    .map_err(|e| driver_error("upload failed", e))?;
            }
        }
        Ok(())
    }

    fn read(&self, memory: &CudaMemory, layout: &MemoryLayout, data: &mut [u8]) -> ClicResult<()> {
        let slice = memory.read();
        let host = self
            .stream
            .clone_dtoh(&*slice)
            .map_err(|e| driver_error("download failed", e))?;
        super::unpad_rows(&host, layout.row_bytes(), layout.pitch_bytes(), layout.rows(), data);
        Ok(())
    }

    fn copy(
        &self,
        src: &CudaMemory,
        src_layout: &MemoryLayout,
        dst: &CudaMemory,
        dst_layout: &MemoryLayout,
    ) -> ClicResult<()> {
        let source = src.read();
        let mut target = dst.slice.write().unwrap_or_else(PoisonError::into_inner);
        let (src_pitch, dst_pitch) = (src_layout.pitch_bytes(), dst_layout.pitch_bytes());
        if src_pitch == dst_pitch {
            let bytes = src_pitch * src_layout.rows();
            let view = source.slice(0..bytes);
            let mut out = target.slice_mut(0..bytes);
            return self
                .stream
                .memcpy_dtod(&view, &mut out)
                .map_err(|e| driver_error("copy failed", e));
        }
        for row in 0..src_layout.rows() {
            let view = source.slice(row_range(src_layout, row, src_pitch));
            let mut out = target.slice_mut(row_range(dst_layout, row, dst_pitch));
            self.stream
                .memcpy_dtod(&view, &mut out)
                .map_err(|e| driver_error("copy failed", e))?;
        }
        Ok(())
    }

    fn compile(
        &self,
        kernel: &str,
        source: &str,
        plan: &BindPlan,
        _args: &[ArgDesc<'_>],
    ) -> ClicResult<CudaProgram> {
        let ptx = cudarc::nvrtc::compile_ptx(source).map_err(|e| ClicError::compile(kernel, format!("{e:?}")))?;
        let module = self
            .ctx
            .load_module(ptx)
            .map_err(|e| ClicError::compile(kernel, format!("module load failed: {e:?}")))?;
        let function = module
            .load_function(kernel)
            .map_err(|e| ClicError::compile(kernel, format!("entry point not found: {e:?}")))?;
        Ok(CudaProgram {
            kernel: kernel.to_string(),
            module,
            function,
            takes_info: plan.takes_info,
        })
    }

    fn dispatch(
        &self,
        program: &CudaProgram,
        args: &[BoundArg<'_, CudaMemory>],
        info: &DispatchInfo,
        range: &RangeArray,
    ) -> ClicResult<()> {
        let block = default_block(range.dim());
        let groups = range.groups(block);
        if groups[0] > i32::MAX as u64 || groups[1] > MAX_GRID_YZ || groups[2] > MAX_GRID_YZ {
            return Err(ClicError::binding(
                &program.kernel,
                format!("range {range:?} needs a {groups:?} grid, beyond the device limits"),
            ));
        }
        let cfg = LaunchConfig {
            grid_dim: (groups[0] as u32, groups[1] as u32, groups[2] as u32),
            block_dim: (block[0], block[1], block[2]),
            shared_mem_bytes: 0,
        };
        trace!(kernel = %program.kernel, ?groups, ?block, "launch");

        let guards: Vec<Option<RwLockReadGuard<'_, CudaSlice<u8>>>> = args
            .iter()
            .map(|arg| match arg {
                BoundArg::Memory { memory, .. } => Some(memory.read()),
                BoundArg::Scalar(_) => None,
            })
            .collect();

        let mut builder = self.stream.launch_builder(&program.function);
        for (arg, guard) in args.iter().zip(&guards) {
            match (arg, guard) {
                (_, Some(slice)) => {
                    builder.arg(&**slice);
                }
                (BoundArg::Scalar(value), None) => push_scalar(&mut builder, value),
                (BoundArg::Memory { .. }, None) => {
                    return Err(ClicError::binding(&program.kernel, "array argument without memory"));
                }
            }
        }
        if program.takes_info {
            builder.arg(info);
        }

        #[allow(unsafe_code)]
        unsafe { builder.launch(cfg) }.map_err(|e| driver_error(&format!("launch of '{}' failed", program.kernel), e))?;
        Ok(())
    }

    fn synchronize(&self) -> ClicResult<()> {
        self.stream
            .synchronize()
            .map_err(|e| driver_error("synchronize failed", e))
    }
}

fn push_scalar<'a>(builder: &mut cudarc::driver::LaunchArgs<'a>, value: &'a Scalar) {
    match value {
        Scalar::I8(v) => builder.arg(v),
        Scalar::U8(v) => builder.arg(v),
        Scalar::I16(v) => builder.arg(v),
        Scalar::U16(v) => builder.arg(v),
        Scalar::I32(v) => builder.arg(v),
        Scalar::U32(v) => builder.arg(v),
        Scalar::I64(v) => builder.arg(v),
        Scalar::U64(v) => builder.arg(v),
        Scalar::F32(v) => builder.arg(v),
        Scalar::F64(v) => builder.arg(v),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_info_is_device_sized() {
        assert_eq!(std::mem::size_of::<DispatchInfo>(), 4 * 4 + 8 * 4 * 4);
    }

    #[test]
    fn test_guarded_panics_become_errors() {
        let result: ClicResult<()> = guarded(|| panic!("library missing"));
        assert!(matches!(result, Err(ClicError::DeviceInitError(_))));
    }
}
