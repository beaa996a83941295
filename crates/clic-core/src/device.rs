//! Compute devices.
//!
//! A [`Device`] is one opened native device of the active backend: a context,
//! a single in-order queue and a program cache. Devices are shared through
//! `Arc<Device>` and are safe to use from several threads; operations
//! enqueued from one thread complete in enqueue order.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::array::{Array, MemoryLayout};
use crate::backend::{BackendKind, BackendManager, BoundArg, DevicePrimitives};
use crate::dtype::{DataType, MemoryType};
use crate::error::{ClicError, ClicResult};
use crate::kernel::{ArgDesc, BindPlan, CacheStats, DispatchInfo, ProgramCache, ProgramKey, RangeArray};
use crate::shape::Shape;

#[cfg(feature = "cuda")]
use crate::backend::cuda_backend::CudaContext;
#[cfg(feature = "wgpu")]
use crate::backend::wgpu_backend::WgpuContext;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Device class filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceType {
    /// Matches every device.
    #[default]
    All,
    Gpu,
    Cpu,
    Other,
}

impl DeviceType {
    pub const fn name(&self) -> &'static str {
        match self {
            DeviceType::All => "all",
            DeviceType::Gpu => "gpu",
            DeviceType::Cpu => "cpu",
            DeviceType::Other => "other",
        }
    }

    /// True when a device of class `class` passes this filter.
    pub fn matches(&self, class: DeviceType) -> bool {
        *self == DeviceType::All || *self == class
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceType {
    type Err = ClicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(DeviceType::All),
            "gpu" => Ok(DeviceType::Gpu),
            "cpu" => Ok(DeviceType::Cpu),
            "other" => Ok(DeviceType::Other),
            _ => Err(ClicError::NoDeviceFound {
                name: String::new(),
                device_type: s.to_string(),
            }),
        }
    }
}

/// Enumerated native device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub backend: BackendKind,
    /// Position in the backend's enumeration order.
    pub index: usize,
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceType,
    /// Selection preference: discrete 4, integrated 3, virtual 2, cpu 1.
    pub rank: u8,
    pub driver: String,
}

/// Identity of one opened device. `handle` is unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub backend: BackendKind,
    pub platform: usize,
    pub index: usize,
    pub handle: u64,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}#{}", self.backend, self.platform, self.index, self.handle)
    }
}

/// Native context of an opened device.
pub(crate) enum Context {
    #[cfg(feature = "wgpu")]
    Wgpu(WgpuContext),
    #[cfg(feature = "cuda")]
    Cuda(CudaContext),
}

/// Native allocation backing an [`Array`].
pub(crate) enum Memory {
    #[cfg(feature = "wgpu")]
    Wgpu(<WgpuContext as DevicePrimitives>::Memory),
    #[cfg(feature = "cuda")]
    Cuda(<CudaContext as DevicePrimitives>::Memory),
}

pub(crate) enum NativeProgram {
    #[cfg(feature = "wgpu")]
    Wgpu(<WgpuContext as DevicePrimitives>::Program),
    #[cfg(feature = "cuda")]
    Cuda(<CudaContext as DevicePrimitives>::Program),
}

/// Cached program together with the binding it was compiled for.
pub(crate) struct CompiledProgram {
    pub plan: BindPlan,
    pub native: NativeProgram,
}

/// Opened compute device.
pub struct Device {
    id: DeviceId,
    info: DeviceInfo,
    generation: u64,
    manager: &'static BackendManager,
    wait_to_finish: AtomicBool,
    programs: ProgramCache<CompiledProgram>,
    context: Context,
}

impl Device {
    pub(crate) fn create(
        info: DeviceInfo,
        generation: u64,
        manager: &'static BackendManager,
    ) -> ClicResult<Arc<Device>> {
        manager.ensure_current(info.backend, generation)?;
        let context = match info.backend {
            #[cfg(feature = "wgpu")]
            BackendKind::Wgpu => Context::Wgpu(WgpuContext::open(&info)?),
            #[cfg(feature = "cuda")]
            BackendKind::Cuda => Context::Cuda(CudaContext::open(&info)?),
            #[allow(unreachable_patterns)]
            other => return Err(ClicError::UnsupportedBackend(other.name().to_string())),
        };
        let id = DeviceId {
            backend: info.backend,
            platform: 0,
            index: info.index,
            handle: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
        };
        debug!(device = %id, name = %info.name, driver = %info.driver, "Device opened");
        Ok(Arc::new(Device {
            id,
            info,
            generation,
            manager,
            wait_to_finish: AtomicBool::new(false),
            programs: ProgramCache::new(),
            context,
        }))
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn backend(&self) -> BackendKind {
        self.info.backend
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once another backend has been selected.
    pub fn is_valid(&self) -> bool {
        self.manager.is_current(self.info.backend, self.generation)
    }

    pub(crate) fn ensure_valid(&self) -> ClicResult<()> {
        self.manager.ensure_current(self.info.backend, self.generation)
    }

    /// Block after every dispatch until it completes.
    pub fn set_wait_to_finish(&self, wait: bool) {
        self.wait_to_finish.store(wait, Ordering::Relaxed);
    }

    pub fn wait_to_finish(&self) -> bool {
        self.wait_to_finish.load(Ordering::Relaxed)
    }

    /// Blocks until all work enqueued on this device has completed.
    pub fn synchronize(&self) -> ClicResult<()> {
        trace!(device = %self.id, "synchronize");
        self.ensure_valid()?;
        match &self.context {
            #[cfg(feature = "wgpu")]
            Context::Wgpu(ctx) => ctx.synchronize(),
            #[cfg(feature = "cuda")]
            Context::Cuda(ctx) => ctx.synchronize(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.programs.stats()
    }

    pub fn clear_cache(&self) {
        self.programs.clear();
    }

    pub fn is_cached(&self, key: &ProgramKey) -> bool {
        self.programs.contains(key)
    }

    /// Zero-initialized array on this device.
    pub fn allocate(self: &Arc<Self>, shape: Shape, dtype: DataType, mtype: MemoryType) -> ClicResult<Arc<Array>> {
        Array::allocate(self, shape, dtype, mtype)
    }

    /// Array on this device holding `data`; the element type is `T`'s.
    pub fn upload<T: crate::dtype::Element>(
        self: &Arc<Self>,
        data: &[T],
        shape: Shape,
        mtype: MemoryType,
    ) -> ClicResult<Arc<Array>> {
        let array = Array::allocate(self, shape, T::DTYPE, mtype)?;
        array.write(data)?;
        Ok(array)
    }

    pub(crate) fn layout(&self, shape: Shape, dtype: DataType, mtype: MemoryType) -> ClicResult<MemoryLayout> {
        match &self.context {
            #[cfg(feature = "wgpu")]
            Context::Wgpu(ctx) => ctx.layout(shape, dtype, mtype),
            #[cfg(feature = "cuda")]
            Context::Cuda(ctx) => ctx.layout(shape, dtype, mtype),
        }
    }

    pub(crate) fn allocate_memory(&self, layout: &MemoryLayout) -> ClicResult<Memory> {
        match &self.context {
            #[cfg(feature = "wgpu")]
            Context::Wgpu(ctx) => ctx.allocate(layout).map(Memory::Wgpu),
            #[cfg(feature = "cuda")]
            Context::Cuda(ctx) => ctx.allocate(layout).map(Memory::Cuda),
        }
    }

    pub(crate) fn write_memory(&self, memory: &Memory, layout: &MemoryLayout, data: &[u8]) -> ClicResult<()> {
        match (&self.context, memory) {
            #[cfg(feature = "wgpu")]
            (Context::Wgpu(ctx), Memory::Wgpu(memory)) => ctx.write(memory, layout, data),
            #[cfg(feature = "cuda")]
            (Context::Cuda(ctx), Memory::Cuda(memory)) => ctx.write(memory, layout, data),
            #[allow(unreachable_patterns)]
            _ => Err(self.foreign_memory()),
        }
    }

    pub(crate) fn read_memory(&self, memory: &Memory, layout: &MemoryLayout, data: &mut [u8]) -> ClicResult<()> {
        match (&self.context, memory) {
            #[cfg(feature = "wgpu")]
            (Context::Wgpu(ctx), Memory::Wgpu(memory)) => ctx.read(memory, layout, data),
            #[cfg(feature = "cuda")]
            (Context::Cuda(ctx), Memory::Cuda(memory)) => ctx.read(memory, layout, data),
            #[allow(unreachable_patterns)]
            _ => Err(self.foreign_memory()),
        }
    }

    pub(crate) fn copy_memory(
        &self,
        src: &Memory,
        src_layout: &MemoryLayout,
        dst: &Memory,
        dst_layout: &MemoryLayout,
    ) -> ClicResult<()> {
        match (&self.context, src, dst) {
            #[cfg(feature = "wgpu")]
            (Context::Wgpu(ctx), Memory::Wgpu(src), Memory::Wgpu(dst)) => ctx.copy(src, src_layout, dst, dst_layout),
            #[cfg(feature = "cuda")]
            (Context::Cuda(ctx), Memory::Cuda(src), Memory::Cuda(dst)) => ctx.copy(src, src_layout, dst, dst_layout),
            #[allow(unreachable_patterns)]
            _ => Err(self.foreign_memory()),
        }
    }

    /// Cached program for `key`, built and compiled on a miss.
    ///
    /// `prepare` returns the binding plan and the full program text.
    pub(crate) fn program(
        &self,
        key: &ProgramKey,
        args: &[ArgDesc<'_>],
        prepare: impl FnOnce() -> ClicResult<(BindPlan, String)>,
    ) -> ClicResult<Arc<CompiledProgram>> {
        self.programs.get_or_try_insert_with(key, || {
            let (plan, source) = prepare()?;
            let native = match &self.context {
                #[cfg(feature = "wgpu")]
                Context::Wgpu(ctx) => NativeProgram::Wgpu(ctx.compile(&key.kernel, &source, &plan, args)?),
                #[cfg(feature = "cuda")]
                Context::Cuda(ctx) => NativeProgram::Cuda(ctx.compile(&key.kernel, &source, &plan, args)?),
            };
            Ok(CompiledProgram { plan, native })
        })
    }

    /// Enqueues `program` on this device's queue.
    pub(crate) fn dispatch(
        &self,
        program: &CompiledProgram,
        args: &[BoundArg<'_, Memory>],
        info: &DispatchInfo,
        range: &RangeArray,
    ) -> ClicResult<()> {
        match (&self.context, &program.native) {
            #[cfg(feature = "wgpu")]
            (Context::Wgpu(ctx), NativeProgram::Wgpu(native)) => {
                let args = narrow(args, |memory| match memory {
                    Memory::Wgpu(memory) => Some(memory),
                    #[allow(unreachable_patterns)]
                    _ => None,
                })
                .ok_or_else(|| self.foreign_memory())?;
                ctx.dispatch(native, &args, info, range)
            }
            #[cfg(feature = "cuda")]
            (Context::Cuda(ctx), NativeProgram::Cuda(native)) => {
                let args = narrow(args, |memory| match memory {
                    Memory::Cuda(memory) => Some(memory),
                    #[allow(unreachable_patterns)]
                    _ => None,
                })
                .ok_or_else(|| self.foreign_memory())?;
                ctx.dispatch(native, &args, info, range)
            }
            #[allow(unreachable_patterns)]
            _ => Err(self.foreign_memory()),
        }
    }

    fn foreign_memory(&self) -> ClicError {
        ClicError::DeviceMismatch {
            expected: self.id.to_string(),
            actual: "memory of another backend".to_string(),
        }
    }
}

/// Re-types generic bound arguments to one backend's memory.
fn narrow<'a, M>(
    args: &[BoundArg<'a, Memory>],
    pick: impl Fn(&'a Memory) -> Option<&'a M>,
) -> Option<Vec<BoundArg<'a, M>>> {
    args.iter()
        .map(|arg| match arg {
            BoundArg::Memory { memory, layout } => Some(BoundArg::Memory { memory: pick(*memory)?, layout: *layout }),
            BoundArg::Scalar(value) => Some(BoundArg::Scalar(*value)),
        })
        .collect()
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.info.name)
            .field("generation", &self.generation)
            .field("wait_to_finish", &self.wait_to_finish())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_parse() {
        assert_eq!("GPU".parse::<DeviceType>().unwrap(), DeviceType::Gpu);
        assert_eq!("all".parse::<DeviceType>().unwrap(), DeviceType::All);
        assert_eq!("".parse::<DeviceType>().unwrap(), DeviceType::All);
        assert!(matches!(
            "fpga".parse::<DeviceType>(),
            Err(ClicError::NoDeviceFound { ref device_type, .. }) if device_type == "fpga"
        ));
        assert_eq!(DeviceType::Cpu.to_string(), "cpu");
    }

    #[test]
    fn test_device_type_matches() {
        assert!(DeviceType::All.matches(DeviceType::Cpu));
        assert!(DeviceType::All.matches(DeviceType::Gpu));
        assert!(DeviceType::Gpu.matches(DeviceType::Gpu));
        assert!(!DeviceType::Gpu.matches(DeviceType::Cpu));
        assert!(!DeviceType::Cpu.matches(DeviceType::Other));
    }

    #[test]
    fn test_device_id_display() {
        let id = DeviceId { backend: BackendKind::Wgpu, platform: 0, index: 1, handle: 3 };
        assert_eq!(id.to_string(), "wgpu:0.1#3");
    }

    #[cfg(feature = "wgpu")]
    #[test]
    fn test_switch_makes_every_handle_stale() {
        use crate::backend::Backend;
        use crate::kernel::{KernelInfo, ParameterList};

        let manager: &'static BackendManager = Box::leak(Box::new(BackendManager::new(BackendKind::Wgpu)));
        let backend = Backend::new(BackendKind::Wgpu, manager.generation(), manager);
        let Ok(device) = backend.get_device("", DeviceType::All) else { return };
        let src = Array::create(4, 4, 1, DataType::F32, MemoryType::Buffer, &device).unwrap();
        let dst = Array::create_like(&src, None).unwrap();
        assert!(device.is_valid());

        manager.switch(BackendKind::Cuda);
        let stale = |result: ClicResult<()>| {
            let err = result.unwrap_err();
            assert_eq!(err, ClicError::StaleHandle { backend: BackendKind::Wgpu, created: 0, current: 1 });
            assert!(err.invalidates_device());
        };

        assert!(!device.is_valid());
        stale(device.synchronize());
        stale(src.write(&[1.0f32; 16]));
        stale(src.read_vec::<f32>().map(drop));
        stale(src.copy_to(&dst));
        stale(Array::create_like(&src, None).map(drop));
        stale(device.allocate(Shape::new(2, 2, 1).unwrap(), DataType::I32, MemoryType::Image).map(drop));

        let kernel = KernelInfo::from_source("noop", "@compute @workgroup_size(1) fn noop() {}");
        let params = ParameterList::new().with("src", &src).with("dst", &dst);
        stale(crate::execute::execute(&device, &kernel, &params, [4, 4, 1]));
    }
}
