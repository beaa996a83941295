//! wgpu backend implementation.
//!
//! WGSL kernels on Vulkan, Metal, DX12 or GL through wgpu. Buffers are
//! storage buffers; images are single-channel 32-bit 2D storage textures.
//! A volume of depth `d` is one texture of `height * d` rows, slice `z`
//! starting at row `z * height`, so it binds on backends without 3D
//! storage textures.

use std::sync::mpsc;

use tracing::{error, trace};
use wgpu::util::DeviceExt;

use super::primitives::{BoundArg, DevicePrimitives};
use super::{BackendKind, align_up, unpad_rows};
use crate::array::MemoryLayout;
use crate::device::{DeviceInfo, DeviceType};
use crate::dtype::{DataType, MemoryType};
use crate::error::{ClicError, ClicResult};
use crate::kernel::{ArgDesc, ArgKind, BindPlan, DispatchInfo, ImageAccess, RangeArray, SlotPlan};
use crate::shape::Shape;

/// Scalar uniforms are padded to one 16-byte slot.
const UNIFORM_SLOT: usize = 16;

/// Native allocation of one array.
pub(crate) enum WgpuMemory {
    Buffer(wgpu::Buffer),
    Texture { texture: wgpu::Texture, view: wgpu::TextureView },
}

/// Compiled compute pipeline and its explicit bind group layout.
pub(crate) struct WgpuProgram {
    kernel: String,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    workgroup_size: [u32; 3],
}

/// Opened wgpu device with its queue.
pub(crate) struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
    features: wgpu::Features,
}

fn instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Adapters in wgpu's enumeration order.
pub(crate) fn enumerate() -> ClicResult<Vec<DeviceInfo>> {
    let adapters = instance().enumerate_adapters(wgpu::Backends::all());
    Ok(adapters
        .iter()
        .enumerate()
        .map(|(index, adapter)| device_info(index, &adapter.get_info()))
        .collect())
}

/// Device class and selection rank of an adapter type.
fn classify(device_type: wgpu::DeviceType) -> (DeviceType, u8) {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => (DeviceType::Gpu, 4),
        wgpu::DeviceType::IntegratedGpu => (DeviceType::Gpu, 3),
        wgpu::DeviceType::VirtualGpu => (DeviceType::Gpu, 2),
        wgpu::DeviceType::Cpu => (DeviceType::Cpu, 1),
        wgpu::DeviceType::Other => (DeviceType::Other, 0),
    }
}

fn device_info(index: usize, info: &wgpu::AdapterInfo) -> DeviceInfo {
    let (device_type, rank) = classify(info.device_type);
    DeviceInfo {
        backend: BackendKind::Wgpu,
        index,
        name: info.name.clone(),
        vendor: format!("{:#06x}", info.vendor),
        device_type,
        rank,
        driver: format!("{:?} {} {}", info.backend, info.driver, info.driver_info).trim().to_string(),
    }
}

fn texture_format(dtype: DataType) -> wgpu::TextureFormat {
    match dtype {
        DataType::I32 => wgpu::TextureFormat::R32Sint,
        DataType::U32 => wgpu::TextureFormat::R32Uint,
        _ => wgpu::TextureFormat::R32Float,
    }
}

fn sample_type(dtype: DataType) -> wgpu::TextureSampleType {
    match dtype {
        DataType::I32 => wgpu::TextureSampleType::Sint,
        DataType::U32 => wgpu::TextureSampleType::Uint,
        _ => wgpu::TextureSampleType::Float { filterable: false },
    }
}

/// Texture extent of an image, slices stacked along y.
fn extent(shape: Shape) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: shape.width() as u32,
        height: (shape.height() * shape.depth()) as u32,
        depth_or_array_layers: 1,
    }
}

/// Whether the device can hold `dtype` in a storage buffer.
fn buffer_supported(features: wgpu::Features, dtype: DataType) -> bool {
    match dtype {
        DataType::I64 | DataType::U64 => features.contains(wgpu::Features::SHADER_INT64),
        DataType::F64 => features.contains(wgpu::Features::SHADER_F64),
        _ => true,
    }
}

fn whole(texture: &wgpu::Texture) -> wgpu::TexelCopyTextureInfo<'_> {
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: 0,
        origin: wgpu::Origin3d::ZERO,
        aspect: wgpu::TextureAspect::All,
    }
}

fn storage_buffer(read_only: bool) -> wgpu::BindingType {
    wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Storage { read_only },
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

fn uniform_buffer() -> wgpu::BindingType {
    wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Uniform,
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

fn storage_texture(access: wgpu::StorageTextureAccess, dtype: DataType) -> wgpu::BindingType {
    wgpu::BindingType::StorageTexture {
        access,
        format: texture_format(dtype),
        view_dimension: wgpu::TextureViewDimension::D2,
    }
}

impl WgpuContext {
    /// Runs `f` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        (value, validation.or(oom))
    }

    /// Runs queue work in error scopes; any captured error is a device error.
    fn checked(&self, what: &str, f: impl FnOnce()) -> ClicResult<()> {
        match self.scoped(f).1 {
            Some(e) => Err(ClicError::DeviceError(format!("{what} failed: {e}"))),
            None => Ok(()),
        }
    }

    fn allocation_error(layout: &MemoryLayout, error: wgpu::Error) -> ClicError {
        match error {
            wgpu::Error::OutOfMemory { .. } => ClicError::OutOfDeviceMemory {
                bytes: layout.native_bytes(),
                reason: error.to_string(),
            },
            other => ClicError::DeviceError(other.to_string()),
        }
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn staging(&self, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("clic_staging"),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Maps `staging` for reading once queued work is done and hands the
    /// bytes to `f`.
    fn map_read(&self, staging: &wgpu::Buffer, f: impl FnOnce(&[u8])) -> ClicResult<()> {
        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| ClicError::DeviceError("buffer mapping was abandoned".into()))?
            .map_err(|e| ClicError::DeviceError(format!("buffer mapping failed: {e}")))?;
        {
            let view = slice.get_mapped_range();
            f(&view);
        }
        staging.unmap();
        Ok(())
    }

    /// Padded row size for texture/buffer copies.
    fn copy_pitch(layout: &MemoryLayout) -> u64 {
        align_up(layout.row_bytes() as u64, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64)
    }

    fn texel_layout(bytes_per_row: u64, layout: &MemoryLayout) -> wgpu::TexelCopyBufferLayout {
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_row as u32),
            rows_per_image: Some(layout.rows() as u32),
        }
    }

    fn uniform(&self, contents: &[u8]) -> wgpu::Buffer {
        let mut slot = [0u8; UNIFORM_SLOT];
        slot[..contents.len()].copy_from_slice(contents);
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("clic_scalar"),
            contents: &slot,
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }
}

impl DevicePrimitives for WgpuContext {
    type Memory = WgpuMemory;
    type Program = WgpuProgram;

    fn open(info: &DeviceInfo) -> ClicResult<Self> {
        let adapter = instance()
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .nth(info.index)
            .filter(|adapter| adapter.get_info().name == info.name)
            .ok_or_else(|| ClicError::DeviceInitError(format!("adapter '{}' is no longer present", info.name)))?;

        let wanted = wgpu::Features::SHADER_F64
            | wgpu::Features::SHADER_INT64
            | wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        let limits = adapter.limits();
        let features = adapter.features() & wanted;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("clic_device"),
                required_features: features,
                required_limits: limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            },
            None,
        ))
        .map_err(|e| ClicError::DeviceInitError(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|e: wgpu::Error| {
            error!(error = %e, "Uncaptured wgpu error");
        }));

        Ok(Self { device, queue, limits, features })
    }

    fn layout(&self, shape: Shape, dtype: DataType, mtype: MemoryType) -> ClicResult<MemoryLayout> {
        let host = (shape.size() * dtype.size()) as u64;
        match mtype {
            MemoryType::Buffer => {
                if !buffer_supported(self.features, dtype) {
                    return Err(ClicError::UnsupportedFormat { dtype, mtype, backend: BackendKind::Wgpu });
                }
                let bytes = align_up(host, 4);
                let limit = self
                    .limits
                    .max_buffer_size
                    .min(self.limits.max_storage_buffer_binding_size as u64);
                if bytes > limit {
                    return Err(ClicError::OutOfDeviceMemory {
                        bytes,
                        reason: format!("exceeds the {limit} byte buffer limit"),
                    });
                }
                Ok(MemoryLayout::new(shape, dtype, mtype, shape.width(), bytes))
            }
            MemoryType::Image => {
                if !matches!(dtype, DataType::F32 | DataType::I32 | DataType::U32) {
                    return Err(ClicError::UnsupportedFormat { dtype, mtype, backend: BackendKind::Wgpu });
                }
                let limit = self.limits.max_texture_dimension_2d as usize;
                if shape.width() > limit || shape.height() * shape.depth() > limit {
                    return Err(ClicError::OutOfDeviceMemory {
                        bytes: host,
                        reason: format!("{shape} exceeds the {limit} texel texture limit"),
                    });
                }
                Ok(MemoryLayout::new(shape, dtype, mtype, shape.width(), host))
            }
        }
    }

    fn allocate(&self, layout: &MemoryLayout) -> ClicResult<WgpuMemory> {
        let (memory, error) = self.scoped(|| match layout.mtype() {
            MemoryType::Buffer => WgpuMemory::Buffer(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("clic_buffer"),
                size: layout.native_bytes(),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })),
            MemoryType::Image => {
                let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("clic_image"),
                    size: extent(layout.shape()),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: texture_format(layout.dtype()),
                    usage: wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::STORAGE_BINDING
                        | wgpu::TextureUsages::COPY_SRC
                        | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                WgpuMemory::Texture { texture, view }
            }
        });
        match error {
            Some(e) => Err(Self::allocation_error(layout, e)),
            None => Ok(memory),
        }
    }

    fn write(&self, memory: &WgpuMemory, layout: &MemoryLayout, data: &[u8]) -> ClicResult<()> {
        self.checked("write", || match memory {
            WgpuMemory::Buffer(buffer) => {
                if data.len() as u64 == layout.native_bytes() {
                    self.queue.write_buffer(buffer, 0, data);
                } else {
                    // Sub-word element counts are padded to the copy alignment
                    let mut padded = data.to_vec();
                    padded.resize(layout.native_bytes() as usize, 0);
                    self.queue.write_buffer(buffer, 0, &padded);
                }
            }
            WgpuMemory::Texture { texture, .. } => {
                self.queue.write_texture(
                    whole(texture),
                    data,
                    Self::texel_layout(layout.row_bytes() as u64, layout),
                    extent(layout.shape()),
                );
            }
        })
    }

    fn read(&self, memory: &WgpuMemory, layout: &MemoryLayout, data: &mut [u8]) -> ClicResult<()> {
        let usage = wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST;
        let mut encoder = self.encoder("clic_read");
        match memory {
            WgpuMemory::Buffer(buffer) => {
                let staging = self.staging(layout.native_bytes(), usage);
                self.checked("read", || {
                    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, layout.native_bytes());
                    self.submit(encoder);
                })?;
                self.map_read(&staging, |bytes| data.copy_from_slice(&bytes[..data.len()]))
            }
            WgpuMemory::Texture { texture, .. } => {
                let pitch = Self::copy_pitch(layout);
                let staging = self.staging(pitch * layout.rows() as u64, usage);
                self.checked("read", || {
                    encoder.copy_texture_to_buffer(
                        whole(texture),
                        wgpu::TexelCopyBufferInfo {
                            buffer: &staging,
                            layout: Self::texel_layout(pitch, layout),
                        },
                        extent(layout.shape()),
                    );
                    self.submit(encoder);
                })?;
                self.map_read(&staging, |bytes| {
                    unpad_rows(bytes, layout.row_bytes(), pitch as usize, layout.rows(), data)
                })
            }
        }
    }

    fn copy(
        &self,
        src: &WgpuMemory,
        src_layout: &MemoryLayout,
        dst: &WgpuMemory,
        dst_layout: &MemoryLayout,
    ) -> ClicResult<()> {
        let mut encoder = self.encoder("clic_copy");
        let rows = src_layout.rows() as u64;
        let row_bytes = src_layout.row_bytes() as u64;
        let usage = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;

        self.checked("copy", || {
            match (src, dst) {
                (WgpuMemory::Buffer(src), WgpuMemory::Buffer(dst)) => {
                    encoder.copy_buffer_to_buffer(src, 0, dst, 0, src_layout.native_bytes());
                }
                (WgpuMemory::Texture { texture: src, .. }, WgpuMemory::Texture { texture: dst, .. }) => {
                    encoder.copy_texture_to_texture(whole(src), whole(dst), extent(src_layout.shape()));
                }
                (WgpuMemory::Texture { texture, .. }, WgpuMemory::Buffer(buffer)) => {
                    let pitch = Self::copy_pitch(src_layout);
                    let staging = self.staging(pitch * rows, usage);
                    encoder.copy_texture_to_buffer(
                        whole(texture),
                        wgpu::TexelCopyBufferInfo {
                            buffer: &staging,
                            layout: Self::texel_layout(pitch, src_layout),
                        },
                        extent(src_layout.shape()),
                    );
                    for row in 0..rows {
                        encoder.copy_buffer_to_buffer(&staging, row * pitch, buffer, row * row_bytes, row_bytes);
                    }
                }
                (WgpuMemory::Buffer(buffer), WgpuMemory::Texture { texture, .. }) => {
                    let pitch = Self::copy_pitch(dst_layout);
                    let staging = self.staging(pitch * rows, usage);
                    for row in 0..rows {
                        encoder.copy_buffer_to_buffer(buffer, row * row_bytes, &staging, row * pitch, row_bytes);
                    }
                    encoder.copy_buffer_to_texture(
                        wgpu::TexelCopyBufferInfo {
                            buffer: &staging,
                            layout: Self::texel_layout(pitch, dst_layout),
                        },
                        whole(texture),
                        extent(dst_layout.shape()),
                    );
                }
            }
            self.submit(encoder);
        })
    }

    fn compile(
        &self,
        kernel: &str,
        source: &str,
        plan: &BindPlan,
        args: &[ArgDesc<'_>],
    ) -> ClicResult<WgpuProgram> {
        let workgroup_size = plan
            .workgroup_size
            .ok_or_else(|| ClicError::compile(kernel, "entry point has no @workgroup_size"))?;

        let mut entries = Vec::with_capacity(args.len() + 1);
        for (binding, (slot, arg)) in plan.slots.iter().zip(args).enumerate() {
            let ty = match (*slot, arg.kind) {
                (SlotPlan::Scalar { .. }, _) => uniform_buffer(),
                (SlotPlan::Buffer { read_only }, _) => storage_buffer(read_only),
                (SlotPlan::RuntimeArray, ArgKind::Array { mtype: MemoryType::Buffer, .. }) => storage_buffer(false),
                (SlotPlan::RuntimeArray, ArgKind::Array { dtype, .. }) => {
                    storage_texture(wgpu::StorageTextureAccess::ReadWrite, dtype)
                }
                (SlotPlan::Image { access }, ArgKind::Array { dtype, .. }) => match access {
                    ImageAccess::Sampled => wgpu::BindingType::Texture {
                        sample_type: sample_type(dtype),
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    ImageAccess::Read => storage_texture(wgpu::StorageTextureAccess::ReadOnly, dtype),
                    ImageAccess::Write => storage_texture(wgpu::StorageTextureAccess::WriteOnly, dtype),
                    ImageAccess::ReadWrite => storage_texture(wgpu::StorageTextureAccess::ReadWrite, dtype),
                },
                (_, ArgKind::Scalar) => {
                    return Err(ClicError::binding(kernel, format!("scalar '{}' bound as an array", arg.name)));
                }
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty,
                count: None,
            });
        }
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: args.len() as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: uniform_buffer(),
            count: None,
        });

        let ((pipeline, bind_group_layout), error) = self.scoped(|| {
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kernel),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(kernel),
                entries: &entries,
            });
            let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(kernel),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
            let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(kernel),
                compilation_options: Default::default(),
                cache: None,
            });
            (pipeline, bind_group_layout)
        });
        if let Some(e) = error {
            return Err(ClicError::compile(kernel, e.to_string()));
        }

        Ok(WgpuProgram {
            kernel: kernel.to_string(),
            pipeline,
            bind_group_layout,
            workgroup_size,
        })
    }

    fn dispatch(
        &self,
        program: &WgpuProgram,
        args: &[BoundArg<'_, WgpuMemory>],
        info: &DispatchInfo,
        range: &RangeArray,
    ) -> ClicResult<()> {
        let groups = range.groups(program.workgroup_size);
        let max_groups = self.limits.max_compute_workgroups_per_dimension as u64;
        if groups.iter().any(|&g| g > max_groups) {
            return Err(ClicError::binding(
                &program.kernel,
                format!("range {range:?} needs {groups:?} workgroups, the device allows {max_groups} per dimension"),
            ));
        }
        trace!(kernel = %program.kernel, ?groups, "dispatch");

        let uniforms: Vec<wgpu::Buffer> = args
            .iter()
            .filter_map(|arg| match arg {
                BoundArg::Scalar(value) => Some(self.uniform(&value.to_bytes())),
                BoundArg::Memory { .. } => None,
            })
            .collect();
        let info_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("clic_info"),
            contents: bytemuck::bytes_of(info),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut scalars = uniforms.iter();
        let mut entries = Vec::with_capacity(args.len() + 1);
        for (binding, arg) in args.iter().enumerate() {
            let resource = match arg {
                BoundArg::Memory { memory: WgpuMemory::Buffer(buffer), .. } => buffer.as_entire_binding(),
                BoundArg::Memory { memory: WgpuMemory::Texture { view, .. }, .. } => {
                    wgpu::BindingResource::TextureView(view)
                }
                BoundArg::Scalar(_) => scalars
                    .next()
                    .ok_or_else(|| ClicError::binding(&program.kernel, "scalar uniform missing"))?
                    .as_entire_binding(),
            };
            entries.push(wgpu::BindGroupEntry { binding: binding as u32, resource });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: args.len() as u32,
            resource: info_buffer.as_entire_binding(),
        });

        // Usage conflicts between bindings only surface when the pass is
        // recorded and submitted, so the whole dispatch runs in one scope.
        let ((), error) = self.scoped(|| {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(program.kernel.as_str()),
                layout: &program.bind_group_layout,
                entries: &entries,
            });
            let mut encoder = self.encoder(&program.kernel);
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(program.kernel.as_str()),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&program.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups[0] as u32, groups[1] as u32, groups[2] as u32);
            }
            self.submit(encoder);
        });
        match error {
            Some(e @ wgpu::Error::Validation { .. }) => Err(ClicError::binding(&program.kernel, e.to_string())),
            Some(e) => Err(ClicError::DeviceError(format!("dispatch of '{}' failed: {e}", program.kernel))),
            None => Ok(()),
        }
    }

    fn synchronize(&self) -> ClicResult<()> {
        self.queue.submit(std::iter::empty());
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_classes() {
        assert_eq!(classify(wgpu::DeviceType::DiscreteGpu), (DeviceType::Gpu, 4));
        assert_eq!(classify(wgpu::DeviceType::IntegratedGpu), (DeviceType::Gpu, 3));
        assert_eq!(classify(wgpu::DeviceType::VirtualGpu), (DeviceType::Gpu, 2));
        assert_eq!(classify(wgpu::DeviceType::Cpu), (DeviceType::Cpu, 1));
        assert_eq!(classify(wgpu::DeviceType::Other), (DeviceType::Other, 0));
    }

    #[test]
    fn test_texture_mapping() {
        assert_eq!(texture_format(DataType::F32), wgpu::TextureFormat::R32Float);
        assert_eq!(texture_format(DataType::I32), wgpu::TextureFormat::R32Sint);
    }

    #[test]
    fn test_volume_extent_stacks_slices() {
        let volume = extent(Shape::new(10, 5, 2).unwrap());
        assert_eq!((volume.width, volume.height, volume.depth_or_array_layers), (10, 10, 1));
        let plane = extent(Shape::new(7, 3, 1).unwrap());
        assert_eq!((plane.width, plane.height, plane.depth_or_array_layers), (7, 3, 1));
    }

    #[test]
    fn test_wide_buffers_need_device_features() {
        let none = wgpu::Features::empty();
        assert!(buffer_supported(none, DataType::F32));
        assert!(buffer_supported(none, DataType::U8));
        assert!(!buffer_supported(none, DataType::I64));
        assert!(!buffer_supported(none, DataType::U64));
        assert!(!buffer_supported(none, DataType::F64));
        assert!(buffer_supported(wgpu::Features::SHADER_INT64, DataType::U64));
        assert!(!buffer_supported(wgpu::Features::SHADER_INT64, DataType::F64));
        assert!(buffer_supported(wgpu::Features::SHADER_F64, DataType::F64));
    }
}
