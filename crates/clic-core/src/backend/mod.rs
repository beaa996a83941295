//! Compute backends.
//!
//! Provides wgpu and CUDA backends behind one process-wide selection.
//!
//! # Architecture
//!
//! ```text
//! BackendManager (process-wide, generation counted)
//!     +-- Backend (capability for the active tag)
//!             +-- DevicePrimitives trait
//!                     +-- WgpuContext (WGSL via naga)
//!                     +-- CudaContext (CUDA C++ via NVRTC)
//! ```
//!
//! Array bookkeeping and validation are backend-agnostic; only context
//! creation, allocation, transfers, compilation and enqueue go through
//! [`DevicePrimitives`].

mod detect;
mod manager;
mod primitives;

#[cfg(feature = "wgpu")]
pub(crate) mod wgpu_backend;

#[cfg(feature = "cuda")]
pub(crate) mod cuda_backend;

#[cfg(not(any(feature = "wgpu", feature = "cuda")))]
compile_error!("clic-core needs at least one backend feature: `wgpu` or `cuda`");

pub use detect::{BackendInfo, describe_backends, detect_backends, select_best_backend};
pub use manager::BackendManager;
pub(crate) use primitives::{BoundArg, DevicePrimitives};

use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::trace;

use crate::device::{Device, DeviceInfo, DeviceType};
use crate::error::{ClicError, ClicResult};
use crate::shape::Dimensionality;

/// Native compute API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BackendKind {
    /// WebGPU via wgpu (Vulkan/Metal/DX12), WGSL kernels.
    Wgpu,
    /// NVIDIA CUDA driver API, CUDA C++ kernels compiled by NVRTC.
    Cuda,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Wgpu, BackendKind::Cuda];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Wgpu => "wgpu",
            Self::Cuda => "cuda",
        }
    }

    /// True when this backend's cargo feature is enabled.
    pub const fn is_compiled(&self) -> bool {
        match self {
            Self::Wgpu => cfg!(feature = "wgpu"),
            Self::Cuda => cfg!(feature = "cuda"),
        }
    }

    /// Compiled-in backends.
    pub fn compiled() -> Vec<BackendKind> {
        Self::ALL.into_iter().filter(|kind| kind.is_compiled()).collect()
    }

    /// True when the native library loads and reports at least one device.
    pub fn is_available(&self) -> bool {
        enumerate(*self).is_ok_and(|devices| !devices.is_empty())
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = ClicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wgpu" | "webgpu" => Ok(Self::Wgpu),
            "cuda" => Ok(Self::Cuda),
            _ => Err(ClicError::UnsupportedBackend(s.to_string())),
        }
    }
}

/// Capability object for one backend, handed out by [`BackendManager`].
///
/// Stateless beyond enumeration. It remembers the manager generation it was
/// issued under; once another backend is selected it only yields
/// [`ClicError::StaleHandle`].
#[derive(Clone, Copy)]
pub struct Backend {
    kind: BackendKind,
    generation: u64,
    manager: &'static BackendManager,
}

impl Backend {
    pub(crate) fn new(kind: BackendKind, generation: u64, manager: &'static BackendManager) -> Self {
        Self { kind, generation, manager }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_available(&self) -> bool {
        self.kind.is_available()
    }

    /// Devices of this backend matching `device_type`, in enumeration order.
    pub fn devices(&self, device_type: DeviceType) -> ClicResult<Vec<DeviceInfo>> {
        self.manager.ensure_current(self.kind, self.generation)?;
        Ok(enumerate(self.kind)?
            .into_iter()
            .filter(|info| device_type.matches(info.device_type))
            .collect())
    }

    /// Opens the best-ranked device whose name contains `name`
    /// (case-insensitive; empty matches all) and whose type matches.
    pub fn get_device(&self, name: &str, device_type: DeviceType) -> ClicResult<Arc<Device>> {
        trace!(backend = %self.kind, name, device_type = %device_type, "get_device");
        let devices = self.devices(DeviceType::All)?;
        let info = select_device(&devices, name, device_type).ok_or_else(|| ClicError::NoDeviceFound {
            name: name.to_string(),
            device_type: device_type.to_string(),
        })?;
        Device::create(info.clone(), self.generation, self.manager)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .finish()
    }
}

impl PartialEq for Backend {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.generation == other.generation
            && std::ptr::eq(self.manager, other.manager)
    }
}

/// Native devices of `kind` in deterministic enumeration order.
pub(crate) fn enumerate(kind: BackendKind) -> ClicResult<Vec<DeviceInfo>> {
    match kind {
        #[cfg(feature = "wgpu")]
        BackendKind::Wgpu => wgpu_backend::enumerate(),
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => cuda_backend::enumerate(),
        #[allow(unreachable_patterns)]
        other => Err(ClicError::UnsupportedBackend(other.name().to_string())),
    }
}

/// Best-ranked device matching the filters; ties go to enumeration order.
pub(crate) fn select_device<'a>(
    devices: &'a [DeviceInfo],
    name: &str,
    device_type: DeviceType,
) -> Option<&'a DeviceInfo> {
    let needle = name.to_lowercase();
    devices
        .iter()
        .enumerate()
        .filter(|(_, info)| device_type.matches(info.device_type))
        .filter(|(_, info)| info.name.to_lowercase().contains(&needle))
        .min_by_key(|(index, info)| (Reverse(info.rank), *index))
        .map(|(_, info)| info)
}

pub(crate) const fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Strips the padding of `rows` rows of `pitch_bytes` into tightly packed
/// rows of `row_bytes`.
pub(crate) fn unpad_rows(padded: &[u8], row_bytes: usize, pitch_bytes: usize, rows: usize, out: &mut [u8]) {
    for (src, dst) in padded.chunks_exact(pitch_bytes).zip(out.chunks_exact_mut(row_bytes)).take(rows) {
        dst.copy_from_slice(&src[..row_bytes]);
    }
}

/// Thread block used for backends without a declared workgroup size.
#[cfg_attr(not(feature = "cuda"), allow(dead_code))]
pub(crate) const fn default_block(dim: Dimensionality) -> [u32; 3] {
    match dim {
        Dimensionality::One => [256, 1, 1],
        Dimensionality::Two => [16, 16, 1],
        Dimensionality::Three => [8, 8, 4],
    }
}
