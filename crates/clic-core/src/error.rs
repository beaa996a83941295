//! Error types for the dispatch runtime.

use thiserror::Error;

use crate::backend::BackendKind;
use crate::dtype::{DataType, MemoryType};

/// Result type for runtime operations.
pub type ClicResult<T> = Result<T, ClicError>;

/// Errors raised by backends, devices, arrays and kernel execution.
///
/// Every error aborts only the operation in progress; nothing is retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClicError {
    #[error("Unsupported backend: '{0}'")]
    UnsupportedBackend(String),

    #[error("No device found matching name '{name}' and type '{device_type}'")]
    NoDeviceFound { name: String, device_type: String },

    #[error("Failed to initialize device: {0}")]
    DeviceInitError(String),

    #[error("Stale handle: created under {backend} generation {created}, active generation is {current}")]
    StaleHandle {
        backend: BackendKind,
        created: u64,
        current: u64,
    },

    #[error("Invalid shape: {width}x{height}x{depth}")]
    InvalidShape {
        width: usize,
        height: usize,
        depth: usize,
    },

    #[error("Out of device memory: cannot allocate {bytes} bytes ({reason})")]
    OutOfDeviceMemory { bytes: u64, reason: String },

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Unsupported format: {dtype} {mtype} on {backend}")]
    UnsupportedFormat {
        dtype: DataType,
        mtype: MemoryType,
        backend: BackendKind,
    },

    #[error("Failed to compile kernel '{kernel}': {log}")]
    KernelCompileError { kernel: String, log: String },

    #[error("Cannot bind parameters of kernel '{kernel}': {reason}")]
    ParameterBindingError { kernel: String, reason: String },

    #[error("Device mismatch: expected {expected}, got {actual}")]
    DeviceMismatch { expected: String, actual: String },

    #[error("Device operation failed: {0}")]
    DeviceError(String),

    #[error("Unknown {kind}: '{value}'")]
    UnknownName { kind: &'static str, value: String },
}

impl ClicError {
    /// True when the device that raised this error can no longer be used.
    pub fn invalidates_device(&self) -> bool {
        matches!(self, Self::DeviceInitError(_) | Self::StaleHandle { .. })
    }

    pub(crate) fn binding(kernel: &str, reason: impl Into<String>) -> Self {
        Self::ParameterBindingError {
            kernel: kernel.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn compile(kernel: &str, log: impl Into<String>) -> Self {
        Self::KernelCompileError {
            kernel: kernel.to_string(),
            log: log.into(),
        }
    }
}
