//! GPU compute dispatch runtime.
//!
//! Runs user-supplied compute kernels on GPU devices through one
//! backend-neutral API: pick a backend, open a device, create arrays, then
//! [`execute`] kernels over an index range.
//!
//! # Architecture
//!
//! ```text
//! BackendManager (process-wide, one active backend)
//!     └── Backend (wgpu or CUDA)
//!             └── Device (context, in-order queue, program cache)
//!                     ├── Array (buffer or image)
//!                     └── execute(KernelInfo, ParameterList, RangeArray)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use clic_core::{Array, DataType, DeviceType, KernelInfo, MemoryType, ParameterList, execute, BackendManager};
//!
//! let device = BackendManager::instance().backend().get_device("", DeviceType::All)?;
//! let src = Array::create_with_data(4, 4, 1, DataType::F32, MemoryType::Image, &[1.0f32; 16], &device)?;
//! let dst = Array::create_like(&src, None)?;
//!
//! let params = ParameterList::new().with("src", &src).with("dst", &dst).with("scalar", 2.0f32);
//! execute(&device, &KernelInfo::from_source("add_image_and_scalar", SOURCE), &params, [4, 4, 1])?;
//!
//! let out: Vec<f32> = dst.read_vec()?;
//! ```

pub mod array;
pub mod backend;
pub mod config;
pub mod device;
pub mod dtype;
pub mod error;
pub mod execute;
pub mod kernel;
pub mod shape;

pub use array::{Array, MemoryLayout};
pub use backend::{
    Backend, BackendInfo, BackendKind, BackendManager, describe_backends, detect_backends, select_best_backend,
};
pub use config::{ClicConfig, default_device};
pub use device::{Device, DeviceId, DeviceInfo, DeviceType};
pub use dtype::{DataType, Element, MemoryType, Scalar};
pub use error::{ClicError, ClicResult};
pub use execute::execute;
pub use kernel::{CacheStats, KernelInfo, ParameterList, ParameterValue, RangeArray};
pub use shape::{Dimensionality, Shape};
