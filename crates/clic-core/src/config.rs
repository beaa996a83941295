//! Session configuration.
//!
//! # Environment Variables
//!
//! - `CLIC_BACKEND` - Backend name (`wgpu`, `cuda`)
//! - `CLIC_DEVICE` - Case-insensitive substring of the device name
//! - `CLIC_DEVICE_TYPE` - Device type filter (`all`, `gpu`, `cpu`)
//! - `CLIC_WAIT_TO_FINISH` - Block after every dispatch ("1" or "true")

use std::env;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::BackendManager;
use crate::device::{Device, DeviceType};
use crate::error::ClicResult;

pub const ENV_BACKEND: &str = "CLIC_BACKEND";
pub const ENV_DEVICE: &str = "CLIC_DEVICE";
pub const ENV_DEVICE_TYPE: &str = "CLIC_DEVICE_TYPE";
pub const ENV_WAIT_TO_FINISH: &str = "CLIC_WAIT_TO_FINISH";

/// Backend and device selection for one session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClicConfig {
    /// Backend to activate; `None` keeps the manager's current backend.
    pub backend: Option<String>,
    /// Device name filter; empty matches every device.
    pub device_name: String,
    pub device_type: DeviceType,
    pub wait_to_finish: bool,
}

impl ClicConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration from the `CLIC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let backend = lookup(ENV_BACKEND)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let device_name = lookup(ENV_DEVICE).unwrap_or_default();
        let device_type = match lookup(ENV_DEVICE_TYPE) {
            Some(v) => v.parse().unwrap_or_else(|_| {
                warn!(value = %v, "ignoring unknown {ENV_DEVICE_TYPE}");
                DeviceType::All
            }),
            None => DeviceType::All,
        };
        let wait_to_finish = lookup(ENV_WAIT_TO_FINISH)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self { backend, device_name, device_type, wait_to_finish }
    }

    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.backend = Some(name.into());
        self
    }

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn wait_to_finish(mut self, wait: bool) -> Self {
        self.wait_to_finish = wait;
        self
    }

    /// Activates the configured backend and opens the best matching device.
    pub fn open_device(&self) -> ClicResult<Arc<Device>> {
        let manager = BackendManager::instance();
        if let Some(name) = &self.backend {
            manager.set_backend(name)?;
        }
        let device = manager.backend().get_device(&self.device_name, self.device_type)?;
        device.set_wait_to_finish(self.wait_to_finish);
        debug!(device = %device.id(), name = %device.info().name, "opened configured device");
        Ok(device)
    }
}

/// Device for the configuration found in the environment.
pub fn default_device() -> ClicResult<Arc<Device>> {
    ClicConfig::from_env().open_device()
}
