//! Discovery of compiled backends and the devices behind them.

use std::cmp::Reverse;
use std::fmt::Write;

use tracing::debug;

use super::{BackendKind, enumerate};
use crate::device::DeviceInfo;

/// A compiled backend and the devices it reported.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub backend: BackendKind,
    /// Empty when the native library fails to load or finds nothing.
    pub devices: Vec<DeviceInfo>,
}

impl BackendInfo {
    fn probe(backend: BackendKind) -> Self {
        let devices = enumerate(backend).unwrap_or_else(|e| {
            debug!(backend = %backend, error = %e, "Backend unavailable");
            Vec::new()
        });
        Self { backend, devices }
    }

    pub fn is_available(&self) -> bool {
        !self.devices.is_empty()
    }

    /// Rank of the best device; `None` when there is none.
    pub fn best_rank(&self) -> Option<u8> {
        self.devices.iter().map(|device| device.rank).max()
    }
}

/// Every compiled backend, enumerated once, best device first.
pub fn detect_backends() -> Vec<BackendInfo> {
    let mut backends: Vec<BackendInfo> = BackendKind::compiled().into_iter().map(BackendInfo::probe).collect();
    order(&mut backends);
    backends
}

/// Sorts by best device rank. CUDA wins a tie, unavailable backends go last.
fn order(backends: &mut [BackendInfo]) {
    backends.sort_by_key(|info| Reverse((info.best_rank(), info.backend == BackendKind::Cuda)));
}

/// The backend holding the best-ranked device.
///
/// With nothing available, falls back to the first compiled backend so that
/// the failure surfaces on device lookup.
pub fn select_best_backend() -> BackendKind {
    select(&detect_backends())
}

fn select(ordered: &[BackendInfo]) -> BackendKind {
    ordered
        .iter()
        .find(|info| info.is_available())
        .map(|info| info.backend)
        .unwrap_or_else(first_compiled)
}

/// One line per compiled backend followed by its devices.
pub fn describe_backends() -> String {
    describe(&detect_backends())
}

fn describe(backends: &[BackendInfo]) -> String {
    let mut out = String::new();
    for info in backends {
        if !info.is_available() {
            let _ = writeln!(out, "{}: unavailable", info.backend);
            continue;
        }
        let _ = writeln!(out, "{}: {} device(s)", info.backend, info.devices.len());
        for device in &info.devices {
            let _ = writeln!(
                out,
                "  {}: {} ({}, rank {})",
                device.index, device.name, device.device_type, device.rank
            );
        }
    }
    out
}

pub(crate) fn first_compiled() -> BackendKind {
    if cfg!(feature = "wgpu") {
        BackendKind::Wgpu
    } else {
        BackendKind::Cuda
    }
}
