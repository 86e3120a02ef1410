//! Device inventory.
//!
//! Reads a fresh, point-in-time view of every accelerator NVML reports: its
//! index, name and memory statistics, plus the compute processes running on it.
//! Nothing here is cached; every call goes back to the driver.
//!
//! Per-device failures never abort a query. A device that cannot be opened is
//! left out with a diagnostic, and a statistic the driver fails to report is
//! carried as "unavailable" rather than as zero.

#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod nvml;

use std::fmt;

pub use nvml::init_nvml;
pub use nvml::DeviceInterface;
pub use nvml::NvmlInterface;
pub use nvml_wrapper::error::NvmlError;
pub use nvml_wrapper::Nvml;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to initialize NVML: {0}")]
    Init(#[source] NvmlError),
    #[error("failed to query device count: {0}")]
    DeviceCount(#[source] NvmlError),
}

/// Memory statistics of one device, in bytes. `None` marks a value the driver
/// did not report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceMemory {
    pub free: Option<u64>,
    pub used: Option<u64>,
    pub total: Option<u64>,
}

impl DeviceMemory {
    pub const UNAVAILABLE: Self = Self {
        free: None,
        used: None,
        total: None,
    };
}

/// A point-in-time read of one accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub id: u32,
    pub name: String,
    pub memory: DeviceMemory,
}

/// A compute process as listed by one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GpuProcess {
    pub pid: u32,
    /// `None` when the driver cannot attribute memory (e.g. under MIG or
    /// without permission).
    pub used_memory: Option<u64>,
}

/// Displays an optional byte quantity through `render`, or `unavailable`.
pub struct Measured<'a, F>(pub Option<u64>, pub &'a F);

impl<F: Fn(u64) -> String> fmt::Display for Measured<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => f.write_str(&(self.1)(value)),
            None => f.write_str("unavailable"),
        }
    }
}

/// Reads one opened device. `index` is what the device was opened with and is
/// only used when the device cannot report its own index.
pub fn read_device(index: u32, device: &dyn DeviceInterface) -> DeviceSnapshot {
    let id = match device.index() {
        Ok(id) => id,
        Err(e) => {
            warn!(device = index, error = %e, "Failed to get device index, using open index");
            index
        }
    };

    let name = match device.name() {
        Ok(name) => name,
        Err(e) => {
            warn!(device = id, error = %e, "Failed to get device name");
            String::new()
        }
    };

    let memory = match device.memory_info() {
        Ok(memory) => memory,
        Err(e) => {
            warn!(device = id, error = %e, "Failed to get device memory statistics");
            DeviceMemory::UNAVAILABLE
        }
    };

    DeviceSnapshot { id, name, memory }
}

/// Takes a snapshot of every device, in index order.
///
/// # Errors
///
/// - [`InventoryError::DeviceCount`] if NVML cannot report how many devices
///   exist; nothing can be evaluated in that case.
pub fn snapshot<N: NvmlInterface + ?Sized>(nvml: &N) -> Result<Vec<DeviceSnapshot>, InventoryError> {
    let device_count = nvml.device_count().map_err(InventoryError::DeviceCount)?;
    let mut devices = Vec::with_capacity(device_count as usize);

    for index in 0..device_count {
        let device = match nvml.device_by_index(index) {
            Ok(device) => device,
            Err(e) => {
                warn!(device = index, error = %e, "Failed to open device, skipping");
                continue;
            }
        };
        let snapshot = read_device(index, device.as_ref());
        debug!(
            device = snapshot.id,
            name = %snapshot.name,
            free = ?snapshot.memory.free,
            total = ?snapshot.memory.total,
            "Device snapshot"
        );
        devices.push(snapshot);
    }

    Ok(devices)
}

/// Lists the compute processes running on the device at `index`.
pub fn running_processes<N: NvmlInterface + ?Sized>(
    nvml: &N,
    index: u32,
) -> Result<Vec<GpuProcess>, NvmlError> {
    nvml.device_by_index(index)?.running_compute_processes()
}
