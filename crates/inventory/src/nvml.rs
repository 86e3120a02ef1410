use std::ffi::OsStr;

use nvml_wrapper::device::Device;
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;

use crate::DeviceMemory;
use crate::GpuProcess;
use crate::InventoryError;

/// The slice of NVML the inventory needs, so callers can swap in a double.
pub trait NvmlInterface {
    fn device_count(&self) -> Result<u32, NvmlError>;
    fn device_by_index(&self, index: u32) -> Result<Box<dyn DeviceInterface + '_>, NvmlError>;
}

/// Per-device queries, one handle per opened device.
pub trait DeviceInterface {
    fn index(&self) -> Result<u32, NvmlError>;
    fn name(&self) -> Result<String, NvmlError>;
    fn memory_info(&self) -> Result<DeviceMemory, NvmlError>;
    fn running_compute_processes(&self) -> Result<Vec<GpuProcess>, NvmlError>;
}

impl NvmlInterface for Nvml {
    fn device_count(&self) -> Result<u32, NvmlError> {
        self.device_count()
    }

    fn device_by_index(&self, index: u32) -> Result<Box<dyn DeviceInterface + '_>, NvmlError> {
        match self.device_by_index(index) {
            Ok(device) => Ok(Box::new(DeviceWrapper(device))),
            Err(e) => Err(e),
        }
    }
}

struct DeviceWrapper<'nvml>(Device<'nvml>);

impl<'nvml> DeviceInterface for DeviceWrapper<'nvml> {
    fn index(&self) -> Result<u32, NvmlError> {
        self.0.index()
    }

    fn name(&self) -> Result<String, NvmlError> {
        self.0.name()
    }

    fn memory_info(&self) -> Result<DeviceMemory, NvmlError> {
        let info = self.0.memory_info()?;
        Ok(DeviceMemory {
            free: Some(info.free),
            used: Some(info.used),
            total: Some(info.total),
        })
    }

    fn running_compute_processes(&self) -> Result<Vec<GpuProcess>, NvmlError> {
        // nvml-wrapper grows the buffer until the driver's process list fits
        let processes = self.0.running_compute_processes()?;
        Ok(processes
            .into_iter()
            .map(|process| GpuProcess {
                pid: process.pid,
                used_memory: match process.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => Some(bytes),
                    UsedGpuMemory::Unavailable => None,
                },
            })
            .collect())
    }
}

/// Loads NVML, falling back to the versioned soname when the default lookup fails.
pub fn init_nvml() -> Result<Nvml, InventoryError> {
    match Nvml::init() {
        Ok(nvml) => {
            tracing::debug!("NVML initialized successfully");
            Ok(nvml)
        }
        Err(err) => {
            tracing::warn!("Standard NVML init failed ({err}), trying with explicit library path");
            let nvml = Nvml::builder()
                .lib_path(OsStr::new("libnvidia-ml.so.1"))
                .init()
                .map_err(InventoryError::Init)?;
            tracing::debug!("NVML initialized with explicit library path");
            Ok(nvml)
        }
    }
}
