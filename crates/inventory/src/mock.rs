//! In-memory NVML double.
//!
//! A [`MockNvml`] holds one or more "frames" of devices. Every call to
//! `device_count` moves to the next frame (staying on the last one), which
//! lets tests script how availability changes between polls.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use nvml_wrapper::error::NvmlError;

use crate::DeviceInterface;
use crate::DeviceMemory;
use crate::GpuProcess;
use crate::NvmlInterface;

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub index: u32,
    pub name: Option<String>,
    pub memory: Option<DeviceMemory>,
    pub processes: Option<Vec<GpuProcess>>,
    pub openable: bool,
}

impl MockDevice {
    /// A healthy device with `free` bytes free out of twice that much.
    pub fn with_free(index: u32, free: u64) -> Self {
        Self {
            index,
            name: Some(format!("Mock GPU {index}")),
            memory: Some(DeviceMemory {
                free: Some(free),
                used: Some(free),
                total: Some(free.saturating_mul(2)),
            }),
            processes: Some(Vec::new()),
            openable: true,
        }
    }

    pub fn unopenable(mut self) -> Self {
        self.openable = false;
        self
    }

    pub fn without_name(mut self) -> Self {
        self.name = None;
        self
    }

    pub fn without_memory_info(mut self) -> Self {
        self.memory = None;
        self
    }

    pub fn with_processes(mut self, processes: Vec<GpuProcess>) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn without_process_list(mut self) -> Self {
        self.processes = None;
        self
    }
}

impl DeviceInterface for MockDevice {
    fn index(&self) -> Result<u32, NvmlError> {
        Ok(self.index)
    }

    fn name(&self) -> Result<String, NvmlError> {
        self.name.clone().ok_or(NvmlError::Unknown)
    }

    fn memory_info(&self) -> Result<DeviceMemory, NvmlError> {
        self.memory.ok_or(NvmlError::GpuLost)
    }

    fn running_compute_processes(&self) -> Result<Vec<GpuProcess>, NvmlError> {
        self.processes.clone().ok_or(NvmlError::NotSupported)
    }
}

pub struct MockNvml {
    frames: Vec<Vec<MockDevice>>,
    current: AtomicUsize,
    polls: AtomicUsize,
    opens: AtomicUsize,
    device_count_fails: bool,
}

impl MockNvml {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self::with_frames(vec![devices])
    }

    /// One frame per expected poll; the last frame repeats forever.
    pub fn with_frames(frames: Vec<Vec<MockDevice>>) -> Self {
        assert!(!frames.is_empty(), "MockNvml needs at least one frame");
        Self {
            frames,
            current: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            device_count_fails: false,
        }
    }

    pub fn failing_device_count(mut self) -> Self {
        self.device_count_fails = true;
        self
    }

    /// Number of `device_count` calls, i.e. inventory snapshots taken.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Number of `device_by_index` calls, openable or not.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn frame(&self) -> &[MockDevice] {
        let current = self.current.load(Ordering::SeqCst);
        &self.frames[current.min(self.frames.len() - 1)]
    }
}

impl NvmlInterface for MockNvml {
    fn device_count(&self) -> Result<u32, NvmlError> {
        if self.device_count_fails {
            return Err(NvmlError::Uninitialized);
        }
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        self.current.store(poll, Ordering::SeqCst);
        Ok(self.frame().len() as u32)
    }

    fn device_by_index(&self, index: u32) -> Result<Box<dyn DeviceInterface + '_>, NvmlError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let device = self
            .frame()
            .get(index as usize)
            .ok_or(NvmlError::InvalidArg)?;
        if !device.openable {
            return Err(NvmlError::GpuLost);
        }
        Ok(Box::new(device.clone()))
    }
}
