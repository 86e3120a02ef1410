//! Cross-references device process lists with host process metadata.

use std::collections::BTreeMap;

use inventory::DeviceSnapshot;
use inventory::InventoryError;
use inventory::NvmlInterface;
use serde::Serialize;

use crate::procinfo::ProcessReader;
use crate::procinfo::ProcessTimes;
use crate::users::UserNames;

/// A user id together with the login name it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub uid: u32,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Owner {
    pub real: Identity,
    pub effective: Identity,
    pub saved: Identity,
    pub filesystem: Identity,
}

/// What the host knows about a process. Every part is optional: the process
/// may have exited, or its entries may be unreadable to us.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct HostProcess {
    pub command_line: Option<Vec<String>>,
    pub owner: Option<Owner>,
    pub times: Option<ProcessTimes>,
    pub resident_memory: Option<u64>,
}

/// Source of host process metadata.
pub trait HostProcessSource {
    fn describe(&mut self, pid: u32) -> HostProcess;
}

/// Reads host metadata from procfs and resolves login names.
#[derive(Debug, Default)]
pub struct ProcfsSource {
    reader: ProcessReader,
    users: UserNames,
}

impl ProcfsSource {
    pub fn new(reader: ProcessReader) -> Self {
        Self {
            reader,
            users: UserNames::default(),
        }
    }
}

macro_rules! read_or_warn {
    ($pid:expr, $what:literal, $read:expr) => {
        match $read {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(pid = $pid, error = %e, "cannot get {}", $what);
                None
            }
        }
    };
}

impl HostProcessSource for ProcfsSource {
    fn describe(&mut self, pid: u32) -> HostProcess {
        let command_line = read_or_warn!(pid, "command line", self.reader.command_line(pid))
            .filter(|words| !words.is_empty());
        let owner = read_or_warn!(pid, "owner", self.reader.uids(pid)).map(|uids| {
            let mut identity = |uid| Identity {
                uid,
                login: self.users.resolve(uid),
            };
            Owner {
                real: identity(uids.real),
                effective: identity(uids.effective),
                saved: identity(uids.saved),
                filesystem: identity(uids.filesystem),
            }
        });

        HostProcess {
            command_line,
            owner,
            times: read_or_warn!(pid, "timing", self.reader.times(pid)),
            resident_memory: read_or_warn!(pid, "memory information", self.reader.resident_memory(pid)),
        }
    }
}

/// Memory a process holds on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceUsage {
    pub device: u32,
    pub used_memory: Option<u64>,
}

/// One record per pid, however many devices it runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub host: HostProcess,
    pub devices: Vec<DeviceUsage>,
}

impl ProcessRecord {
    /// Total GPU memory across devices, counting only attributed usage.
    /// `None` when no device could attribute any.
    pub fn gpu_memory(&self) -> Option<u64> {
        self.devices
            .iter()
            .filter_map(|usage| usage.used_memory)
            .reduce(u64::saturating_add)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Census {
    pub devices: Vec<DeviceSnapshot>,
    /// Ordered by pid.
    pub processes: Vec<ProcessRecord>,
}

impl Census {
    /// Lists every compute process on every device and describes each once.
    ///
    /// Devices whose process list cannot be read are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Only a failure to count devices aborts the census.
    pub fn collect<N, S>(nvml: &N, source: &mut S) -> Result<Self, InventoryError>
    where
        N: NvmlInterface + ?Sized,
        S: HostProcessSource + ?Sized,
    {
        let devices = inventory::snapshot(nvml)?;

        let mut usage: BTreeMap<u32, Vec<DeviceUsage>> = BTreeMap::new();
        for device in &devices {
            let processes = match inventory::running_processes(nvml, device.id) {
                Ok(processes) => processes,
                Err(e) => {
                    tracing::warn!(device = device.id, error = %e, "failed to query device, skipping");
                    continue;
                }
            };
            for process in processes {
                usage.entry(process.pid).or_default().push(DeviceUsage {
                    device: device.id,
                    used_memory: process.used_memory,
                });
            }
        }

        let processes = usage
            .into_iter()
            .map(|(pid, devices)| ProcessRecord {
                pid,
                host: source.describe(pid),
                devices,
            })
            .collect();

        Ok(Self { devices, processes })
    }

    pub fn device(&self, id: u32) -> Option<&DeviceSnapshot> {
        self.devices.iter().find(|device| device.id == id)
    }
}
