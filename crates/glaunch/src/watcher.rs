//! Periodic GPU memory accounting for a launched program.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use inventory::NvmlInterface;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use utils::units::readable_size;

use crate::waiter::FAR_FUTURE;

/// Returns the process group of `pid`, or `None` once it is gone.
pub fn process_group_of(pid: u32) -> Option<i32> {
    // SAFETY: getpgid only reads kernel state for the given pid.
    let group = unsafe { libc::getpgid(pid as libc::pid_t) };
    (group != -1).then_some(group)
}

/// Samples GPU memory used by one process group on the selected devices.
pub struct MemoryWatcher<N: ?Sized> {
    nvml: Arc<N>,
    device_ids: Vec<u32>,
    process_group: i32,
    interval: Duration,
}

impl<N> MemoryWatcher<N>
where
    N: NvmlInterface + Send + Sync + ?Sized + 'static,
{
    pub fn new(nvml: Arc<N>, device_ids: Vec<u32>, process_group: i32, interval: Duration) -> Self {
        Self {
            nvml,
            device_ids,
            process_group,
            interval,
        }
    }

    /// Sums the memory of every compute process on the selected devices whose
    /// group, as reported by `group_of`, is the watched one. Devices that
    /// cannot be queried are skipped; unattributed memory counts as nothing.
    pub fn sample(&self, group_of: impl Fn(u32) -> Option<i32>) -> u64 {
        let mut total: u64 = 0;
        for &id in &self.device_ids {
            let processes = match inventory::running_processes(self.nvml.as_ref(), id) {
                Ok(processes) => processes,
                Err(e) => {
                    tracing::warn!(device = id, error = %e, "failed to get processes on device, skipping");
                    continue;
                }
            };
            total = processes
                .iter()
                .filter(|process| group_of(process.pid) == Some(self.process_group))
                .filter_map(|process| process.used_memory)
                .fold(total, u64::saturating_add);
        }
        total
    }

    /// Starts sampling every interval, first one interval from now. The task
    /// runs until the runtime shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.interval.min(FAR_FUTURE);
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let total = self.sample(process_group_of);
                tracing::info!(
                    "[{}] {} GPU memory in use",
                    Local::now().format("%Y %B %d %T"),
                    readable_size(total)
                );
            }
        })
    }
}
