//! Memory-aware GPU launcher.
//!
//! glaunch waits until enough devices have the free memory a workload asks
//! for, confines the workload to them, and optionally supervises it: timing it
//! and logging how much GPU memory its process group holds.

pub mod config;
pub mod launcher;
pub mod selector;
pub mod supervisor;
pub mod waiter;
pub mod watcher;

use inventory::InventoryError;

use crate::launcher::LaunchError;
use crate::waiter::WaitError;

/// Maps a failure to the status glaunch exits with.
///
/// Running out of time waiting for devices is `-ENOMEM`, launch failures carry
/// their own negated errno, and anything NVML related is a plain `1`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(wait) = cause.downcast_ref::<WaitError>() {
            return match wait {
                WaitError::TimedOut { .. } => -libc::ENOMEM,
                WaitError::Inventory(_) => 1,
            };
        }
        if let Some(launch) = cause.downcast_ref::<LaunchError>() {
            return launch.exit_code();
        }
        if cause.is::<InventoryError>() {
            return 1;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use anyhow::Context;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn exit_code_looks_through_context() {
        let timed_out: anyhow::Result<()> = Err(WaitError::TimedOut {
            waited: Duration::from_secs(60),
            polls: 2,
        })
        .context("waiting for devices");
        let exec: anyhow::Result<()> = Err(LaunchError::Exec {
            program: "missing".to_string(),
            source: io::Error::from_raw_os_error(libc::ENOENT),
        }
        .into());

        assert_eq!(exit_code(&timed_out.unwrap_err()), -libc::ENOMEM);
        assert_eq!(exit_code(&exec.unwrap_err()), -libc::ENOEXEC);
        assert_eq!(exit_code(&anyhow::anyhow!("anything else")), 1);
    }
}
