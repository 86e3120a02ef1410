use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::Instant;
use utils::units::readable_duration;

use crate::launcher::LaunchError;

/// How a supervised program ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    Unknown,
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            Self::Exited(code)
        } else if let Some(signal) = status.signal() {
            Self::Signaled(signal)
        } else {
            Self::Unknown
        }
    }
}

impl Termination {
    /// The status glaunch itself exits with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(_) => -libc::EINTR,
            Self::Unknown => -libc::EAGAIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub termination: Termination,
    pub elapsed: Duration,
}

/// Owns a forked program until it terminates.
pub struct Supervisor {
    child: Child,
    pid: u32,
    started: Instant,
}

impl Supervisor {
    pub fn new(child: Child) -> Result<Self, LaunchError> {
        // a freshly spawned child has not been reaped, so it still has an id
        let pid = child.id().ok_or_else(|| LaunchError::Wait {
            pid: 0,
            source: std::io::Error::from_raw_os_error(libc::ECHILD),
        })?;
        Ok(Self {
            child,
            pid,
            started: Instant::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The program leads its own group, so the group id is its pid.
    pub fn process_group(&self) -> i32 {
        self.pid as i32
    }

    /// Blocks until the program terminates and reports how it ended.
    pub async fn wait(mut self, timing: bool) -> Result<Outcome, LaunchError> {
        let status = self.child.wait().await.map_err(|source| LaunchError::Wait {
            pid: self.pid,
            source,
        })?;
        let elapsed = self.started.elapsed();
        let termination = Termination::from(status);

        match termination {
            Termination::Exited(code) => tracing::info!("program exited with code {code}"),
            Termination::Signaled(signal) => tracing::warn!("program killed with signal {signal}"),
            Termination::Unknown => tracing::warn!(%status, "program terminated, but how?"),
        }
        if timing {
            tracing::info!("elapsed time: {}", readable_duration(elapsed));
        }

        Ok(Outcome {
            termination,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn termination_from_raw_wait_status() {
        // wait(2) encodings: exit code in the second byte, signal in the low bits
        assert_eq!(Termination::from(ExitStatus::from_raw(0)), Termination::Exited(0));
        assert_eq!(Termination::from(ExitStatus::from_raw(3 << 8)), Termination::Exited(3));
        assert_eq!(
            Termination::from(ExitStatus::from_raw(libc::SIGKILL)),
            Termination::Signaled(libc::SIGKILL)
        );
        // stopped by SIGSTOP
        assert_eq!(Termination::from(ExitStatus::from_raw(0x137f)), Termination::Unknown);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Termination::Exited(0).exit_code(), 0);
        assert_eq!(Termination::Exited(42).exit_code(), 42);
        assert_eq!(Termination::Signaled(9).exit_code(), -libc::EINTR);
        assert_eq!(Termination::Unknown.exit_code(), -libc::EAGAIN);
    }
}
