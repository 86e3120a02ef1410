//! Turning a selection into a running program.
//!
//! The program sees only the selected devices through [`VISIBLE_DEVICES_ENV`]
//! and leads its own process group, so everything it forks can be attributed
//! back to it. In forked mode it is also killed when the supervisor dies.

use std::ffi::OsString;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::path::PathBuf;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;

use thiserror::Error;

use crate::selector::Selection;

/// Device mask read by the CUDA runtime. Advisory only: nothing stops the
/// program from clearing it.
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to exec {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot duplicate output to {}: {source}", path.display())]
    OutputDuplication {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to redirect output: {0}")]
    Redirect(#[source] io::Error),
    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// Exit status glaunch terminates with: `-ENOEXEC` when the program could
    /// not be executed, otherwise the negated errno of the failed call.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exec { .. } => -libc::ENOEXEC,
            Self::Spawn { source, .. }
            | Self::OutputDuplication { source, .. }
            | Self::Redirect(source)
            | Self::Wait { source, .. } => -source.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Renders a command line as `['prog', 'arg']`, each word single-quoted with
/// embedded quotes spelled `'"'"'`.
pub fn shell_quote(program: &[OsString]) -> String {
    let words = program
        .iter()
        .map(|word| format!("'{}'", word.to_string_lossy().replace('\'', r#"'"'"'"#)))
        .collect::<Vec<_>>();
    format!("[{}]", words.join(", "))
}

/// Starts `tee path` and points this process's stdout and stderr at its
/// stdin. Everything written afterwards, including by the launched program,
/// lands both on the original stdout and in `path`.
///
/// The returned helper must outlive every writer; it exits on its own once
/// the last copy of the pipe is closed.
pub fn duplicate_output(path: &Path) -> Result<Child, LaunchError> {
    let mut tee = Command::new("tee")
        .arg(path)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|source| LaunchError::OutputDuplication {
            path: path.to_path_buf(),
            source,
        })?;

    let Some(pipe) = tee.stdin.take() else {
        return Err(LaunchError::Redirect(io::Error::from_raw_os_error(
            libc::EPIPE,
        )));
    };

    for target in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are open; dup2 does not touch memory.
        if unsafe { libc::dup2(pipe.as_raw_fd(), target) } == -1 {
            return Err(LaunchError::Redirect(io::Error::last_os_error()));
        }
    }
    // fds 1 and 2 keep the pipe open
    drop(pipe);

    Ok(tee)
}

/// Builds the command for `program` confined to `selection`.
///
/// With `forked` the program additionally receives `SIGKILL` when the thread
/// that spawned it exits.
pub fn build_command(program: &[OsString], selection: &Selection, forked: bool) -> Command {
    let mut words = program.iter();
    let mut command = Command::new(words.next().map(OsString::as_os_str).unwrap_or_default());
    command
        .args(words)
        .env(VISIBLE_DEVICES_ENV, selection.visible_devices())
        .process_group(0);

    if forked {
        set_parent_death_signal(&mut command);
    }

    command
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal(command: &mut Command) {
    // SAFETY: prctl is async-signal-safe and the closure allocates nothing.
    unsafe {
        command.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal(_command: &mut Command) {
    tracing::warn!("parent death signal is unsupported on this platform, the program may outlive glaunch");
}

fn program_name(command: &Command) -> String {
    command.get_program().to_string_lossy().into_owned()
}

/// Replaces the current process image. Only returns on failure.
pub fn exec_in_place(mut command: Command) -> LaunchError {
    let source = command.exec();
    LaunchError::Exec {
        program: program_name(&command),
        source,
    }
}

/// Spawns the command as a child of this process.
pub fn spawn(command: Command) -> Result<tokio::process::Child, LaunchError> {
    let program = program_name(&command);
    tokio::process::Command::from(command)
        .spawn()
        .map_err(|source| match source.raw_os_error() {
            Some(libc::EAGAIN | libc::ENOMEM) | None => LaunchError::Spawn { program, source },
            Some(_) => LaunchError::Exec { program, source },
        })
}
