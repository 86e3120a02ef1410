//! Host process metadata from the proc filesystem.
//!
//! Entries are read and parsed by `procfs`. The root is configurable so that a
//! scratch tree can stand in for `/proc`.

use core::error::Error;
use std::path::PathBuf;

use derive_more::Display;
use procfs::process::Process;
use procfs::FromRead;
use procfs::ProcError;
use procfs::Uptime;
use serde::Serialize;

/// Errors that can occur while reading a process's proc entries.
#[derive(Debug, Display)]
pub enum ProcInfoError {
    #[display("Failed to open process {pid}: {source}")]
    Open { pid: u32, source: ProcError },
    #[display("Failed to read {entry} of process {pid}: {source}")]
    Read {
        pid: u32,
        entry: &'static str,
        source: ProcError,
    },
    #[display("Failed to read uptime: {_0}")]
    Uptime(ProcError),
}

impl Error for ProcInfoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Read { source, .. } | Self::Uptime(source) => {
                Some(source)
            }
        }
    }
}

fn read_error(pid: u32, entry: &'static str) -> impl FnOnce(ProcError) -> ProcInfoError {
    move |source| ProcInfoError::Read { pid, entry, source }
}

/// The four user ids of a process, as listed on the `Uid:` line of `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Uids {
    pub real: u32,
    pub effective: u32,
    pub saved: u32,
    pub filesystem: u32,
}

/// CPU and wall-clock time of a process, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessTimes {
    pub user_seconds: u64,
    pub kernel_seconds: u64,
    pub wall_clock_seconds: u64,
}

/// Reads process metadata below a proc root.
#[derive(Debug, Clone)]
pub struct ProcessReader {
    root: PathBuf,
    clock_ticks: u64,
    page_size: u64,
}

impl Default for ProcessReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessReader {
    /// Reads the live `/proc` with this host's clock tick rate and page size.
    pub fn new() -> Self {
        Self::with_root("/proc", procfs::ticks_per_second(), procfs::page_size())
    }

    pub fn with_root(root: impl Into<PathBuf>, clock_ticks: u64, page_size: u64) -> Self {
        Self {
            root: root.into(),
            clock_ticks: clock_ticks.max(1),
            page_size,
        }
    }

    fn open(&self, pid: u32) -> Result<Process, ProcInfoError> {
        Process::new_with_root(self.root.join(pid.to_string()))
            .map_err(|source| ProcInfoError::Open { pid, source })
    }

    /// Arguments of the process; empty for kernel threads and zombies.
    pub fn command_line(&self, pid: u32) -> Result<Vec<String>, ProcInfoError> {
        self.open(pid)?.cmdline().map_err(read_error(pid, "cmdline"))
    }

    pub fn uids(&self, pid: u32) -> Result<Uids, ProcInfoError> {
        let status = self.open(pid)?.status().map_err(read_error(pid, "status"))?;
        Ok(Uids {
            real: status.ruid,
            effective: status.euid,
            saved: status.suid,
            filesystem: status.fuid,
        })
    }

    /// User and kernel time consumed, and time since the process started.
    pub fn times(&self, pid: u32) -> Result<ProcessTimes, ProcInfoError> {
        let stat = self.open(pid)?.stat().map_err(read_error(pid, "stat"))?;
        let uptime = Uptime::from_file(self.root.join("uptime")).map_err(ProcInfoError::Uptime)?;
        Ok(ProcessTimes {
            user_seconds: stat.utime / self.clock_ticks,
            kernel_seconds: stat.stime / self.clock_ticks,
            wall_clock_seconds: (uptime.uptime as u64)
                .saturating_sub(stat.starttime / self.clock_ticks),
        })
    }

    /// Resident CPU memory in bytes.
    pub fn resident_memory(&self, pid: u32) -> Result<u64, ProcInfoError> {
        let statm = self.open(pid)?.statm().map_err(read_error(pid, "statm"))?;
        Ok(statm.resident.saturating_mul(self.page_size))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use similar_asserts::assert_eq;

    use super::*;

    const STATUS: &str = "\
Name:\tpython3
Umask:\t0022
State:\tS (sleeping)
Tgid:\t4242
Ngid:\t0
Pid:\t4242
PPid:\t1
TracerPid:\t0
Uid:\t1000\t1001\t1002\t1003
Gid:\t1000\t1000\t1000\t1000
FDSize:\t64
Groups:\t1000
NStgid:\t4242
NSpid:\t4242
NSpgid:\t4242
NSsid:\t4242
VmPeak:\t  100000 kB
VmSize:\t  100000 kB
VmLck:\t       0 kB
VmPin:\t       0 kB
VmHWM:\t    2000 kB
VmRSS:\t    1024 kB
RssAnon:\t     512 kB
RssFile:\t     512 kB
RssShmem:\t       0 kB
VmData:\t    1000 kB
VmStk:\t     132 kB
VmExe:\t      16 kB
VmLib:\t    2000 kB
VmPTE:\t      48 kB
VmSwap:\t       0 kB
HugetlbPages:\t       0 kB
CoreDumping:\t0
THP_enabled:\t1
Threads:\t8
SigQ:\t0/63403
SigPnd:\t0000000000000000
ShdPnd:\t0000000000000000
SigBlk:\t0000000000000000
SigIgn:\t0000000001001000
SigCgt:\t0000000180000002
CapInh:\t0000000000000000
CapPrm:\t0000000000000000
CapEff:\t0000000000000000
CapBnd:\t000001ffffffffff
CapAmb:\t0000000000000000
NoNewPrivs:\t0
Seccomp:\t0
Speculation_Store_Bypass:\tthread vulnerable
Cpus_allowed:\tff
Cpus_allowed_list:\t0-7
Mems_allowed:\t00000000,00000001
Mems_allowed_list:\t0
voluntary_ctxt_switches:\t10
nonvoluntary_ctxt_switches:\t2
";

    // utime, stime and starttime (fields 14, 15 and 22) are 1500, 250 and 360000
    const STAT: &str = "4242 (python3 (train) x) S 1 4242 4242 0 -1 4194560 100 0 0 0 1500 250 0 0 20 0 8 0 360000 1000000 2000 18446744073709551615 1 1 0 0 0 0 0 4096 0 0 0 0 17 3 0 0 0 0 0 0 0 0 0 0 0 0 0\n";

    fn scratch_process(root: &Path, pid: u32) {
        let process = root.join(pid.to_string());
        fs::create_dir(&process).expect("mkdir");
        fs::write(process.join("cmdline"), b"python3\0train.py\0").expect("write");
        fs::write(process.join("status"), STATUS).expect("write");
        fs::write(process.join("stat"), STAT).expect("write");
        fs::write(process.join("statm"), "5000 256 10 1 0 300 0\n").expect("write");
        fs::write(root.join("uptime"), "7200.00 100.00\n").expect("write");
    }

    #[test]
    fn reads_scratch_tree() {
        let root = tempfile::tempdir().expect("tempdir");
        scratch_process(root.path(), 4242);

        let reader = ProcessReader::with_root(root.path(), 100, 4096);

        assert_eq!(
            reader.command_line(4242).expect("cmdline"),
            vec!["python3", "train.py"]
        );
        assert_eq!(
            reader.uids(4242).expect("uids"),
            Uids {
                real: 1000,
                effective: 1001,
                saved: 1002,
                filesystem: 1003,
            }
        );
        assert_eq!(
            reader.times(4242).expect("times"),
            ProcessTimes {
                user_seconds: 15,
                kernel_seconds: 2,
                wall_clock_seconds: 3600,
            }
        );
        assert_eq!(reader.resident_memory(4242).expect("statm"), 256 * 4096);
    }

    #[test]
    fn wall_clock_saturates_at_zero() {
        let root = tempfile::tempdir().expect("tempdir");
        scratch_process(root.path(), 4242);
        fs::write(root.path().join("uptime"), "1000.99 10.00\n").expect("write");

        let reader = ProcessReader::with_root(root.path(), 100, 4096);

        assert_eq!(reader.times(4242).expect("times").wall_clock_seconds, 0);
    }

    #[test]
    fn unreadable_entries_fail_one_at_a_time() {
        let root = tempfile::tempdir().expect("tempdir");
        scratch_process(root.path(), 4242);
        fs::remove_file(root.path().join("4242/status")).expect("remove");
        fs::remove_file(root.path().join("uptime")).expect("remove");

        let reader = ProcessReader::with_root(root.path(), 100, 4096);

        assert!(matches!(
            reader.uids(4242),
            Err(ProcInfoError::Read { entry: "status", .. })
        ));
        assert!(matches!(reader.times(4242), Err(ProcInfoError::Uptime(_))));
        assert_eq!(reader.resident_memory(4242).expect("statm"), 256 * 4096);
    }

    #[test]
    fn reports_missing_process() {
        let root = tempfile::tempdir().expect("tempdir");
        let reader = ProcessReader::with_root(root.path(), 100, 4096);

        let err = reader.uids(1).expect_err("no such process");

        assert!(matches!(err, ProcInfoError::Open { pid: 1, .. }));
        assert!(err.to_string().contains("process 1"));
    }

    #[test]
    fn live_reader_sees_this_process() {
        let reader = ProcessReader::new();
        let pid = std::process::id();

        assert!(!reader.command_line(pid).expect("cmdline").is_empty());
        reader.uids(pid).expect("uids");
        reader.times(pid).expect("times");
        assert!(reader.resident_memory(pid).expect("statm") > 0);
    }
}
