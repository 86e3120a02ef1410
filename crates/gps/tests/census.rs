use std::fs;
use std::path::Path;

use gps::census::Census;
use gps::census::ProcfsSource;
use gps::procinfo::ProcessReader;
use gps::report;
use inventory::mock::MockDevice;
use inventory::mock::MockNvml;
use inventory::GpuProcess;
use similar_asserts::assert_eq;
use test_log::test;

const GIB: u64 = 1024 * 1024 * 1024;

fn status(pid: u32, uid: u32) -> String {
    format!(
        "Name:\tproc\nUmask:\t0022\nState:\tS (sleeping)\nTgid:\t{pid}\nNgid:\t0\nPid:\t{pid}\n\
         PPid:\t1\nTracerPid:\t0\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\nGid:\t0\t0\t0\t0\n\
         FDSize:\t64\nGroups:\t0\nNStgid:\t{pid}\nNSpid:\t{pid}\nNSpgid:\t{pid}\nNSsid:\t{pid}\n\
         VmPeak:\t  110000 kB\nVmSize:\t  110000 kB\nVmRSS:\t  102400 kB\nThreads:\t4\n\
         SigQ:\t0/63403\nSigPnd:\t0000000000000000\nShdPnd:\t0000000000000000\n\
         SigBlk:\t0000000000000000\nSigIgn:\t0000000001001000\nSigCgt:\t0000000180000002\n\
         CapInh:\t0000000000000000\nCapPrm:\t000001ffffffffff\nCapEff:\t000001ffffffffff\n\
         CapBnd:\t000001ffffffffff\nCapAmb:\t0000000000000000\nNoNewPrivs:\t0\nSeccomp:\t0\n\
         Cpus_allowed:\tff\nCpus_allowed_list:\t0-7\nMems_allowed:\t00000000,00000001\n\
         Mems_allowed_list:\t0\nvoluntary_ctxt_switches:\t10\nnonvoluntary_ctxt_switches:\t2\n"
    )
}

fn fake_process(root: &Path, pid: u32, cmdline: &[u8], uid: u32) {
    let dir = root.join(pid.to_string());
    fs::create_dir(&dir).expect("mkdir");
    fs::write(dir.join("cmdline"), cmdline).expect("cmdline");
    fs::write(dir.join("status"), status(pid, uid)).expect("status");
    // utime 6000, stime 100 and starttime 50000 ticks
    fs::write(
        dir.join("stat"),
        format!(
            "{pid} (proc) R 1 {pid} {pid} 0 -1 4194560 0 0 0 0 6000 100 0 0 20 0 1 0 50000 \
             113000000 25600 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n"
        ),
    )
    .expect("stat");
    fs::write(dir.join("statm"), "1000 25600 0 0 0 0 0\n").expect("statm");
}

#[test]
fn census_over_scratch_proc_tree() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::write(root.path().join("uptime"), "1000.25 1.00\n").expect("uptime");
    fake_process(root.path(), 31, b"python\0train.py\0", 0);
    // pid 32 is listed by the device but already gone from the host

    let nvml = MockNvml::new(vec![
        MockDevice::with_free(0, 4 * GIB).with_processes(vec![
            GpuProcess {
                pid: 32,
                used_memory: Some(GIB),
            },
            GpuProcess {
                pid: 31,
                used_memory: Some(2 * GIB),
            },
        ]),
        MockDevice::with_free(1, 4 * GIB).unopenable(),
    ]);
    let mut source = ProcfsSource::new(ProcessReader::with_root(root.path(), 100, 4096));

    let census = Census::collect(&nvml, &mut source).expect("census");

    assert_eq!(census.devices.len(), 1);
    assert_eq!(
        census.processes.iter().map(|p| p.pid).collect::<Vec<_>>(),
        vec![31, 32]
    );

    let text = report::render_text(&census);
    let expected_31 = "\
[31] 'python' 'train.py'
[31]   Owner:
[31]     Effective UID:  0 (root)
[31]     Real UID:       0 (root)
[31]     Saved UID:      0 (root)
[31]     Filesystem UID: 0 (root)
[31]   Timing:
[31]     Usermode:    60 second(s) (1 minute(s), 0 second(s))
[31]     Kernelmode:  1 second(s) (1 second(s))
[31]     Wall-clock:  500 second(s) (8 minute(s), 20 second(s))
[31]   CPU memory: 102400KiB
[31]   GPU memory: running on 1 devices, 2048MiB in use
[31]     on device 0 (Mock GPU 0): 2048MiB / 8192MiB, 25.000%
";
    assert!(text.starts_with(expected_31), "unexpected report:\n{text}");
    assert!(text.contains("[32] unknown command line\n"));
    assert!(text.contains("[32]   GPU memory: running on 1 devices, 1024MiB in use\n"));
}
