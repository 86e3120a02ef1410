use std::fmt::Write;
use std::time::Duration;

use inventory::Measured;
use utils::units::readable_duration;
use utils::units::readable_size;

use crate::census::Census;
use crate::census::Identity;
use crate::census::ProcessRecord;

fn seconds(label: &str, value: u64) -> String {
    format!(
        "{label}{value} second(s) ({})",
        readable_duration(Duration::from_secs(value))
    )
}

fn identity(identity: &Identity) -> String {
    format!("{} ({})", identity.uid, identity.login)
}

fn render_process(out: &mut String, census: &Census, record: &ProcessRecord) -> std::fmt::Result {
    let pid = record.pid;
    let host = &record.host;

    match &host.command_line {
        Some(words) => {
            write!(out, "[{pid}] ")?;
            for word in words {
                write!(out, "'{word}' ")?;
            }
            writeln!(out)?;
        }
        None => writeln!(out, "[{pid}] unknown command line")?,
    }

    match &host.owner {
        Some(owner) => {
            writeln!(out, "[{pid}]   Owner:")?;
            writeln!(out, "[{pid}]     Effective UID:  {}", identity(&owner.effective))?;
            writeln!(out, "[{pid}]     Real UID:       {}", identity(&owner.real))?;
            writeln!(out, "[{pid}]     Saved UID:      {}", identity(&owner.saved))?;
            writeln!(out, "[{pid}]     Filesystem UID: {}", identity(&owner.filesystem))?;
        }
        None => writeln!(out, "[{pid}]   Owner: unknown")?,
    }

    match &host.times {
        Some(times) => {
            writeln!(out, "[{pid}]   Timing:")?;
            writeln!(out, "[{pid}]     {}", seconds("Usermode:    ", times.user_seconds))?;
            writeln!(out, "[{pid}]     {}", seconds("Kernelmode:  ", times.kernel_seconds))?;
            writeln!(out, "[{pid}]     {}", seconds("Wall-clock:  ", times.wall_clock_seconds))?;
        }
        None => writeln!(out, "[{pid}]   Timing: unknown")?,
    }

    writeln!(
        out,
        "[{pid}]   CPU memory: {}",
        Measured(host.resident_memory, &readable_size)
    )?;

    writeln!(
        out,
        "[{pid}]   GPU memory: running on {} devices, {} in use",
        record.devices.len(),
        Measured(record.gpu_memory(), &readable_size)
    )?;
    for usage in &record.devices {
        let device = census.device(usage.device);
        let name = device.map_or("", |device| device.name.as_str());
        let total = device.and_then(|device| device.memory.total);
        let share = match (usage.used_memory, total) {
            (Some(used), Some(total)) if total > 0 => {
                format!("{:.3}%", used as f64 / total as f64 * 100.0)
            }
            _ => "unavailable".to_string(),
        };
        writeln!(
            out,
            "[{pid}]     on device {} ({name}): {} / {}, {share}",
            usage.device,
            Measured(usage.used_memory, &readable_size),
            Measured(total, &readable_size),
        )?;
    }
    writeln!(out)
}

/// Human readable report, one block per process.
pub fn render_text(census: &Census) -> String {
    let mut out = String::new();
    for record in &census.processes {
        // writing into a String cannot fail
        let _ = render_process(&mut out, census, record);
    }
    out
}

/// The whole census as pretty printed JSON.
pub fn render_json(census: &Census) -> serde_json::Result<String> {
    serde_json::to_string_pretty(census)
}
