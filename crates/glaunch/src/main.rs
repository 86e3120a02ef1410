use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::error::ErrorKind;
use clap::CommandFactory;
use clap::Parser;
use glaunch::config;
use glaunch::config::LaunchArgs;
use glaunch::config::LaunchRequest;
use glaunch::launcher;
use glaunch::supervisor::Supervisor;
use glaunch::waiter::wait_for_devices;
use glaunch::watcher::MemoryWatcher;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() {
    setup_global_hooks();

    let raw: Vec<OsString> = std::env::args_os().collect();
    let args = LaunchArgs::parse_from(&raw);
    logging::init("glaunch", args.colored_diagnostics());

    tracing::info!(
        branch = version::branch().unwrap_or("unknown"),
        "Starting glaunch {}",
        &**version::VERSION
    );
    for option in config::repeated_options(&raw) {
        tracing::warn!("multiple instances of option --{option}, the last one takes effect");
    }

    let request = match LaunchRequest::try_from(args) {
        Ok(request) => request,
        Err(err) => LaunchArgs::command()
            .error(ErrorKind::ValueValidation, err)
            .exit(),
    };

    let code = match run(request).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            glaunch::exit_code(&err)
        }
    };
    std::process::exit(code);
}

async fn run(request: LaunchRequest) -> Result<i32> {
    request.log_summary();

    let nvml = Arc::new(inventory::init_nvml().context("NVML is required to select devices")?);

    let selection = wait_for_devices(nvml.as_ref(), &request.fit, &request.wait)
        .await
        .context("waiting for devices")?;

    // before any further output so the log file gets all of it
    let _tee = match &request.logging_path {
        Some(path) => Some(launcher::duplicate_output(path)?),
        None => None,
    };

    tracing::info!("running on GPU: {selection}");
    tracing::info!("executing: {}...", launcher::shell_quote(&request.program));

    let command = launcher::build_command(&request.program, &selection, !request.direct_exec());
    if request.direct_exec() {
        return Err(launcher::exec_in_place(command).into());
    }

    let supervisor = Supervisor::new(launcher::spawn(command)?)?;
    tracing::debug!(pid = supervisor.pid(), "program started");

    if let Some(interval) = request.monitor_interval {
        MemoryWatcher::new(
            Arc::clone(&nvml),
            selection.ids().to_vec(),
            supervisor.process_group(),
            interval,
        )
        .spawn();
    }

    let outcome = supervisor.wait(request.timing).await?;
    Ok(outcome.termination.exit_code())
}
