use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use gps::census::Census;
use gps::census::ProcfsSource;
use gps::config::CensusArgs;
use gps::config::OutputFormat;
use gps::report;
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

fn main() -> Result<()> {
    setup_global_hooks();

    let args = CensusArgs::parse();
    logging::init("gps", true);

    tracing::debug!("Starting gps {}", &**version::VERSION);

    let nvml = inventory::init_nvml().context("NVML is required to list GPU processes")?;
    let census = Census::collect(&nvml, &mut ProcfsSource::default())
        .context("failed to take the GPU process census")?;

    match args.format {
        OutputFormat::Text => print!("{}", report::render_text(&census)),
        OutputFormat::Json => println!(
            "{}",
            report::render_json(&census).context("failed to serialize the census")?
        ),
    }

    Ok(())
}
