//! provides logging helpers

use std::env;
use std::io::IsTerminal;

use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Directory receiving a persistent copy of diagnostics when set.
pub const LOG_PATH_ENV_VAR: &str = "GPU_TOOLS_LOG_PATH";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

fn use_ansi(colored: bool) -> bool {
    colored && std::io::stderr().is_terminal()
}

/// initiate the global tracing subscriber
///
/// Diagnostics always go to stderr, colored only when `colored` is set and
/// stderr is a terminal. Callers that later redirect stderr into a file pass
/// `false`. The file appender writes synchronously: the launcher may replace
/// its own process image right after logging, and a background writer would
/// drop whatever it had not flushed yet.
pub fn init(app_name: &str, colored: bool) {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi(colored))
        .with_target(true)
        .with_filter(env_filter());

    let mut appender_error = None;
    let file_layer = env::var(LOG_PATH_ENV_VAR).ok().and_then(|log_dir| {
        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(format!("{app_name}.log"))
            .max_log_files(3)
            .build(&log_dir)
        {
            Ok(appender) => Some(
                layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_filter(env_filter()),
            ),
            Err(err) => {
                appender_error = Some(format!("{log_dir}: {err}"));
                None
            }
        }
    });

    registry().with(fmt_layer).with(file_layer).init();

    if let Some(err) = appender_error {
        tracing::warn!("failed to create rolling file appender at {err}; logging to stderr only");
    }
}
