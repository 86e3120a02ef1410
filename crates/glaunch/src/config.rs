use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::CommandFactory;
use clap::Parser;
use thiserror::Error;
use utils::units;
use utils::version;

use crate::selector::FitRequest;
use crate::selector::MemoryEstimation;
use crate::selector::SelectionPolicy;

/// Wait used when only `--wait-interval` is given.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Poll interval used when only `--wait-timeout` is given.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(60);

const MANY_GPUS: u32 = 16;
const LARGE_MEMORY_BUDGET: u64 = 0x20_0000_0000;

fn parse_size_arg(value: &str) -> Result<u64, units::UnitError> {
    units::parse_size(value)
}

fn parse_duration_arg(value: &str) -> Result<Duration, units::UnitError> {
    units::parse_duration(value)
}

fn parse_policy_arg(value: &str) -> Result<SelectionPolicy, String> {
    value.parse()
}

/// Launch computational process on proper GPUs regards to memory availability
#[derive(Parser, Debug, Clone)]
#[command(
    name = "glaunch",
    version = &**version::VERSION,
    args_override_self = true,
    after_help = "If a program name starts with '--', put '--' before it to end option parsing."
)]
pub struct LaunchArgs {
    #[arg(
        long = "gpus",
        value_name = "GPU_COUNT",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Use GPU_COUNT gpus for this program"
    )]
    pub gpus: u32,

    #[arg(
        long,
        value_name = "MEMORY_SIZE",
        value_parser = parse_size_arg,
        help = "Slight over-estimated memory your program consumes per GPU, suffixes such as KiB, MiB, GiB are allowed. Without it any amount of memory is assumed to do"
    )]
    pub memory_budget: Option<u64>,

    #[arg(
        long,
        value_name = "POLICY",
        env = "GLAUNCH_POLICY",
        default_value = "worst",
        value_parser = parse_policy_arg,
        help = "Device selection policy: worst (maximize free memory left after launch) or best (minimize it)"
    )]
    pub policy: SelectionPolicy,

    #[arg(long, help = "Summarize the elapsed time of the program when it terminates")]
    pub time: bool,

    #[arg(
        long = "log",
        value_name = "PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "Duplicate and save stdout and stderr to PATH"
    )]
    pub log: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DURATION",
        value_parser = parse_duration_arg,
        help = "Dump GPU memory usage of the program every DURATION, suffixes m, h, d are supported"
    )]
    pub watch_memory: Option<Duration>,

    #[arg(
        long,
        value_name = "DURATION",
        env = "GLAUNCH_WAIT_TIMEOUT",
        value_parser = parse_duration_arg,
        help = "Wait no longer than DURATION for devices with sufficient memory, defaults to 1h when only --wait-interval is given"
    )]
    pub wait_timeout: Option<Duration>,

    #[arg(
        long,
        value_name = "DURATION",
        env = "GLAUNCH_WAIT_INTERVAL",
        value_parser = parse_duration_arg,
        help = "Check memory availability every DURATION while waiting, defaults to 1m when only --wait-timeout is given"
    )]
    pub wait_interval: Option<Duration>,

    /// The program to launch followed by its arguments, passed through unmodified
    #[arg(
        value_name = "PROGRAM",
        required = true,
        num_args = 1..,
        trailing_var_arg = true
    )]
    pub program: Vec<OsString>,
}

impl LaunchArgs {
    /// Diagnostics are colored unless they will also be copied into a log file.
    pub fn colored_diagnostics(&self) -> bool {
        self.log.is_none()
    }
}

/// Long options given more than once ahead of the program, each named once.
///
/// Meant for a command line that already parsed: scanning stops at the
/// program, at `--` or at anything that is not a known long option.
pub fn repeated_options<I, T>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let command = LaunchArgs::command();
    let mut seen = HashSet::new();
    let mut repeated = Vec::new();

    let mut words = raw.into_iter().map(Into::into).skip(1);
    while let Some(word) = words.next() {
        let Some(option) = word.to_str().and_then(|word| word.strip_prefix("--")) else {
            break;
        };
        let (name, inline_value) = match option.split_once('=') {
            Some((name, _)) => (name, true),
            None => (option, false),
        };
        let Some(arg) = command
            .get_arguments()
            .find(|arg| !name.is_empty() && arg.get_long() == Some(name))
        else {
            break;
        };
        if arg.get_action().takes_values() && !inline_value {
            words.next();
        }
        if !seen.insert(name.to_string()) && !repeated.iter().any(|known| known == name) {
            repeated.push(name.to_string());
        }
    }
    repeated
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--wait-interval must be positive when waiting for devices")]
    ZeroWaitInterval,
    #[error("no program to launch")]
    MissingProgram,
}

/// How long to keep polling for devices, and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Zero means a single poll.
    pub timeout: Duration,
    pub interval: Duration,
}

impl WaitPolicy {
    /// Fills in whichever half is missing; with neither there is no waiting.
    pub fn resolve(
        timeout: Option<Duration>,
        interval: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        let policy = match (timeout, interval) {
            (None, None) => Self {
                timeout: Duration::ZERO,
                interval: DEFAULT_WAIT_INTERVAL,
            },
            (Some(timeout), None) => Self {
                timeout,
                interval: DEFAULT_WAIT_INTERVAL,
            },
            (None, Some(interval)) => Self {
                timeout: DEFAULT_WAIT_TIMEOUT,
                interval,
            },
            (Some(timeout), Some(interval)) => Self { timeout, interval },
        };

        if !policy.timeout.is_zero() && policy.interval.is_zero() {
            return Err(ConfigError::ZeroWaitInterval);
        }
        Ok(policy)
    }

    pub fn waits(&self) -> bool {
        !self.timeout.is_zero()
    }
}

/// Immutable launch configuration derived once from the command line.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub fit: FitRequest,
    pub wait: WaitPolicy,
    /// `None` disables the memory watcher.
    pub monitor_interval: Option<Duration>,
    pub timing: bool,
    pub logging_path: Option<PathBuf>,
    pub program: Vec<OsString>,
}

impl LaunchRequest {
    /// Whether the program can replace this process outright: nothing is left
    /// for a supervisor to do without timing or monitoring.
    pub fn direct_exec(&self) -> bool {
        !self.timing && self.monitor_interval.is_none()
    }

    /// Logs the effective configuration.
    pub fn log_summary(&self) {
        tracing::info!(
            gpu_count = self.fit.gpu_count,
            memory_estimation = %self.fit.memory_estimation,
            policy = %self.fit.policy,
            timing = self.timing,
            logging_path = ?self.logging_path,
            monitor_interval = ?self.monitor_interval,
            wait_timeout = ?self.wait.timeout,
            wait_interval = ?self.wait.interval,
            "Launch configuration"
        );
    }
}

impl TryFrom<LaunchArgs> for LaunchRequest {
    type Error = ConfigError;

    fn try_from(args: LaunchArgs) -> Result<Self, Self::Error> {
        if args.program.is_empty() {
            return Err(ConfigError::MissingProgram);
        }

        if args.gpus > MANY_GPUS {
            tracing::warn!("{} GPUs requested, make sure this host really has them", args.gpus);
        }

        let memory_estimation = match args.memory_budget {
            Some(bytes) => {
                if bytes > LARGE_MEMORY_BUDGET {
                    tracing::warn!(
                        "memory budget of {} per GPU is unusually large",
                        units::readable_size(bytes)
                    );
                }
                MemoryEstimation::PerDevice(bytes)
            }
            None => MemoryEstimation::NoEstimation,
        };

        Ok(Self {
            fit: FitRequest {
                gpu_count: args.gpus,
                memory_estimation,
                policy: args.policy,
            },
            wait: WaitPolicy::resolve(args.wait_timeout, args.wait_interval)?,
            monitor_interval: args.watch_memory.filter(|interval| !interval.is_zero()),
            timing: args.time,
            logging_path: args.log,
            program: args.program,
        })
    }
}
