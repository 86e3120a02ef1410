use clap::Parser;
use clap::ValueEnum;
use utils::version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// List all compute processes running on GPUs with detailed information
#[derive(Parser, Debug, Clone)]
#[command(name = "gps", version = &**version::VERSION)]
pub struct CensusArgs {
    #[arg(
        long,
        value_enum,
        env = "GPS_FORMAT",
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    pub format: OutputFormat,
}
