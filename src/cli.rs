use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Booking calendar availability checker.
///
/// Without a subcommand, runs one pass over every configured target and exits.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Configuration file (defaults to ./calwatch.toml when present)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Re-classify saved calendar HTML offline. Sends no notifications.
    Replay {
        /// HTML captures, in navigation order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Name shown in the summary
        #[arg(long, default_value = "replay")]
        target_name: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable output
    Pretty,
    /// One JSON object per line
    Json,
}

/// Pretty while developing, JSON for release builds.
fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
