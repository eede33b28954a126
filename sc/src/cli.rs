//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// SegCache - segment cache coordinator
#[derive(Parser)]
#[command(
    name = "sc",
    about = "Exercise and inspect the segment cache coordinator",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/segcache/logs/sc.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Hammer one actor with concurrent requesters and a simulated backend
    Soak {
        /// Number of requester threads
        #[arg(short, long, default_value = "8")]
        workers: usize,

        /// Number of distinct segments requested
        #[arg(short, long, default_value = "16")]
        segments: usize,

        /// Requests per worker
        #[arg(short, long, default_value = "200")]
        requests: usize,

        /// Fraction of backend loads that fail (0.0 - 1.0)
        #[arg(short, long, default_value = "0.0")]
        fail_rate: f64,

        /// Flush the whole star every N requests per worker (0 = never)
        #[arg(long, default_value = "0")]
        flush_every: usize,
    },

    /// Print the effective configuration as YAML
    ShowConfig,
}

/// Location of the log file written by `sc`
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("segcache")
        .join("logs")
        .join("sc.log");
    debug!(?path, "get_log_path: returning path");
    path
}
