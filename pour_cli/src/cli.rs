//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "pour", version, about = "Multi-filter weight estimation and pour scoring")]
pub struct Cli {
    /// Path to config TOML (defaults apply when omitted)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit JSON lines instead of human-readable output
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the live pipeline against the simulated scale
    Run {
        /// Start a pour toward this many grams right away
        #[arg(long, value_name = "GRAMS")]
        target: Option<f64>,
        /// Stop after this many samples
        #[arg(long, value_name = "N")]
        samples: Option<u64>,
        /// Simulated pour rate (g/s)
        #[arg(long, value_name = "GPS", default_value_t = 4.0)]
        rate_gps: f64,
        /// Weight the simulated pour settles at (defaults to the target)
        #[arg(long, value_name = "GRAMS")]
        fill_g: Option<f64>,
        /// Gaussian noise sigma of the simulated scale (g)
        #[arg(long, value_name = "GRAMS", default_value_t = 0.5)]
        noise_g: f64,
        /// Seed for the simulated noise
        #[arg(long, default_value_t = 1)]
        seed: u32,
        /// Advance a simulated clock instead of waiting in real time
        #[arg(long, action = ArgAction::SetTrue)]
        fast: bool,
        /// Read operator commands from stdin (`start [g]`, `target <g>`, `stop`)
        #[arg(long, action = ArgAction::SetTrue)]
        stdin: bool,
        /// Print every filter record, not only pour events
        #[arg(long, action = ArgAction::SetTrue)]
        records: bool,
    },
    /// Replay a recorded `t_s,value` CSV through the filter bank
    Replay {
        /// Recorded trace
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Output CSV (stdout when omitted)
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Score a pour toward this many grams over the trace
        #[arg(long, value_name = "GRAMS")]
        target: Option<f64>,
    },
    /// Quick health check: config, filter construction, a short simulated run
    SelfCheck,
}
