//! Command-line interface for framepace
//!
//! Provides argument parsing using clap derive macros.

use crate::config::TransportKind;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Re-frames bursty PCM into fixed-size frames sent at a steady cadence
#[derive(Parser, Debug)]
#[command(
    name = "framepace",
    version,
    about = "Re-frames bursty PCM into fixed-size frames sent at a steady cadence"
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Overrides shared by every command that needs a frame format or endpoints.
#[derive(clap::Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct Overrides {
    /// Upstream producer address (host:port)
    #[arg(long, value_name = "ADDR")]
    pub source: Option<String>,

    /// Downstream consumer address (host:port)
    #[arg(long, value_name = "ADDR")]
    pub sink: Option<String>,

    /// Sample rate in Hz
    #[arg(long, value_name = "HZ")]
    pub sample_rate: Option<u32>,

    /// Frame duration in milliseconds (also the send interval)
    #[arg(long, value_name = "MS")]
    pub frame_ms: Option<u32>,

    /// Wire protocol for source and sink (tcp or websocket)
    #[arg(long, value_name = "KIND")]
    pub transport: Option<TransportKind>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Relay the source to the sink at a fixed cadence (default)
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Serve a bursty synthetic PCM stream for testing the relay
    Produce {
        /// Address to listen on
        #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:9000")]
        listen: String,

        /// Stream samples from a 16-bit WAV file instead of a 440Hz tone
        #[arg(long, value_name = "FILE")]
        wav: Option<PathBuf>,

        /// RNG seed for burst sizes and gaps
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Smallest burst, in frames
        #[arg(long, value_name = "FRAMES", default_value_t = 0.5)]
        burst_min: f64,

        /// Largest burst, in frames
        #[arg(long, value_name = "FRAMES", default_value_t = 3.0)]
        burst_max: f64,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Accept the relay's output and report its cadence
    Receive {
        /// Address to listen on
        #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:9001")]
        listen: String,

        /// Stop after this long (e.g. 30s, 5m). Runs until Ctrl-C if omitted
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Run the pipeline on virtual time with synthetic bursty input
    Simulate {
        /// Dispatch cycles to run
        #[arg(long, default_value_t = 100)]
        cycles: usize,

        /// Inject a pause of this many milliseconds halfway through
        #[arg(long, value_name = "MS")]
        stall_ms: Option<u64>,

        /// RNG seed for the synthetic input
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

/// Parse a duration: bare numbers are seconds, otherwise any `humantime` format.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
