//! Command-line interface for keyshift
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Pitch and tempo shifting for audio files
#[derive(Parser, Debug)]
#[command(name = "keyshift", version, about = "Pitch and tempo shifting for audio files")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a timeout such as `30s`, `2m` or a bare number of seconds.
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let duration = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if duration.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(duration)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Shift the pitch and/or tempo of an audio file
    Shift {
        /// Input audio file (WAV)
        input: PathBuf,

        /// Output file (default: <input>.shifted.wav)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Pitch shift in semitones (e.g. 7, -3.5)
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        semitones: f64,

        /// Playback speed factor (2.0 = twice as fast)
        #[arg(short, long, default_value = "1.0")]
        tempo: f64,

        /// Processing timeout (default from config). Examples: 30s, 2m
        #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
        timeout: Option<Duration>,

        /// Allow shifts beyond ±24 semitones
        #[arg(long)]
        force: bool,
    },

    /// Show format, channels, rate and duration of an audio file
    Info {
        /// Audio file to inspect
        input: PathBuf,
    },

    /// Print the pitch ratio for a semitone shift
    Ratio {
        /// Semitones (e.g. 12, -5)
        #[arg(allow_hyphen_values = true)]
        semitones: f64,
    },

    /// View configuration
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

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file, defaults and env overrides)
    Show,
    /// Print the configuration file path
    Path,
}
