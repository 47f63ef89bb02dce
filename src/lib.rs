//! keyshift - pitch and tempo shifting for audio files
//!
//! A streaming two-pass time-stretch pipeline: a stretch engine studies and
//! processes the signal chunk by chunk through a bounded memory arena, on a
//! worker thread driven from async code.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod stretch;
pub mod worker;

#[cfg(feature = "cli")]
pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
pub mod output;

// Data model and collaborators
pub use audio::{AudioFormat, AudioSignal, Decoder, DecoderChain, Encoder, Transcoder, WavCodec};

// Engines
pub use engine::{Arena, GranularEngine, MockEngine, StretchEngine};

// Pipeline
pub use stretch::{
    ChunkScheduler, ShiftParams, StretchRequest, pitch_ratio, semitones_from_ratio, shift,
};

// Worker channel
pub use worker::{ChannelOptions, JobEvent, ProcessJob, WorkerChannel};

// Error handling
pub use error::{ErrorKind, KeyshiftError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
