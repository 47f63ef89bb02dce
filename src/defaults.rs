//! Default configuration constants for keyshift.
//!
//! Shared by the config file types, the worker channel and the CLI so the
//! same numbers apply whichever entry point is used.

/// Default max process size hint passed to the stretch engine, in samples.
pub const BLOCK_SIZE: usize = 4096;

/// Default size of the engine memory arena in bytes (32 MiB).
///
/// One iteration stages `channels × chunk` floats for input plus the same for
/// output, so this leaves plenty of room for wide multichannel files.
pub const ARENA_BYTES: usize = 32 * 1024 * 1024;

/// Default timeout for the worker `initialize` request.
pub const INITIALIZE_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for one `process` request, measured from submission.
pub const PROCESS_TIMEOUT_MS: u64 = 30_000;

/// Default export container.
pub const EXPORT_FORMAT: &str = "wav";

/// Default export bitrate in kbit/s (ignored by lossless containers).
pub const EXPORT_BITRATE: u32 = 192;

/// Semitone range accepted by the CLI.
pub const MAX_SEMITONES: f64 = 24.0;

/// Full-scale value used when quantizing floats to 16-bit PCM.
pub const PCM16_SCALE: f32 = 32767.0;
