//! The streaming time-stretch pipeline.

pub mod accumulator;
pub mod chunk;
pub mod progress;
pub mod ratio;
pub mod request;
pub mod scheduler;

pub use accumulator::{OutputAccumulator, OutputChunk};
pub use chunk::{Chunk, Chunks};
pub use progress::{CancelToken, ProgressReporter, ProgressSink};
pub use ratio::{ShiftParams, pitch_ratio, semitones_from_ratio, time_ratio};
pub use request::{PreparedRequest, StretchRequest};
pub use scheduler::{ChunkScheduler, SchedulerState, shift};
