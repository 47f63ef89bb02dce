//! Stretch engines and the memory they share with the scheduler.

pub mod arena;
pub mod binding;
pub mod granular;
pub mod mock;
mod passes;

pub use arena::{Arena, ArenaAllocation, ArenaStats, ChannelBuffers};
pub use binding::{RawHandle, StretchEngine, StretchSession, read_planar, write_planar};
pub use granular::GranularEngine;
pub use mock::{MockEngine, MockEngineLog, MockLog};
