//! Handle-based stretch engine interface.
//!
//! The engine API mirrors a native time-stretch library: sessions are
//! opaque integer handles, sample data moves through arena pointer tables,
//! and a zero handle means creation failed. [`StretchSession`] wraps a handle
//! so it is destroyed on every exit path.

use crate::engine::arena::{Arena, ArenaAllocation};
use crate::error::{KeyshiftError, Result};

/// Opaque session handle. Zero is never a valid session.
pub type RawHandle = u32;

/// A two-pass (study, then process) time-stretch and pitch-shift engine.
///
/// Input and output sample data is addressed through pointer tables in the
/// caller's [`Arena`]: `channels` little-endian `u32` addresses, each pointing
/// at a buffer of `f32` samples.
pub trait StretchEngine: Send {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Creates a session configured for offline processing with precise
    /// timing, high-quality pitch shifting and channels processed together.
    ///
    /// Returns 0 on failure.
    fn create(
        &mut self,
        sample_rate: u32,
        channels: usize,
        time_ratio: f64,
        pitch_ratio: f64,
    ) -> RawHandle;

    fn set_time_ratio(&mut self, handle: RawHandle, ratio: f64) -> Result<()>;

    fn set_pitch_scale(&mut self, handle: RawHandle, ratio: f64) -> Result<()>;

    /// Tells the engine how many frames the study pass will see.
    fn set_expected_input_duration(&mut self, handle: RawHandle, frames: usize) -> Result<()>;

    /// Upper bound on the frame count of a single study/process call.
    fn set_max_process_size(&mut self, handle: RawHandle, frames: usize) -> Result<()>;

    /// Preferred chunk size for study and process calls.
    fn samples_required(&mut self, handle: RawHandle) -> Result<usize>;

    /// Feeds one chunk of the analysis pass.
    fn study(
        &mut self,
        handle: RawHandle,
        arena: &Arena,
        inputs: ArenaAllocation,
        frames: usize,
        is_final: bool,
    ) -> Result<()>;

    /// Feeds one chunk of the synthesis pass.
    fn process(
        &mut self,
        handle: RawHandle,
        arena: &Arena,
        inputs: ArenaAllocation,
        frames: usize,
        is_final: bool,
    ) -> Result<()>;

    /// Frames ready for retrieval. Negative values mean none.
    fn available(&mut self, handle: RawHandle) -> Result<i64>;

    /// Copies up to `max_frames` ready frames into the output buffers and
    /// returns how many were written.
    fn retrieve(
        &mut self,
        handle: RawHandle,
        arena: &Arena,
        outputs: ArenaAllocation,
        max_frames: usize,
    ) -> Result<usize>;

    /// Releases the session. Unknown handles are ignored.
    fn destroy(&mut self, handle: RawHandle);
}

/// Dereferences a pointer table and reads `frames` samples from each channel.
///
/// Used by engines to pull their input out of the caller's arena.
pub fn read_planar(
    arena: &Arena,
    table: ArenaAllocation,
    channels: usize,
    frames: usize,
) -> Result<Vec<Vec<f32>>> {
    arena
        .read_addresses(table, 0, channels)?
        .into_iter()
        .map(|address| {
            let buffer = arena.resolve(address)?;
            arena.read_floats(buffer, 0, frames)
        })
        .collect()
}

/// Dereferences a pointer table and writes one slice per channel.
pub fn write_planar(arena: &Arena, table: ArenaAllocation, data: &[&[f32]]) -> Result<()> {
    let addresses = arena.read_addresses(table, 0, data.len())?;
    for (address, samples) in addresses.into_iter().zip(data) {
        let buffer = arena.resolve(address)?;
        arena.write_floats(buffer, 0, samples)?;
    }
    Ok(())
}

/// A live engine session, destroyed when dropped.
pub struct StretchSession<'e> {
    engine: &'e mut dyn StretchEngine,
    handle: RawHandle,
    channels: usize,
}

impl<'e> StretchSession<'e> {
    pub fn create(
        engine: &'e mut dyn StretchEngine,
        sample_rate: u32,
        channels: usize,
        time_ratio: f64,
        pitch_ratio: f64,
    ) -> Result<Self> {
        let handle = engine.create(sample_rate, channels, time_ratio, pitch_ratio);
        if handle == 0 {
            return Err(KeyshiftError::Creation {
                message: format!(
                    "{} returned a null handle for {} channel(s) at {} Hz",
                    engine.name(),
                    channels,
                    sample_rate
                ),
            });
        }
        tracing::debug!("{} session {} created", engine.name(), handle);
        Ok(Self {
            engine,
            handle,
            channels,
        })
    }

    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn set_time_ratio(&mut self, ratio: f64) -> Result<()> {
        self.engine.set_time_ratio(self.handle, ratio)
    }

    pub fn set_pitch_scale(&mut self, ratio: f64) -> Result<()> {
        self.engine.set_pitch_scale(self.handle, ratio)
    }

    pub fn set_expected_input_duration(&mut self, frames: usize) -> Result<()> {
        self.engine.set_expected_input_duration(self.handle, frames)
    }

    pub fn set_max_process_size(&mut self, frames: usize) -> Result<()> {
        self.engine.set_max_process_size(self.handle, frames)
    }

    pub fn samples_required(&mut self) -> Result<usize> {
        self.engine.samples_required(self.handle)
    }

    pub fn study(
        &mut self,
        arena: &Arena,
        inputs: ArenaAllocation,
        frames: usize,
        is_final: bool,
    ) -> Result<()> {
        self.engine.study(self.handle, arena, inputs, frames, is_final)
    }

    pub fn process(
        &mut self,
        arena: &Arena,
        inputs: ArenaAllocation,
        frames: usize,
        is_final: bool,
    ) -> Result<()> {
        self.engine.process(self.handle, arena, inputs, frames, is_final)
    }

    /// Ready frame count, with negative engine values reported as zero.
    pub fn available(&mut self) -> Result<usize> {
        let available = self.engine.available(self.handle)?;
        Ok(usize::try_from(available).unwrap_or(0))
    }

    pub fn retrieve(
        &mut self,
        arena: &Arena,
        outputs: ArenaAllocation,
        max_frames: usize,
    ) -> Result<usize> {
        self.engine.retrieve(self.handle, arena, outputs, max_frames)
    }
}

impl Drop for StretchSession<'_> {
    fn drop(&mut self) {
        self.engine.destroy(self.handle);
        tracing::debug!("{} session {} destroyed", self.engine.name(), self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::arena::ChannelBuffers;
    use crate::engine::mock::MockEngine;

    #[test]
    fn null_handle_is_a_creation_error() {
        let mut engine = MockEngine::new().with_create_failure();

        let result = StretchSession::create(&mut engine, 44100, 2, 1.0, 1.0);

        match result {
            Err(KeyshiftError::Creation { message }) => {
                assert!(message.contains("null handle"), "got: {message}");
            }
            Err(other) => panic!("expected Creation error, got {:?}", other),
            Ok(_) => panic!("expected Creation error"),
        }
    }

    #[test]
    fn session_is_destroyed_on_drop() {
        let mut engine = MockEngine::new();
        let log = engine.log();
        {
            let session = StretchSession::create(&mut engine, 44100, 1, 1.0, 1.0).unwrap();
            assert_ne!(session.handle(), 0);
            assert_eq!(log.snapshot().created, 1);
            assert_eq!(log.snapshot().destroyed, 0);
        }
        assert_eq!(log.snapshot().destroyed, 1);
    }

    #[test]
    fn session_is_destroyed_when_a_call_fails() {
        let mut engine = MockEngine::new().with_failure_on_study(0);
        let log = engine.log();
        let arena = Arena::new(64 * 1024).unwrap();

        let outcome = (|| -> Result<()> {
            let mut session = StretchSession::create(&mut engine, 8000, 1, 1.0, 2.0)?;
            let inputs = ChannelBuffers::allocate(&arena, 1, 4)?;
            session.study(&arena, inputs.table(), 4, true)?;
            inputs.release()
        })();

        assert!(outcome.is_err());
        assert_eq!(log.snapshot().destroyed, 1);
        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn planar_helpers_follow_the_pointer_table() {
        let arena = Arena::new(64 * 1024).unwrap();
        let buffers = ChannelBuffers::allocate(&arena, 2, 3).unwrap();

        write_planar(&arena, buffers.table(), &[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]).unwrap();
        let read = read_planar(&arena, buffers.table(), 2, 3).unwrap();

        assert_eq!(read, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(buffers.read_channel(1, 3).unwrap(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn engine_trait_is_object_safe() {
        let mut engine: Box<dyn StretchEngine> = Box::new(MockEngine::new());
        let session = StretchSession::create(engine.as_mut(), 8000, 1, 1.0, 1.0).unwrap();
        assert_eq!(session.channels(), 1);
    }
}
