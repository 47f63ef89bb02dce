//! Reference stretch engine based on windowed grain overlap-add.
//!
//! Output is built from Hann-windowed grains of [`GRAIN_LEN`] frames laid
//! out every [`HOP`] frames. Grain `k` is centred at output frame `k·HOP`
//! and reads the input around frame `k·HOP / time_ratio`, stepping through
//! it `pitch_ratio` frames per output frame with linear interpolation.
//! The input position sets timing, the read rate sets pitch, so the two
//! ratios are independent.
//!
//! Quality is well below a phase vocoder, but durations are exact and the
//! dominant frequency moves by the requested ratio, which is what the
//! pipeline around it needs.

use crate::engine::arena::{Arena, ArenaAllocation};
use crate::engine::binding::{RawHandle, StretchEngine, read_planar, write_planar};
use crate::engine::passes::PassTracker;
use crate::error::{KeyshiftError, Result};
use std::collections::HashMap;
use std::f64::consts::PI;

/// Frames per grain.
pub const GRAIN_LEN: usize = 4096;

/// Distance between grain centres in the output.
pub const HOP: usize = GRAIN_LEN / 2;

struct GranularSession {
    channels: usize,
    time_ratio: f64,
    pitch_ratio: f64,
    expected_input: Option<usize>,
    passes: PassTracker,
    input: Vec<Vec<f32>>,
    /// Overlap-add accumulator. Index 0 is output frame `retrieved`.
    output: Vec<Vec<f32>>,
    next_grain: usize,
    ready: usize,
    retrieved: usize,
    target_len: usize,
}

impl GranularSession {
    fn grain_start(grain: usize) -> i64 {
        grain as i64 * HOP as i64 - HOP as i64
    }

    fn input_centre(&self, grain: usize) -> f64 {
        (grain * HOP) as f64 / self.time_ratio
    }

    /// Whether every input frame grain `k` reads has arrived.
    fn has_input_for(&self, grain: usize) -> bool {
        let last_read = self.input_centre(grain) + (HOP - 1) as f64 * self.pitch_ratio;
        let needed = last_read.floor() as usize + 1;
        needed < self.input.first().map_or(0, Vec::len)
    }

    fn synthesize(&mut self, window: &[f32], is_final: bool) {
        loop {
            let grain = self.next_grain;
            if Self::grain_start(grain) >= self.target_len as i64 {
                break;
            }
            if !is_final && !self.has_input_for(grain) {
                break;
            }
            self.add_grain(grain, window);
            self.next_grain += 1;
        }

        let complete = self.next_grain.saturating_sub(1) * HOP;
        self.ready = if is_final {
            self.target_len
        } else {
            complete.min(self.target_len)
        };
    }

    fn add_grain(&mut self, grain: usize, window: &[f32]) {
        let start = Self::grain_start(grain);
        let end = (start + GRAIN_LEN as i64 - self.retrieved as i64).max(0) as usize;
        for channel in &mut self.output {
            if channel.len() < end {
                channel.resize(end, 0.0);
            }
        }

        let centre = self.input_centre(grain);
        for (j, &weight) in window.iter().enumerate() {
            let frame = start + j as i64;
            if frame < self.retrieved as i64 {
                continue;
            }
            let slot = (frame - self.retrieved as i64) as usize;
            let position = centre + (j as f64 - HOP as f64) * self.pitch_ratio;
            for (input, output) in self.input.iter().zip(self.output.iter_mut()) {
                output[slot] += interpolate(input, position) * weight;
            }
        }
    }
}

/// Linear interpolation with silence outside the signal.
fn interpolate(samples: &[f32], position: f64) -> f32 {
    let index = position.floor();
    let frac = (position - index) as f32;
    let at = |i: f64| {
        if i < 0.0 {
            0.0
        } else {
            samples.get(i as usize).copied().unwrap_or(0.0)
        }
    };
    let a = at(index);
    if frac == 0.0 {
        return a;
    }
    a + (at(index + 1.0) - a) * frac
}

fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / len as f64).cos()) as f32)
        .collect()
}

fn valid_ratio(ratio: f64) -> bool {
    ratio.is_finite() && ratio > 0.0
}

/// Grain overlap-add engine, always available without native libraries.
pub struct GranularEngine {
    sessions: HashMap<RawHandle, GranularSession>,
    next_handle: RawHandle,
    window: Vec<f32>,
}

impl Default for GranularEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GranularEngine {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_handle: 1,
            window: hann(GRAIN_LEN),
        }
    }

    fn session(&mut self, handle: RawHandle, operation: &str) -> Result<&mut GranularSession> {
        self.sessions
            .get_mut(&handle)
            .ok_or_else(|| KeyshiftError::engine(operation, format!("unknown handle {}", handle)))
    }
}

impl StretchEngine for GranularEngine {
    fn name(&self) -> &str {
        "granular"
    }

    fn create(
        &mut self,
        sample_rate: u32,
        channels: usize,
        time_ratio: f64,
        pitch_ratio: f64,
    ) -> RawHandle {
        if sample_rate == 0
            || channels == 0
            || !valid_ratio(time_ratio)
            || !valid_ratio(pitch_ratio)
        {
            tracing::warn!(
                "granular engine refused session: {} Hz, {} channel(s), time {}, pitch {}",
                sample_rate,
                channels,
                time_ratio,
                pitch_ratio
            );
            return 0;
        }
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.sessions.insert(
            handle,
            GranularSession {
                channels,
                time_ratio,
                pitch_ratio,
                expected_input: None,
                passes: PassTracker::new(usize::MAX),
                input: vec![Vec::new(); channels],
                output: vec![Vec::new(); channels],
                next_grain: 0,
                ready: 0,
                retrieved: 0,
                target_len: 0,
            },
        );
        handle
    }

    fn set_time_ratio(&mut self, handle: RawHandle, ratio: f64) -> Result<()> {
        let session = self.session(handle, "set_time_ratio")?;
        session.passes.configure("set_time_ratio")?;
        if !valid_ratio(ratio) {
            return Err(KeyshiftError::engine("set_time_ratio", format!("invalid ratio {}", ratio)));
        }
        session.time_ratio = ratio;
        Ok(())
    }

    fn set_pitch_scale(&mut self, handle: RawHandle, ratio: f64) -> Result<()> {
        let session = self.session(handle, "set_pitch_scale")?;
        session.passes.configure("set_pitch_scale")?;
        if !valid_ratio(ratio) {
            return Err(KeyshiftError::engine(
                "set_pitch_scale",
                format!("invalid ratio {}", ratio),
            ));
        }
        session.pitch_ratio = ratio;
        Ok(())
    }

    fn set_expected_input_duration(&mut self, handle: RawHandle, frames: usize) -> Result<()> {
        let session = self.session(handle, "set_expected_input_duration")?;
        session.passes.configure("set_expected_input_duration")?;
        session.expected_input = Some(frames);
        Ok(())
    }

    fn set_max_process_size(&mut self, handle: RawHandle, frames: usize) -> Result<()> {
        self.session(handle, "set_max_process_size")?
            .passes
            .set_max_chunk(frames)
    }

    fn samples_required(&mut self, handle: RawHandle) -> Result<usize> {
        let session = self.session(handle, "samples_required")?;
        let per_hop = (HOP as f64 / session.time_ratio).ceil() as usize;
        Ok(per_hop.clamp(1, session.passes.max_chunk()))
    }

    fn study(
        &mut self,
        handle: RawHandle,
        _arena: &Arena,
        _inputs: ArenaAllocation,
        frames: usize,
        is_final: bool,
    ) -> Result<()> {
        let session = self.session(handle, "study")?;
        session.passes.study(frames, is_final)?;
        if is_final {
            let studied = session.passes.studied();
            if let Some(expected) = session.expected_input
                && expected != studied
            {
                tracing::warn!(
                    "study pass saw {} frames, {} were announced",
                    studied,
                    expected
                );
            }
            session.target_len = (studied as f64 * session.time_ratio).round() as usize;
        }
        Ok(())
    }

    fn process(
        &mut self,
        handle: RawHandle,
        arena: &Arena,
        inputs: ArenaAllocation,
        frames: usize,
        is_final: bool,
    ) -> Result<()> {
        let Self {
            sessions, window, ..
        } = self;
        let session = sessions
            .get_mut(&handle)
            .ok_or_else(|| KeyshiftError::engine("process", format!("unknown handle {}", handle)))?;
        session.passes.process(frames, is_final)?;

        let chunk = read_planar(arena, inputs, session.channels, frames)?;
        for (input, samples) in session.input.iter_mut().zip(chunk) {
            input.extend(samples);
        }
        session.synthesize(window, is_final);
        Ok(())
    }

    fn available(&mut self, handle: RawHandle) -> Result<i64> {
        let session = self.session(handle, "available")?;
        Ok(session.ready as i64 - session.retrieved as i64)
    }

    fn retrieve(
        &mut self,
        handle: RawHandle,
        arena: &Arena,
        outputs: ArenaAllocation,
        max_frames: usize,
    ) -> Result<usize> {
        let session = self.session(handle, "retrieve")?;
        let count = (session.ready - session.retrieved).min(max_frames);
        if count == 0 {
            return Ok(0);
        }

        for channel in &mut session.output {
            if channel.len() < count {
                channel.resize(count, 0.0);
            }
        }
        let slices: Vec<&[f32]> = session.output.iter().map(|c| &c[..count]).collect();
        write_planar(arena, outputs, &slices)?;

        for channel in &mut session.output {
            channel.drain(..count);
        }
        session.retrieved += count;
        Ok(count)
    }

    fn destroy(&mut self, handle: RawHandle) {
        self.sessions.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::arena::ChannelBuffers;
    use approx::assert_abs_diff_eq;

    /// Runs both passes in `chunk`-sized pieces and drains everything.
    fn run(input: &[f32], time_ratio: f64, pitch_ratio: f64, chunk: usize) -> Vec<f32> {
        let arena = Arena::new(16 * 1024 * 1024).unwrap();
        let mut engine = GranularEngine::new();
        let handle = engine.create(44100, 1, time_ratio, pitch_ratio);
        assert_ne!(handle, 0);

        let pieces: Vec<&[f32]> = input.chunks(chunk).collect();
        for (i, piece) in pieces.iter().enumerate() {
            let inputs = ChannelBuffers::allocate(&arena, 1, piece.len()).unwrap();
            engine
                .study(handle, &arena, inputs.table(), piece.len(), i + 1 == pieces.len())
                .unwrap();
        }

        let mut output = Vec::new();
        for (i, piece) in pieces.iter().enumerate() {
            let inputs = ChannelBuffers::allocate(&arena, 1, piece.len()).unwrap();
            inputs.write_channel(0, piece).unwrap();
            engine
                .process(handle, &arena, inputs.table(), piece.len(), i + 1 == pieces.len())
                .unwrap();
            inputs.release().unwrap();

            let available = engine.available(handle).unwrap().max(0) as usize;
            if available > 0 {
                let outputs = ChannelBuffers::allocate(&arena, 1, available).unwrap();
                let got = engine.retrieve(handle, &arena, outputs.table(), available).unwrap();
                assert_eq!(got, available);
                output.extend(outputs.read_channel(0, got).unwrap());
            }
        }
        assert_eq!(engine.available(handle).unwrap(), 0);
        engine.destroy(handle);
        output
    }

    fn sine(frequency: f64, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * frequency * i as f64 / 44100.0).sin() as f32 * 0.5)
            .collect()
    }

    #[test]
    fn hann_window_overlaps_to_unity() {
        let window = hann(GRAIN_LEN);
        for i in 0..HOP {
            assert_abs_diff_eq!(window[i] + window[i + HOP], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn identity_ratios_reproduce_the_input() {
        let input = sine(440.0, 20_000);

        let output = run(&input, 1.0, 1.0, 1024);

        assert_eq!(output.len(), input.len());
        for (a, b) in output.iter().zip(input.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn output_length_follows_time_ratio() {
        let input = sine(440.0, 10_000);

        assert_eq!(run(&input, 2.0, 1.0, 700).len(), 20_000);
        assert_eq!(run(&input, 0.5, 1.0, 700).len(), 5_000);
        assert_eq!(run(&input, 1.0 / 1.5, 1.3, 4096).len(), 6_667);
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let input = sine(330.0, 12_345);

        let whole = run(&input, 1.25, 0.8, 12_345);
        let pieces = run(&input, 1.25, 0.8, 333);

        assert_eq!(whole.len(), pieces.len());
        for (a, b) in whole.iter().zip(pieces.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn output_is_released_before_the_final_chunk() {
        let arena = Arena::new(16 * 1024 * 1024).unwrap();
        let mut engine = GranularEngine::new();
        let handle = engine.create(44100, 1, 1.0, 1.0);
        let input = sine(440.0, 40_000);

        let inputs = ChannelBuffers::allocate(&arena, 1, input.len()).unwrap();
        inputs.write_channel(0, &input).unwrap();
        engine.study(handle, &arena, inputs.table(), 20_000, false).unwrap();
        engine.study(handle, &arena, inputs.table(), 20_000, true).unwrap();
        engine.process(handle, &arena, inputs.table(), 20_000, false).unwrap();

        let available = engine.available(handle).unwrap();
        assert!(available > 0);
        assert!(available < 20_000);
        assert_eq!(available as usize % HOP, 0);
    }

    #[test]
    fn samples_required_scales_with_time_ratio() {
        let mut engine = GranularEngine::new();
        let slow = engine.create(44100, 1, 2.0, 1.0);
        let fast = engine.create(44100, 1, 0.5, 1.0);
        engine.set_max_process_size(fast, 3000).unwrap();

        assert_eq!(engine.samples_required(slow).unwrap(), 1024);
        assert_eq!(engine.samples_required(fast).unwrap(), 3000);
    }

    #[test]
    fn invalid_sessions_are_refused() {
        let mut engine = GranularEngine::new();
        assert_eq!(engine.create(0, 1, 1.0, 1.0), 0);
        assert_eq!(engine.create(44100, 0, 1.0, 1.0), 0);
        assert_eq!(engine.create(44100, 1, f64::NAN, 1.0), 0);
        assert_eq!(engine.create(44100, 1, 1.0, -1.0), 0);
    }

    #[test]
    fn protocol_violations_are_engine_errors() {
        let arena = Arena::new(1024 * 1024).unwrap();
        let mut engine = GranularEngine::new();
        let handle = engine.create(44100, 1, 1.0, 1.0);
        let inputs = ChannelBuffers::allocate(&arena, 1, 16).unwrap();

        let early = engine.process(handle, &arena, inputs.table(), 16, true);
        assert!(matches!(early, Err(KeyshiftError::Engine { .. })));

        engine.study(handle, &arena, inputs.table(), 16, true).unwrap();
        assert!(engine.set_time_ratio(handle, 2.0).is_err());
        assert!(engine.retrieve(99, &arena, inputs.table(), 1).is_err());
    }

    #[test]
    fn interpolate_reads_silence_outside_the_signal() {
        let samples = [1.0, 3.0];
        assert_eq!(interpolate(&samples, -1.0), 0.0);
        assert_eq!(interpolate(&samples, 0.5), 2.0);
        assert_eq!(interpolate(&samples, 1.5), 1.5);
        assert_eq!(interpolate(&samples, 5.0), 0.0);
        assert_eq!(interpolate(&samples, -0.5), 0.5);
    }
}
