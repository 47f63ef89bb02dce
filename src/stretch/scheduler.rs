//! Two-pass chunk scheduler.
//!
//! Drives one engine session through the study pass, the process pass and
//! a final drain, staging every chunk through the arena:
//!
//! ```text
//! Idle → Configuring → Studying → Processing → Draining → Complete
//!             │            │           │           │
//!             └────────────┴───────────┴───────────┴──→ Error
//! ```
//!
//! A request that changes neither pitch nor duration goes
//! `Configuring → Bypassed` and never touches the engine.

use crate::audio::AudioSignal;
use crate::config::EngineConfig;
use crate::engine::{Arena, ChannelBuffers, StretchEngine, StretchSession};
use crate::error::{KeyshiftError, Result};
use crate::stretch::accumulator::{OutputAccumulator, OutputChunk};
use crate::stretch::chunk::{Chunk, Chunks};
use crate::stretch::progress::{
    CancelToken, ProgressReporter, ProgressSink, process_progress, study_progress,
};
use crate::stretch::request::{PreparedRequest, StretchRequest};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Configuring,
    Studying,
    Processing,
    Draining,
    Complete,
    Bypassed,
    Error,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Configuring => "configuring",
            Self::Studying => "studying",
            Self::Processing => "processing",
            Self::Draining => "draining",
            Self::Complete => "complete",
            Self::Bypassed => "bypassed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retrieval {
    /// Stop once fewer than a full chunk is ready.
    Opportunistic,
    /// Empty the engine.
    Drain,
}

/// Owns the engine and arena of one execution context and runs requests on
/// them, one at a time.
pub struct ChunkScheduler {
    engine: Box<dyn StretchEngine>,
    arena: Arena,
    max_process_size: usize,
    state: SchedulerState,
}

impl ChunkScheduler {
    pub fn new(engine: Box<dyn StretchEngine>, arena: Arena, max_process_size: usize) -> Self {
        Self {
            engine,
            arena,
            max_process_size,
            state: SchedulerState::Idle,
        }
    }

    /// Builds a scheduler with an arena sized from the config.
    pub fn from_config(engine: Box<dyn StretchEngine>, config: &EngineConfig) -> Result<Self> {
        let arena = Arena::new(config.arena_bytes)?;
        Ok(Self::new(engine, arena, config.block_size))
    }

    /// State reached by the most recent request.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Runs one request to completion.
    ///
    /// Progress goes to `sink`: 0–50 over the study pass, 50–100 over the
    /// process pass. `cancel` is checked between chunks.
    pub fn run(
        &mut self,
        request: StretchRequest,
        sink: &mut dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<AudioSignal> {
        let mut reporter = ProgressReporter::new(sink);
        self.transition(SchedulerState::Idle);
        self.transition(SchedulerState::Configuring);

        let prepared = match request.prepare() {
            Ok(prepared) => prepared,
            Err(e) => {
                self.transition(SchedulerState::Error);
                return Err(e);
            }
        };

        if prepared.is_identity() {
            self.transition(SchedulerState::Bypassed);
            reporter.report(100.0);
            return Ok(prepared.signal);
        }

        if prepared.signal.is_empty() {
            tracing::debug!("empty input, nothing to stretch");
            self.transition(SchedulerState::Complete);
            reporter.report(100.0);
            return Ok(prepared.signal);
        }

        let started = Instant::now();
        match self.stretch(&prepared, &mut reporter, cancel) {
            Ok(signal) => {
                self.transition(SchedulerState::Complete);
                tracing::info!(
                    "stretched {} frames to {} in {:.0?} (pitch ×{:.4}, time ×{:.4})",
                    prepared.signal.frames(),
                    signal.frames(),
                    started.elapsed(),
                    prepared.pitch_ratio,
                    prepared.time_ratio
                );
                Ok(signal)
            }
            Err(e) => {
                self.transition(SchedulerState::Error);
                tracing::warn!("stretch failed: {}", e);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            tracing::debug!("scheduler {} -> {}", self.state, next);
        }
        self.state = next;
    }

    fn stretch(
        &mut self,
        request: &PreparedRequest,
        reporter: &mut ProgressReporter<'_>,
        cancel: &CancelToken,
    ) -> Result<AudioSignal> {
        let Self {
            engine,
            arena,
            max_process_size,
            state,
        } = self;
        let signal = &request.signal;
        let channels = signal.channel_count();
        let total = signal.frames();

        let mut session = StretchSession::create(
            engine.as_mut(),
            signal.sample_rate(),
            channels,
            request.time_ratio,
            request.pitch_ratio,
        )?;
        session.set_time_ratio(request.time_ratio)?;
        session.set_pitch_scale(request.pitch_ratio)?;
        session.set_expected_input_duration(total)?;
        session.set_max_process_size(*max_process_size)?;
        let chunk_size = session.samples_required()?;
        if chunk_size == 0 {
            return Err(KeyshiftError::engine("samples_required", "engine asked for empty chunks"));
        }
        tracing::debug!(
            "session {}: {} frames in chunks of {}",
            session.handle(),
            total,
            chunk_size
        );

        set_state(state, SchedulerState::Studying);
        for chunk in Chunks::new(total, chunk_size) {
            cancel.check()?;
            let inputs = stage(arena, signal, chunk)?;
            session.study(arena, inputs.table(), chunk.len, chunk.is_final)?;
            inputs.release()?;
            reporter.report(study_progress(chunk.end(), total));
        }

        set_state(state, SchedulerState::Processing);
        let mut output = OutputAccumulator::new(channels);
        for chunk in Chunks::new(total, chunk_size) {
            cancel.check()?;
            let inputs = stage(arena, signal, chunk)?;
            session.process(arena, inputs.table(), chunk.len, chunk.is_final)?;
            if !chunk.is_final {
                retrieve(&mut session, arena, &mut output, chunk_size, Retrieval::Opportunistic)?;
            }
            inputs.release()?;
            reporter.report(process_progress(chunk.end(), total));
        }

        set_state(state, SchedulerState::Draining);
        retrieve(&mut session, arena, &mut output, chunk_size, Retrieval::Drain)?;
        tracing::debug!(
            "drained {} frames in {} chunks",
            output.frames(),
            output.chunk_count()
        );

        AudioSignal::new(output.finish(), signal.sample_rate())
    }
}

fn set_state(state: &mut SchedulerState, next: SchedulerState) {
    tracing::debug!("scheduler {} -> {}", state, next);
    *state = next;
}

/// Copies one chunk of every channel into fresh arena buffers.
fn stage<'a>(arena: &'a Arena, signal: &AudioSignal, chunk: Chunk) -> Result<ChannelBuffers<'a>> {
    let buffers = ChannelBuffers::allocate(arena, signal.channel_count(), chunk.len)?;
    for (index, samples) in signal.channels().iter().enumerate() {
        buffers.write_channel(index, &samples[chunk.offset..chunk.end()])?;
    }
    Ok(buffers)
}

fn retrieve(
    session: &mut StretchSession<'_>,
    arena: &Arena,
    output: &mut OutputAccumulator,
    chunk_size: usize,
    mode: Retrieval,
) -> Result<()> {
    loop {
        let available = session.available()?;
        if available == 0 {
            return Ok(());
        }
        let wanted = match mode {
            Retrieval::Opportunistic if available < chunk_size => return Ok(()),
            Retrieval::Opportunistic => chunk_size.min(available),
            Retrieval::Drain => available,
        };

        let outputs = ChannelBuffers::allocate(arena, session.channels(), wanted)?;
        let got = session.retrieve(arena, outputs.table(), wanted)?;
        if got == 0 || got > wanted {
            return Err(KeyshiftError::engine(
                "retrieve",
                format!("returned {} frames with {} available", got, wanted),
            ));
        }
        output.push(OutputChunk::new(outputs.read_all(got)?))?;
        outputs.release()?;
    }
}

/// Shifts `signal` with a fresh scheduler and no progress reporting.
pub fn shift(
    engine: Box<dyn StretchEngine>,
    signal: AudioSignal,
    params: crate::stretch::ratio::ShiftParams,
    config: &EngineConfig,
) -> Result<AudioSignal> {
    let mut scheduler = ChunkScheduler::from_config(engine, config)?;
    scheduler.run(
        StretchRequest::new(signal, params),
        &mut |_: f32| {},
        &CancelToken::new(),
    )
}
