//! Scriptable engine for tests.

use crate::engine::arena::{Arena, ArenaAllocation};
use crate::engine::binding::{RawHandle, StretchEngine, read_planar, write_planar};
use crate::engine::passes::PassTracker;
use crate::error::{KeyshiftError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const DEFAULT_CHUNK_SIZE: usize = 256;

/// Calls observed by a [`MockEngine`].
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    pub created: usize,
    pub destroyed: usize,
    pub time_ratio: Option<f64>,
    pub pitch_scale: Option<f64>,
    pub expected_input: Option<usize>,
    pub max_process_size: Option<usize>,
    /// `(frames, is_final)` per study call.
    pub study_calls: Vec<(usize, bool)>,
    /// `(frames, is_final)` per process call.
    pub process_calls: Vec<(usize, bool)>,
    /// `(max_frames, returned)` per retrieve call.
    pub retrieve_calls: Vec<(usize, usize)>,
}

/// Shared view of the log, readable after the engine moved to a worker.
#[derive(Debug, Clone, Default)]
pub struct MockEngineLog(Arc<Mutex<MockLog>>);

impl MockEngineLog {
    pub fn snapshot(&self) -> MockLog {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, f: impl FnOnce(&mut MockLog)) {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Create,
    Study(usize),
    Process(usize),
    Retrieve(usize),
    StalledRetrieve,
}

struct MockSession {
    passes: PassTracker,
    pending: Vec<VecDeque<f32>>,
}

/// Identity engine: output equals input, optionally delayed.
///
/// `with_latency` prepends silence, `with_hold_back` keeps frames back
/// until the final process call, and the `with_failure_*` builders make
/// the k-th call (zero-based, across all sessions) fail.
pub struct MockEngine {
    chunk_size: usize,
    hold_back: usize,
    latency: usize,
    call_delay: Duration,
    failure: Option<Failure>,
    log: MockEngineLog,
    sessions: HashMap<RawHandle, MockSession>,
    next_handle: RawHandle,
    study_count: usize,
    process_count: usize,
    retrieve_count: usize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            hold_back: 0,
            latency: 0,
            call_delay: Duration::ZERO,
            failure: None,
            log: MockEngineLog::default(),
            sessions: HashMap::new(),
            next_handle: 1,
            study_count: 0,
            process_count: 0,
            retrieve_count: 0,
        }
    }

    /// Value reported by `samples_required`.
    pub fn with_chunk_size(mut self, frames: usize) -> Self {
        self.chunk_size = frames;
        self
    }

    pub fn with_hold_back(mut self, frames: usize) -> Self {
        self.hold_back = frames;
        self
    }

    pub fn with_latency(mut self, frames: usize) -> Self {
        self.latency = frames;
        self
    }

    /// Sleeps this long inside every study and process call.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn with_create_failure(mut self) -> Self {
        self.failure = Some(Failure::Create);
        self
    }

    pub fn with_failure_on_study(mut self, call: usize) -> Self {
        self.failure = Some(Failure::Study(call));
        self
    }

    pub fn with_failure_on_process(mut self, call: usize) -> Self {
        self.failure = Some(Failure::Process(call));
        self
    }

    pub fn with_failure_on_retrieve(mut self, call: usize) -> Self {
        self.failure = Some(Failure::Retrieve(call));
        self
    }

    /// Every retrieve returns zero frames even when output is available.
    pub fn with_stalled_retrieve(mut self) -> Self {
        self.failure = Some(Failure::StalledRetrieve);
        self
    }

    pub fn log(&self) -> MockEngineLog {
        self.log.clone()
    }

    fn session(&mut self, handle: RawHandle, operation: &str) -> Result<&mut MockSession> {
        self.sessions
            .get_mut(&handle)
            .ok_or_else(|| KeyshiftError::engine(operation, format!("unknown handle {}", handle)))
    }

    fn ready(&self, session: &MockSession) -> usize {
        let queued = session.pending.first().map_or(0, VecDeque::len);
        if !session.passes.is_processing() {
            0
        } else if session.passes.is_finished() {
            queued
        } else {
            queued.saturating_sub(self.hold_back)
        }
    }

    fn delay(&self) {
        if !self.call_delay.is_zero() {
            std::thread::sleep(self.call_delay);
        }
    }
}

impl StretchEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn create(
        &mut self,
        _sample_rate: u32,
        channels: usize,
        time_ratio: f64,
        pitch_ratio: f64,
    ) -> RawHandle {
        if self.failure == Some(Failure::Create) || channels == 0 {
            return 0;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.sessions.insert(
            handle,
            MockSession {
                passes: PassTracker::new(self.chunk_size),
                pending: vec![std::iter::repeat_n(0.0, self.latency).collect(); channels],
            },
        );
        self.log.record(|log| {
            log.created += 1;
            log.time_ratio = Some(time_ratio);
            log.pitch_scale = Some(pitch_ratio);
        });
        handle
    }

    fn set_time_ratio(&mut self, handle: RawHandle, ratio: f64) -> Result<()> {
        self.session(handle, "set_time_ratio")?
            .passes
            .configure("set_time_ratio")?;
        self.log.record(|log| log.time_ratio = Some(ratio));
        Ok(())
    }

    fn set_pitch_scale(&mut self, handle: RawHandle, ratio: f64) -> Result<()> {
        self.session(handle, "set_pitch_scale")?
            .passes
            .configure("set_pitch_scale")?;
        self.log.record(|log| log.pitch_scale = Some(ratio));
        Ok(())
    }

    fn set_expected_input_duration(&mut self, handle: RawHandle, frames: usize) -> Result<()> {
        self.session(handle, "set_expected_input_duration")?
            .passes
            .configure("set_expected_input_duration")?;
        self.log.record(|log| log.expected_input = Some(frames));
        Ok(())
    }

    fn set_max_process_size(&mut self, handle: RawHandle, frames: usize) -> Result<()> {
        self.session(handle, "set_max_process_size")?
            .passes
            .set_max_chunk(frames)?;
        self.log.record(|log| log.max_process_size = Some(frames));
        Ok(())
    }

    fn samples_required(&mut self, handle: RawHandle) -> Result<usize> {
        let max_chunk = self.session(handle, "samples_required")?.passes.max_chunk();
        Ok(self.chunk_size.min(max_chunk))
    }

    fn study(
        &mut self,
        handle: RawHandle,
        _arena: &Arena,
        _inputs: ArenaAllocation,
        frames: usize,
        is_final: bool,
    ) -> Result<()> {
        self.delay();
        let call = self.study_count;
        self.study_count += 1;
        self.log.record(|log| log.study_calls.push((frames, is_final)));
        if self.failure == Some(Failure::Study(call)) {
            return Err(KeyshiftError::engine("study", "injected failure"));
        }
        self.session(handle, "study")?.passes.study(frames, is_final)
    }

    fn process(
        &mut self,
        handle: RawHandle,
        arena: &Arena,
        inputs: ArenaAllocation,
        frames: usize,
        is_final: bool,
    ) -> Result<()> {
        self.delay();
        let call = self.process_count;
        self.process_count += 1;
        self.log.record(|log| log.process_calls.push((frames, is_final)));
        if self.failure == Some(Failure::Process(call)) {
            return Err(KeyshiftError::engine("process", "injected failure"));
        }

        let session = self.session(handle, "process")?;
        session.passes.process(frames, is_final)?;
        let input = read_planar(arena, inputs, session.pending.len(), frames)?;
        for (queue, samples) in session.pending.iter_mut().zip(input) {
            queue.extend(samples);
        }
        Ok(())
    }

    fn available(&mut self, handle: RawHandle) -> Result<i64> {
        let session = self
            .sessions
            .get(&handle)
            .ok_or_else(|| {
                KeyshiftError::engine("available", format!("unknown handle {}", handle))
            })?;
        Ok(self.ready(session) as i64)
    }

    fn retrieve(
        &mut self,
        handle: RawHandle,
        arena: &Arena,
        outputs: ArenaAllocation,
        max_frames: usize,
    ) -> Result<usize> {
        let call = self.retrieve_count;
        self.retrieve_count += 1;
        match self.failure {
            Some(Failure::Retrieve(k)) if k == call => {
                self.log.record(|log| log.retrieve_calls.push((max_frames, 0)));
                return Err(KeyshiftError::engine("retrieve", "injected failure"));
            }
            Some(Failure::StalledRetrieve) => {
                self.log.record(|log| log.retrieve_calls.push((max_frames, 0)));
                return Ok(0);
            }
            _ => {}
        }

        let ready = {
            let session = self
                .sessions
                .get(&handle)
                .ok_or_else(|| {
                    KeyshiftError::engine("retrieve", format!("unknown handle {}", handle))
                })?;
            self.ready(session)
        };
        let count = ready.min(max_frames);
        let session = self.session(handle, "retrieve")?;
        let drained: Vec<Vec<f32>> = session
            .pending
            .iter_mut()
            .map(|queue| queue.drain(..count).collect())
            .collect();
        let slices: Vec<&[f32]> = drained.iter().map(Vec::as_slice).collect();
        write_planar(arena, outputs, &slices)?;

        self.log.record(|log| log.retrieve_calls.push((max_frames, count)));
        Ok(count)
    }

    fn destroy(&mut self, handle: RawHandle) {
        if self.sessions.remove(&handle).is_some() {
            self.log.record(|log| log.destroyed += 1);
        }
    }
}
