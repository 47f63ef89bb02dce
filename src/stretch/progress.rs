//! Progress across the two passes, and cooperative cancellation.

use crate::error::{KeyshiftError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives progress values in `[0, 100]`.
pub trait ProgressSink {
    fn progress(&mut self, value: f32);
}

impl<F: FnMut(f32)> ProgressSink for F {
    fn progress(&mut self, value: f32) {
        self(value)
    }
}

/// Progress after `done` of `total` frames of the study pass.
pub fn study_progress(done: usize, total: usize) -> f32 {
    fraction(done, total) * 50.0
}

/// Progress after `done` of `total` frames of the process pass.
pub fn process_progress(done: usize, total: usize) -> f32 {
    50.0 + fraction(done, total) * 50.0
}

fn fraction(done: usize, total: usize) -> f32 {
    if total == 0 {
        return 1.0;
    }
    (done as f64 / total as f64).clamp(0.0, 1.0) as f32
}

/// Forwards progress to a sink, dropping anything that would go backwards
/// or repeat the previous value.
pub struct ProgressReporter<'a> {
    sink: &'a mut dyn ProgressSink,
    last: Option<f32>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self { sink, last: None }
    }

    pub fn report(&mut self, value: f32) {
        let value = value.clamp(0.0, 100.0);
        if self.last.is_some_and(|last| value <= last) {
            return;
        }
        self.last = Some(value);
        self.sink.progress(value);
    }

    pub fn last(&self) -> Option<f32> {
        self.last
    }
}

/// Shared flag checked between scheduler iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with `Terminated` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(KeyshiftError::Terminated)
        } else {
            Ok(())
        }
    }
}
