//! Study/process call ordering shared by the bundled engines.

use crate::error::{KeyshiftError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configuring,
    Studying,
    Studied,
    Processing,
    Finished,
}

/// Enforces the two-pass protocol for one session.
///
/// Configuration is only accepted before the first study call, the study
/// pass must end with a final chunk before processing starts, and the
/// process pass must feed exactly as many frames as were studied.
#[derive(Debug, Clone)]
pub(crate) struct PassTracker {
    phase: Phase,
    studied: usize,
    processed: usize,
    max_chunk: usize,
}

impl PassTracker {
    pub(crate) fn new(max_chunk: usize) -> Self {
        Self {
            phase: Phase::Configuring,
            studied: 0,
            processed: 0,
            max_chunk,
        }
    }

    pub(crate) fn configure(&self, setting: &str) -> Result<()> {
        if self.phase != Phase::Configuring {
            return Err(KeyshiftError::engine(
                setting,
                "configuration is only accepted before the study pass",
            ));
        }
        Ok(())
    }

    pub(crate) fn set_max_chunk(&mut self, frames: usize) -> Result<()> {
        self.configure("set_max_process_size")?;
        if frames == 0 {
            return Err(KeyshiftError::engine(
                "set_max_process_size",
                "max process size must be positive",
            ));
        }
        self.max_chunk = frames;
        Ok(())
    }

    pub(crate) fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    pub(crate) fn study(&mut self, frames: usize, is_final: bool) -> Result<()> {
        match self.phase {
            Phase::Configuring | Phase::Studying => {}
            _ => return Err(KeyshiftError::engine("study", "study pass already ended")),
        }
        self.check_chunk("study", frames, is_final)?;
        self.studied += frames;
        self.phase = if is_final {
            Phase::Studied
        } else {
            Phase::Studying
        };
        Ok(())
    }

    pub(crate) fn process(&mut self, frames: usize, is_final: bool) -> Result<()> {
        match self.phase {
            Phase::Studied | Phase::Processing => {}
            Phase::Finished => {
                return Err(KeyshiftError::engine("process", "process pass already ended"));
            }
            Phase::Configuring | Phase::Studying => {
                return Err(KeyshiftError::engine(
                    "process",
                    "study pass has not seen its final chunk",
                ));
            }
        }
        self.check_chunk("process", frames, is_final)?;
        self.processed += frames;
        if self.processed > self.studied {
            return Err(KeyshiftError::engine(
                "process",
                format!(
                    "process pass fed {} frames but only {} were studied",
                    self.processed, self.studied
                ),
            ));
        }
        if is_final {
            if self.processed != self.studied {
                return Err(KeyshiftError::engine(
                    "process",
                    format!(
                        "process pass ended after {} frames, {} were studied",
                        self.processed, self.studied
                    ),
                ));
            }
            self.phase = Phase::Finished;
        } else {
            self.phase = Phase::Processing;
        }
        Ok(())
    }

    pub(crate) fn studied(&self) -> usize {
        self.studied
    }

    pub(crate) fn processed(&self) -> usize {
        self.processed
    }

    pub(crate) fn is_processing(&self) -> bool {
        matches!(self.phase, Phase::Processing | Phase::Finished)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    fn check_chunk(&self, operation: &str, frames: usize, is_final: bool) -> Result<()> {
        if frames > self.max_chunk {
            return Err(KeyshiftError::engine(
                operation,
                format!("{} frames exceed the max process size {}", frames, self.max_chunk),
            ));
        }
        if frames == 0 && !is_final {
            return Err(KeyshiftError::engine(operation, "empty non-final chunk"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_protocol_is_accepted() {
        let mut tracker = PassTracker::new(4);
        tracker.configure("set_time_ratio").unwrap();
        tracker.study(4, false).unwrap();
        tracker.study(2, true).unwrap();
        tracker.process(4, false).unwrap();
        assert!(tracker.is_processing());
        tracker.process(2, true).unwrap();
        assert!(tracker.is_finished());
        assert_eq!(tracker.studied(), 6);
        assert_eq!(tracker.processed(), 6);
    }

    #[test]
    fn configuration_after_study_is_rejected() {
        let mut tracker = PassTracker::new(4);
        tracker.study(1, false).unwrap();
        assert!(tracker.configure("set_pitch_scale").is_err());
        assert!(tracker.set_max_chunk(8).is_err());
    }

    #[test]
    fn process_before_final_study_is_rejected() {
        let mut tracker = PassTracker::new(4);
        tracker.study(4, false).unwrap();
        assert!(tracker.process(4, false).is_err());
    }

    #[test]
    fn study_after_final_is_rejected() {
        let mut tracker = PassTracker::new(4);
        tracker.study(4, true).unwrap();
        assert!(tracker.study(4, true).is_err());
    }

    #[test]
    fn mismatched_frame_totals_are_rejected() {
        let mut tracker = PassTracker::new(8);
        tracker.study(6, true).unwrap();
        assert!(tracker.process(5, true).is_err());

        let mut tracker = PassTracker::new(8);
        tracker.study(6, true).unwrap();
        assert!(tracker.process(7, false).is_err());
    }

    #[test]
    fn oversized_chunks_are_rejected() {
        let mut tracker = PassTracker::new(4);
        assert!(tracker.study(5, true).is_err());
        assert!(tracker.study(0, false).is_err());
    }
}
