//! Shift requests as they arrive from the control side.

use crate::audio::AudioSignal;
use crate::error::{KeyshiftError, Result};
use crate::stretch::ratio::ShiftParams;
use serde::{Deserialize, Serialize};

/// Raw per-channel samples plus the requested shift.
///
/// Fields are unchecked; [`prepare`](Self::prepare) validates them before any
/// engine resource exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StretchRequest {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: f64,
    pub channel_count: usize,
    pub semitones: f64,
    pub tempo: f64,
}

impl StretchRequest {
    pub fn new(signal: AudioSignal, params: ShiftParams) -> Self {
        let sample_rate = f64::from(signal.sample_rate());
        let channel_count = signal.channel_count();
        Self {
            channels: signal.into_channels(),
            sample_rate,
            channel_count,
            semitones: params.semitones,
            tempo: params.tempo,
        }
    }

    pub fn params(&self) -> ShiftParams {
        ShiftParams::new(self.semitones, self.tempo)
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Validates every field and builds the signal the scheduler runs on.
    pub fn prepare(self) -> Result<PreparedRequest> {
        if !self.sample_rate.is_finite()
            || self.sample_rate < 1.0
            || self.sample_rate > f64::from(u32::MAX)
        {
            return Err(KeyshiftError::invalid(
                "sample_rate",
                format!("must be a positive number of Hz, got {}", self.sample_rate),
            ));
        }
        if self.channel_count == 0 {
            return Err(KeyshiftError::invalid("channel_count", "must be at least one"));
        }
        if self.channel_count != self.channels.len() {
            return Err(KeyshiftError::invalid(
                "channel_count",
                format!(
                    "declares {} channels but {} were sent",
                    self.channel_count,
                    self.channels.len()
                ),
            ));
        }
        let params = self.params();
        let (pitch_ratio, time_ratio) = params.ratios()?;
        let signal = AudioSignal::new(self.channels, self.sample_rate.round() as u32)?;

        Ok(PreparedRequest {
            signal,
            params,
            pitch_ratio,
            time_ratio,
        })
    }
}

/// A validated request.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub signal: AudioSignal,
    pub params: ShiftParams,
    pub pitch_ratio: f64,
    pub time_ratio: f64,
}

impl PreparedRequest {
    /// No pitch or duration change, so the engine can be skipped.
    pub fn is_identity(&self) -> bool {
        self.pitch_ratio == 1.0 && self.time_ratio == 1.0
    }
}
