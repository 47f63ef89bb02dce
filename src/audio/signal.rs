//! Planar multichannel audio signal.

use crate::error::{KeyshiftError, Result};

/// Per-channel `f32` samples with a sample rate.
///
/// All channels have the same length. The signal is immutable; processing
/// stages build new instances.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSignal {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioSignal {
    /// Creates a signal, checking that there is at least one channel, that the
    /// sample rate is positive and that all channels have equal length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(KeyshiftError::invalid(
                "channels",
                "signal must have at least one channel",
            ));
        }
        if sample_rate == 0 {
            return Err(KeyshiftError::invalid(
                "sample_rate",
                "must be greater than zero",
            ));
        }
        let frames = channels[0].len();
        if let Some((index, channel)) = channels
            .iter()
            .enumerate()
            .find(|(_, channel)| channel.len() != frames)
        {
            return Err(KeyshiftError::invalid(
                "channels",
                format!(
                    "channel {} has {} samples, expected {}",
                    index,
                    channel.len(),
                    frames
                ),
            ));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Splits interleaved samples into planar channels.
    pub fn from_interleaved(
        samples: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if channel_count == 0 {
            return Err(KeyshiftError::invalid(
                "channel_count",
                "must be at least one",
            ));
        }
        if samples.len() % channel_count != 0 {
            return Err(KeyshiftError::invalid(
                "samples",
                format!(
                    "{} interleaved samples do not divide into {} channels",
                    samples.len(),
                    channel_count
                ),
            ));
        }
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    /// A silent signal of the given shape.
    pub fn silence(channel_count: usize, frames: usize, sample_rate: u32) -> Result<Self> {
        Self::new(vec![vec![0.0; frames]; channel_count], sample_rate)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Interleaves the channels frame by frame.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.frames() * self.channel_count());
        for frame in 0..self.frames() {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }

    /// Largest absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flatten()
            .fold(0.0f32, |peak, &s| peak.max(s.abs()))
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}
