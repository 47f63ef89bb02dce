//! Reassembly of retrieved output.

use crate::error::{KeyshiftError, Result};

/// Per-channel samples from one retrieve call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputChunk {
    channels: Vec<Vec<f32>>,
}

impl OutputChunk {
    pub fn new(channels: Vec<Vec<f32>>) -> Self {
        Self { channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames in the chunk, taken from the first channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Collects output chunks and concatenates them per channel, in order.
#[derive(Debug)]
pub struct OutputAccumulator {
    channels: usize,
    chunks: Vec<OutputChunk>,
    frames: usize,
}

impl OutputAccumulator {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            chunks: Vec::new(),
            frames: 0,
        }
    }

    /// Total frames collected so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn push(&mut self, chunk: OutputChunk) -> Result<()> {
        if chunk.channel_count() != self.channels {
            return Err(KeyshiftError::engine(
                "retrieve",
                format!(
                    "output chunk has {} channels, session has {}",
                    chunk.channel_count(),
                    self.channels
                ),
            ));
        }
        let frames = chunk.frames();
        if chunk.channels.iter().any(|c| c.len() != frames) {
            return Err(KeyshiftError::engine(
                "retrieve",
                "output chunk channels differ in length",
            ));
        }
        if frames == 0 {
            return Ok(());
        }
        self.frames += frames;
        self.chunks.push(chunk);
        Ok(())
    }

    /// Concatenates everything into one contiguous buffer per channel.
    pub fn finish(self) -> Vec<Vec<f32>> {
        let mut out: Vec<Vec<f32>> = (0..self.channels)
            .map(|_| Vec::with_capacity(self.frames))
            .collect();
        for chunk in self.chunks {
            for (dest, src) in out.iter_mut().zip(chunk.channels) {
                dest.extend(src);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_in_retrieval_order() {
        let mut acc = OutputAccumulator::new(2);
        acc.push(OutputChunk::new(vec![vec![1.0, 2.0], vec![-1.0, -2.0]]))
            .unwrap();
        acc.push(OutputChunk::new(vec![vec![3.0], vec![-3.0]])).unwrap();
        acc.push(OutputChunk::new(vec![vec![4.0, 5.0, 6.0], vec![-4.0, -5.0, -6.0]]))
            .unwrap();

        assert_eq!(acc.frames(), 6);
        assert_eq!(acc.chunk_count(), 3);
        assert_eq!(
            acc.finish(),
            vec![
                vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
                vec![-1.0, -2.0, -3.0, -4.0, -5.0, -6.0]
            ]
        );
    }

    #[test]
    fn rejects_channel_count_mismatch() {
        let mut acc = OutputAccumulator::new(2);
        let err = acc.push(OutputChunk::new(vec![vec![1.0]])).unwrap_err();
        assert!(matches!(err, KeyshiftError::Engine { .. }));
    }

    #[test]
    fn rejects_ragged_chunk() {
        let mut acc = OutputAccumulator::new(2);
        assert!(acc.push(OutputChunk::new(vec![vec![1.0], vec![]])).is_err());
    }

    #[test]
    fn empty_chunks_are_ignored() {
        let mut acc = OutputAccumulator::new(1);
        acc.push(OutputChunk::new(vec![vec![]])).unwrap();
        assert_eq!(acc.chunk_count(), 0);
        assert_eq!(acc.finish(), vec![Vec::<f32>::new()]);
    }

    #[test]
    fn finish_without_chunks_keeps_channel_count() {
        assert_eq!(OutputAccumulator::new(3).finish().len(), 3);
    }
}
