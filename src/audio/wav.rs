//! WAV interchange format.
//!
//! Encoding always produces the canonical 44-byte-header PCM16 layout,
//! whatever the channel count. Decoding goes through `hound` and accepts
//! integer PCM of any width as well as 32-bit float files.

use crate::audio::signal::AudioSignal;
use crate::defaults::PCM16_SCALE;
use crate::error::{KeyshiftError, Result};
use std::io::{Cursor, Read};

/// Size of the canonical RIFF/WAVE header.
pub const HEADER_LEN: usize = 44;

const BYTES_PER_SAMPLE: usize = 2;

/// Quantizes one float sample to 16-bit PCM.
pub fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16
}

/// Serializes a signal into the canonical little-endian PCM16 WAV layout.
///
/// Samples are interleaved and quantized with `clamp(x, -1, 1) × 32767`.
pub fn encode_interchange(signal: &AudioSignal) -> Result<Vec<u8>> {
    let channels = signal.channel_count();
    let sample_rate = signal.sample_rate();
    let block_align = channels
        .checked_mul(BYTES_PER_SAMPLE)
        .and_then(|bytes| u16::try_from(bytes).ok())
        .ok_or_else(|| KeyshiftError::Encode {
            message: format!("{} channels do not fit a WAV header", channels),
        })?;
    let channels_u16 = block_align / BYTES_PER_SAMPLE as u16;
    let byte_rate = sample_rate
        .checked_mul(u32::from(block_align))
        .ok_or_else(|| KeyshiftError::Encode {
            message: format!(
                "byte rate of {} Hz × {} channels does not fit a WAV header",
                sample_rate, channels
            ),
        })?;
    let data_len = signal
        .frames()
        .checked_mul(usize::from(block_align))
        .filter(|&len| len <= u32::MAX as usize - (HEADER_LEN - 8))
        .ok_or_else(|| KeyshiftError::Encode {
            message: format!(
                "{} frames × {} channels of PCM exceed the 4 GiB WAV limit",
                signal.frames(),
                channels
            ),
        })?;
    let data_size = data_len as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(HEADER_LEN as u32 + data_size - 8).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels_u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());

    for frame in 0..signal.frames() {
        for channel in signal.channels() {
            out.extend_from_slice(&quantize(channel[frame]).to_le_bytes());
        }
    }

    Ok(out)
}

/// Decodes WAV data from any reader into a planar float signal.
pub fn decode_wav<R: Read>(reader: R) -> Result<AudioSignal> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| KeyshiftError::Decode {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(KeyshiftError::Decode {
            message: "WAV header declares zero channels".to_string(),
        });
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let full_scale = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            wav_reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v as f32 / full_scale).clamp(-1.0, 1.0)))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
    }
    .map_err(|e| KeyshiftError::Decode {
        message: format!("Failed to read WAV samples: {}", e),
    })?;

    // A truncated file can end mid-frame; drop the partial frame.
    let whole = interleaved.len() - interleaved.len() % channels;
    AudioSignal::from_interleaved(&interleaved[..whole], channels, spec.sample_rate).map_err(|e| {
        KeyshiftError::Decode {
            message: format!("WAV data is not a valid signal: {}", e),
        }
    })
}

/// Decodes an in-memory WAV file.
pub fn decode_interchange(bytes: &[u8]) -> Result<AudioSignal> {
    decode_wav(Cursor::new(bytes))
}
