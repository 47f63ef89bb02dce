//! Decoder and encoder collaborators around the stretch pipeline.
//!
//! The pipeline only sees [`AudioSignal`]s. Getting bytes in and out is the
//! job of the traits here, so callers can plug in their own container support.

use crate::audio::format::AudioFormat;
use crate::audio::signal::AudioSignal;
use crate::audio::wav;
use crate::error::{KeyshiftError, Result};

/// Turns container bytes into a signal.
pub trait Decoder: Send + Sync {
    /// Decode `bytes`, using `hint` when the caller already knows the format.
    fn decode(&self, bytes: &[u8], hint: AudioFormat) -> Result<AudioSignal>;

    /// Whether this decoder handles the format natively.
    fn supports(&self, format: AudioFormat) -> bool;
}

/// Turns a signal into container bytes.
pub trait Encoder: Send + Sync {
    fn encode(&self, signal: &AudioSignal, target: AudioFormat, bitrate: u32) -> Result<Vec<u8>>;
}

/// External transcoder for compressed containers (ffmpeg and friends).
pub trait Transcoder: Send + Sync {
    fn transcode_to_raw_pcm(&self, bytes: &[u8], format: AudioFormat) -> Result<AudioSignal>;
}

/// WAV decoder and encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavCodec;

impl Decoder for WavCodec {
    fn decode(&self, bytes: &[u8], hint: AudioFormat) -> Result<AudioSignal> {
        if hint != AudioFormat::Wav && hint != AudioFormat::Unknown {
            return Err(KeyshiftError::Decode {
                message: format!("WAV decoder cannot read {} data", hint),
            });
        }
        wav::decode_interchange(bytes)
    }

    fn supports(&self, format: AudioFormat) -> bool {
        format == AudioFormat::Wav
    }
}

impl Encoder for WavCodec {
    fn encode(&self, signal: &AudioSignal, target: AudioFormat, _bitrate: u32) -> Result<Vec<u8>> {
        match target {
            AudioFormat::Wav => wav::encode_interchange(signal),
            other => Err(KeyshiftError::Encode {
                message: format!("no encoder available for {}", other),
            }),
        }
    }
}

/// Sniffs the input and dispatches to the native decoder or the transcoder.
pub struct DecoderChain {
    native: Box<dyn Decoder>,
    transcoder: Option<Box<dyn Transcoder>>,
}

impl Default for DecoderChain {
    fn default() -> Self {
        Self::new(Box::new(WavCodec))
    }
}

impl DecoderChain {
    pub fn new(native: Box<dyn Decoder>) -> Self {
        Self {
            native,
            transcoder: None,
        }
    }

    pub fn with_transcoder(mut self, transcoder: Box<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    /// Decode bytes whose format is detected from content, then `hint`.
    pub fn decode(&self, bytes: &[u8], hint: AudioFormat) -> Result<AudioSignal> {
        let format = match AudioFormat::sniff(bytes) {
            AudioFormat::Unknown => hint,
            sniffed => sniffed,
        };
        if self.native.supports(format) {
            return self.native.decode(bytes, format);
        }
        match (&self.transcoder, format) {
            (_, AudioFormat::Unknown) => Err(KeyshiftError::Decode {
                message: "unrecognized audio container".to_string(),
            }),
            (Some(transcoder), format) => {
                tracing::debug!("handing {} input to transcoder", format);
                transcoder.transcode_to_raw_pcm(bytes, format)
            }
            (None, format) => Err(KeyshiftError::Decode {
                message: format!("{} input needs a transcoder, none is configured", format),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilenceTranscoder;

    impl Transcoder for SilenceTranscoder {
        fn transcode_to_raw_pcm(&self, _bytes: &[u8], _format: AudioFormat) -> Result<AudioSignal> {
            AudioSignal::silence(1, 8, 8000)
        }
    }

    fn sample_signal() -> AudioSignal {
        AudioSignal::new(vec![vec![0.0, 0.5, -0.5, 0.25]], 8000).unwrap()
    }

    #[test]
    fn wav_codec_roundtrips() {
        let bytes = WavCodec
            .encode(&sample_signal(), AudioFormat::Wav, 0)
            .unwrap();
        let decoded = WavCodec.decode(&bytes, AudioFormat::Wav).unwrap();

        assert_eq!(decoded.frames(), 4);
        for (a, b) in decoded.channel(0).unwrap().iter().zip([0.0, 0.5, -0.5, 0.25]) {
            assert!((a - b).abs() <= 1.0 / 32767.0);
        }
    }

    #[test]
    fn wav_codec_refuses_compressed_targets() {
        let err = WavCodec
            .encode(&sample_signal(), AudioFormat::Mp3, 192)
            .unwrap_err();
        assert!(matches!(err, KeyshiftError::Encode { .. }));
    }

    #[test]
    fn chain_without_transcoder_reports_missing_transcoder() {
        let chain = DecoderChain::default();

        let err = chain.decode(b"fLaC\0\0\0\x22", AudioFormat::Unknown).unwrap_err();

        assert!(err.to_string().contains("needs a transcoder"), "got: {err}");
    }

    #[test]
    fn chain_routes_compressed_input_to_transcoder() {
        let chain = DecoderChain::default().with_transcoder(Box::new(SilenceTranscoder));

        let signal = chain.decode(b"OggS\0\x02", AudioFormat::Unknown).unwrap();

        assert_eq!(signal.frames(), 8);
    }

    #[test]
    fn chain_uses_hint_when_sniffing_fails() {
        let chain = DecoderChain::default().with_transcoder(Box::new(SilenceTranscoder));

        assert!(chain.decode(b"????", AudioFormat::Mp3).is_ok());
        assert!(chain.decode(b"????", AudioFormat::Unknown).is_err());
    }

    #[test]
    fn chain_decodes_wav_natively() {
        let bytes = wav::encode_interchange(&sample_signal()).unwrap();
        let signal = DecoderChain::default()
            .decode(&bytes, AudioFormat::Unknown)
            .unwrap();
        assert_eq!(signal.sample_rate(), 8000);
    }
}
