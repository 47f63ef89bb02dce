//! Audio data model and container collaborators.

pub mod codec;
pub mod format;
pub mod signal;
pub mod wav;

pub use codec::{Decoder, DecoderChain, Encoder, Transcoder, WavCodec};
pub use format::AudioFormat;
pub use signal::AudioSignal;
