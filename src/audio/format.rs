//! Container format detection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Audio container formats the front end can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Flac,
    Mp3,
    Ogg,
    M4a,
    Webm,
    Unknown,
}

impl AudioFormat {
    /// Detects the format from the leading bytes of a file.
    ///
    /// Returns `Unknown` when no magic number matches.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return Self::Wav;
        }
        if bytes.starts_with(b"fLaC") {
            return Self::Flac;
        }
        if bytes.starts_with(b"OggS") {
            return Self::Ogg;
        }
        if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
            return Self::M4a;
        }
        if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            return Self::Webm;
        }
        if bytes.starts_with(b"ID3") {
            return Self::Mp3;
        }
        // MPEG audio frame sync: 11 set bits, layer bits non-zero
        if bytes.len() >= 2
            && bytes[0] == 0xFF
            && (bytes[1] & 0xE0) == 0xE0
            && (bytes[1] & 0x06) != 0
        {
            return Self::Mp3;
        }
        Self::Unknown
    }

    /// Maps a file extension (case-insensitive) to a format.
    pub fn from_extension(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
            .unwrap_or(Self::Unknown)
    }

    /// Sniffs the bytes, falling back to the path's extension.
    pub fn detect(bytes: &[u8], path: Option<&Path>) -> Self {
        match Self::sniff(bytes) {
            Self::Unknown => path.map(Self::from_extension).unwrap_or(Self::Unknown),
            format => format,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::M4a => "m4a",
            Self::Webm => "webm",
            Self::Unknown => "bin",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            other => write!(f, "{}", other.extension()),
        }
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" | "wave" => Ok(Self::Wav),
            "flac" => Ok(Self::Flac),
            "mp3" => Ok(Self::Mp3),
            "ogg" | "oga" | "opus" => Ok(Self::Ogg),
            "m4a" | "mp4" | "aac" => Ok(Self::M4a),
            "webm" | "mkv" => Ok(Self::Webm),
            other => Err(format!("unknown audio format: {other}")),
        }
    }
}
