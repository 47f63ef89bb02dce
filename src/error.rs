//! Error types for keyshift.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyshiftError {
    // Request validation
    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    // Stretch engine errors
    #[error("Stretch engine could not create a session: {message}")]
    Creation { message: String },

    #[error("Stretch engine {operation} failed: {message}")]
    Engine { operation: String, message: String },

    // Arena faults
    #[error("Arena out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("Arena access out of bounds: {message}")]
    Bounds { message: String },

    #[error("Arena double free of allocation #{index} (serial {serial})")]
    DoubleFree { index: usize, serial: u64 },

    // Channel errors
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Worker channel was terminated")]
    Terminated,

    #[error("A process request is already in flight on this channel")]
    RequestInFlight,

    #[error("Worker protocol error: {message}")]
    Protocol { message: String },

    /// An error raised inside the worker, rebuilt from its `error` response.
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },

    // Collaborator errors
    #[error("Failed to decode audio: {message}")]
    Decode { message: String },

    #[error("Failed to encode audio: {message}")]
    Encode { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl KeyshiftError {
    pub fn invalid(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn engine(operation: &str, message: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn bounds(message: impl Into<String>) -> Self {
        Self::Bounds {
            message: message.into(),
        }
    }

    /// Discriminant carried across the worker channel.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::Creation { .. } => ErrorKind::Creation,
            Self::Engine { .. } => ErrorKind::Engine,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::Bounds { .. } => ErrorKind::Bounds,
            Self::DoubleFree { .. } => ErrorKind::DoubleFree,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Terminated => ErrorKind::Terminated,
            Self::RequestInFlight => ErrorKind::RequestInFlight,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Encode { .. } => ErrorKind::Encode,
            Self::Remote { kind, .. } => *kind,
            Self::Protocol { .. } | Self::Io(_) | Self::Config(_) => ErrorKind::Other,
        }
    }

    /// Rebuilds an error from an `error` message received over the channel.
    pub fn from_wire(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Terminated => Self::Terminated,
            ErrorKind::RequestInFlight => Self::RequestInFlight,
            kind => Self::Remote { kind, message },
        }
    }
}

/// Serializable error category for `error` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameter,
    Creation,
    Engine,
    OutOfMemory,
    Bounds,
    DoubleFree,
    Timeout,
    Terminated,
    RequestInFlight,
    Decode,
    Encode,
    #[default]
    Other,
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, KeyshiftError>;
