//! Message protocol between the control side and the worker.
//!
//! Messages are internally tagged by `type` and wrapped in an [`Envelope`]
//! carrying the correlation id, so on the wire a request looks like
//! `{"id":3,"type":"process","payload":{...}}`.

use crate::error::{ErrorKind, KeyshiftError};
use crate::stretch::StretchRequest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Correlation id, unique per channel.
pub type RequestId = u64;

/// A message plus the id of the request it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: RequestId,
    #[serde(flatten)]
    pub message: T,
}

impl<T> Envelope<T> {
    pub fn new(id: RequestId, message: T) -> Self {
        Self { id, message }
    }
}

/// JSON form of the protocol, for hosts that run the worker out of process.
///
/// [`WorkerChannel`](crate::worker::WorkerChannel) moves envelopes in memory
/// and never serializes them; these helpers define the wire shape a bridge
/// (pipe, socket, web worker) has to speak.
impl<T: Serialize + DeserializeOwned> Envelope<T> {
    /// Serialize envelope to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize envelope from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Requests sent from the control side to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Load the engine and allocate the arena
    Initialize,
    /// Shift one signal
    Process { payload: StretchRequest },
}

/// Responses sent by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Initialization finished
    Ready,
    /// Progress of a process request, 0–100
    Progress { value: f32 },
    /// Processed channels
    Complete { channels: Vec<Vec<f32>> },
    /// Request failed
    Error {
        message: String,
        #[serde(default)]
        kind: ErrorKind,
    },
}

impl Response {
    pub fn error(error: &KeyshiftError) -> Self {
        Self::Error {
            message: error.to_string(),
            kind: error.kind(),
        }
    }

    /// Whether this response ends its request.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}
