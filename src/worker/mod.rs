//! The worker channel: an isolated execution context for the stretch
//! pipeline and the async control side that talks to it.

pub mod channel;
pub mod context;
pub mod protocol;

pub use channel::{ChannelOptions, JobEvent, ProcessJob, WorkerChannel};
pub use context::{EngineFactory, ExecutionContext};
pub use protocol::{Envelope, Request, RequestId, Response};
