//! Control side of the worker channel.
//!
//! Requests go to the worker thread over a crossbeam channel. Responses come
//! back over a tokio channel and are routed by a dispatcher task to the
//! pending request they belong to. A request leaves the pending table when
//! its terminal response arrives, when it times out, when its job is dropped,
//! or when the channel is terminated; anything that arrives for it afterwards
//! is discarded.

use crate::audio::AudioSignal;
use crate::config::{Config, EngineConfig};
use crate::error::{KeyshiftError, Result};
use crate::stretch::{CancelToken, StretchRequest};
use crate::worker::context::{self, EngineFactory};
use crate::worker::protocol::{Envelope, Request, RequestId, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

/// Timeouts and engine settings for one channel.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub initialize_timeout: Duration,
    pub process_timeout: Duration,
    pub engine: EngineConfig,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ChannelOptions {
    fn from(config: &Config) -> Self {
        Self {
            initialize_timeout: config.channel.initialize_timeout(),
            process_timeout: config.channel.process_timeout(),
            engine: config.engine.clone(),
        }
    }
}

/// Events of one process request, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(f32),
    Complete(AudioSignal),
}

#[derive(Debug)]
enum Routed {
    Progress(f32),
    Ready,
    Complete(Vec<Vec<f32>>),
    Failed(KeyshiftError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Initialize,
    Process,
}

struct Pending {
    kind: Kind,
    events: mpsc::UnboundedSender<Routed>,
}

#[derive(Clone, Default)]
struct PendingTable(Arc<Mutex<HashMap<RequestId, Pending>>>);

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, Pending>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget(&self, id: RequestId) -> bool {
        self.lock().remove(&id).is_some()
    }

    fn reject_all(&self, error: impl Fn() -> KeyshiftError) -> usize {
        let drained: Vec<Pending> = self.lock().drain().map(|(_, pending)| pending).collect();
        for pending in &drained {
            // The receiver may already be gone; nothing to deliver to then.
            if pending.events.send(Routed::Failed(error())).is_err() {
                tracing::debug!("pending request dropped before rejection");
            }
        }
        drained.len()
    }

    fn route(&self, envelope: Envelope<Response>) {
        let Envelope { id, message } = envelope;
        let mut table = self.lock();
        let Some(pending) = table.get(&id) else {
            tracing::debug!("discarding {} for stale request {}", kind_name(&message), id);
            return;
        };

        let terminal = message.is_terminal();
        let routed = match message {
            Response::Ready => Routed::Ready,
            Response::Progress { value } => Routed::Progress(value),
            Response::Complete { channels } => Routed::Complete(channels),
            Response::Error { message, kind } => {
                Routed::Failed(KeyshiftError::from_wire(kind, message))
            }
        };
        if pending.events.send(routed).is_err() {
            tracing::debug!("request {} no longer listening", id);
        }
        if terminal {
            table.remove(&id);
        }
    }
}

fn kind_name(response: &Response) -> &'static str {
    match response {
        Response::Ready => "ready",
        Response::Progress { .. } => "progress",
        Response::Complete { .. } => "complete",
        Response::Error { .. } => "error",
    }
}

/// Async handle to a worker thread running the stretch pipeline.
pub struct WorkerChannel {
    requests: Mutex<Option<crossbeam_channel::Sender<Envelope<Request>>>>,
    pending: PendingTable,
    next_id: AtomicU64,
    cancel: CancelToken,
    terminated: AtomicBool,
    options: ChannelOptions,
    dispatcher: JoinHandle<()>,
}

impl WorkerChannel {
    /// Starts the worker thread and the response dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(factory: EngineFactory, options: ChannelOptions) -> Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<Envelope<Response>>();
        let cancel = CancelToken::new();

        // The worker thread is detached: it exits once the request sender
        // is dropped, after finishing whatever it is doing.
        let _worker = context::spawn(
            factory,
            options.engine.clone(),
            cancel.clone(),
            request_rx,
            response_tx,
        )?;

        let pending = PendingTable::default();
        let routes = pending.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(envelope) = response_rx.recv().await {
                routes.route(envelope);
            }
            let rejected = routes.reject_all(|| KeyshiftError::Terminated);
            tracing::debug!("worker responses closed, {} pending request(s) rejected", rejected);
        });

        Ok(Self {
            requests: Mutex::new(Some(request_tx)),
            pending,
            next_id: AtomicU64::new(1),
            cancel,
            terminated: AtomicBool::new(false),
            options,
            dispatcher,
        })
    }

    /// Loads the engine in the worker. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        let (id, mut events) = self.submit(Kind::Initialize, Request::Initialize)?;
        let after = self.options.initialize_timeout;
        match timeout_at(Instant::now() + after, events.recv()).await {
            Ok(Some(Routed::Ready)) => Ok(()),
            Ok(Some(Routed::Failed(e))) => Err(e),
            Ok(Some(other)) => {
                self.pending.forget(id);
                Err(KeyshiftError::Protocol {
                    message: format!("unexpected {:?} while initializing", other),
                })
            }
            Ok(None) => Err(KeyshiftError::Terminated),
            Err(_) => {
                self.pending.forget(id);
                Err(KeyshiftError::Timeout {
                    operation: "initialize".to_string(),
                    after,
                })
            }
        }
    }

    /// Submits a process request. Fails with `RequestInFlight` while another
    /// process request on this channel is still pending.
    pub fn process(&self, request: StretchRequest) -> Result<ProcessJob> {
        let sample_rate = request.sample_rate.round().clamp(1.0, f64::from(u32::MAX)) as u32;
        let after = self.options.process_timeout;
        let (id, events) = self.submit(Kind::Process, Request::Process { payload: request })?;
        Ok(ProcessJob {
            id,
            events,
            deadline: Instant::now() + after,
            after,
            sample_rate,
            pending: self.pending.clone(),
            finished: false,
        })
    }

    /// Ends the worker and rejects every pending request with `Terminated`.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        drop(
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let rejected = self.pending.reject_all(|| KeyshiftError::Terminated);
        tracing::info!("worker channel terminated, {} pending request(s) rejected", rejected);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Requests still waiting for a terminal response.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    fn submit(
        &self,
        kind: Kind,
        request: Request,
    ) -> Result<(RequestId, mpsc::UnboundedReceiver<Routed>)> {
        if self.is_terminated() {
            return Err(KeyshiftError::Terminated);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        {
            let mut table = self.pending.lock();
            if kind == Kind::Process && table.values().any(|p| p.kind == Kind::Process) {
                return Err(KeyshiftError::RequestInFlight);
            }
            table.insert(
                id,
                Pending {
                    kind,
                    events: events_tx,
                },
            );
        }

        let sent = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|sender| sender.send(Envelope::new(id, request)).is_ok())
            .unwrap_or(false);
        if !sent {
            self.pending.forget(id);
            return Err(KeyshiftError::Terminated);
        }
        tracing::debug!("submitted request {}", id);
        Ok((id, events_rx))
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.terminate();
        self.dispatcher.abort();
    }
}

/// A submitted process request.
///
/// Dropping an unfinished job abandons it: its late responses are discarded.
pub struct ProcessJob {
    id: RequestId,
    events: mpsc::UnboundedReceiver<Routed>,
    deadline: Instant,
    after: Duration,
    sample_rate: u32,
    pending: PendingTable,
    finished: bool,
}

impl ProcessJob {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Waits for the next event.
    ///
    /// Progress values arrive in non-decreasing order, followed by exactly one
    /// `Complete`. Errors (including the timeout) end the job.
    pub async fn next_event(&mut self) -> Result<JobEvent> {
        if self.finished {
            return Err(KeyshiftError::Protocol {
                message: format!("request {} already finished", self.id),
            });
        }
        let received = timeout_at(self.deadline, self.events.recv()).await;
        let routed = match received {
            Ok(Some(routed)) => routed,
            Ok(None) => {
                self.finished = true;
                return Err(KeyshiftError::Terminated);
            }
            Err(_) => {
                self.finish();
                tracing::warn!("request {} timed out after {:?}", self.id, self.after);
                return Err(KeyshiftError::Timeout {
                    operation: "process".to_string(),
                    after: self.after,
                });
            }
        };

        match routed {
            Routed::Progress(value) => Ok(JobEvent::Progress(value)),
            Routed::Complete(channels) => {
                self.finished = true;
                Ok(JobEvent::Complete(AudioSignal::new(channels, self.sample_rate)?))
            }
            Routed::Failed(e) => {
                self.finished = true;
                Err(e)
            }
            Routed::Ready => {
                self.finish();
                Err(KeyshiftError::Protocol {
                    message: "ready received for a process request".to_string(),
                })
            }
        }
    }

    /// Drives the job to completion, passing progress to `on_progress`.
    pub async fn wait_with_progress(
        mut self,
        mut on_progress: impl FnMut(f32),
    ) -> Result<AudioSignal> {
        loop {
            match self.next_event().await? {
                JobEvent::Progress(value) => on_progress(value),
                JobEvent::Complete(signal) => return Ok(signal),
            }
        }
    }

    pub async fn wait(self) -> Result<AudioSignal> {
        self.wait_with_progress(|_| {}).await
    }

    fn finish(&mut self) {
        self.finished = true;
        self.pending.forget(self.id);
    }
}

impl Drop for ProcessJob {
    fn drop(&mut self) {
        if !self.finished && self.pending.forget(self.id) {
            tracing::debug!("request {} abandoned", self.id);
        }
    }
}
