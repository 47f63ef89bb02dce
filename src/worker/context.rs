//! The isolated execution context: one thread owning the engine and arena.

use crate::config::EngineConfig;
use crate::engine::StretchEngine;
use crate::error::{KeyshiftError, Result};
use crate::stretch::{CancelToken, ChunkScheduler, StretchRequest};
use crate::worker::protocol::{Envelope, Request, Response};
use crossbeam_channel::Receiver;
use std::thread::JoinHandle;
use tokio::sync::mpsc::UnboundedSender;

/// Builds the engine when the worker is initialized.
pub type EngineFactory = Box<dyn FnOnce() -> Result<Box<dyn StretchEngine>> + Send>;

/// Handles requests one at a time on the worker thread.
pub struct ExecutionContext {
    factory: Option<EngineFactory>,
    config: EngineConfig,
    scheduler: Option<ChunkScheduler>,
    cancel: CancelToken,
}

impl ExecutionContext {
    pub fn new(factory: EngineFactory, config: EngineConfig, cancel: CancelToken) -> Self {
        Self {
            factory: Some(factory),
            config,
            scheduler: None,
            cancel,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Handles one request, sending progress and exactly one terminal
    /// response through `emit`.
    pub fn handle(&mut self, request: Request, emit: &mut dyn FnMut(Response)) {
        let terminal = match request {
            Request::Initialize => match self.initialize() {
                Ok(()) => Response::Ready,
                Err(e) => Response::error(&e),
            },
            Request::Process { payload } => match self.process(payload, emit) {
                Ok(channels) => Response::Complete { channels },
                Err(e) => Response::error(&e),
            },
        };
        emit(terminal);
    }

    fn initialize(&mut self) -> Result<()> {
        if self.scheduler.is_some() {
            return Ok(());
        }
        let factory = self.factory.take().ok_or_else(|| KeyshiftError::Protocol {
            message: "engine factory already consumed by a failed initialize".to_string(),
        })?;
        let engine = factory()?;
        let scheduler = ChunkScheduler::from_config(engine, &self.config)?;
        tracing::info!(
            "worker ready: {} engine, {} byte arena, block size {}",
            scheduler.engine_name(),
            scheduler.arena().capacity(),
            self.config.block_size
        );
        self.scheduler = Some(scheduler);
        Ok(())
    }

    fn process(
        &mut self,
        request: StretchRequest,
        emit: &mut dyn FnMut(Response),
    ) -> Result<Vec<Vec<f32>>> {
        let scheduler = self.scheduler.as_mut().ok_or_else(|| KeyshiftError::Protocol {
            message: "worker is not initialized".to_string(),
        })?;

        let mut forward = |value: f32| emit(Response::Progress { value });
        let result = scheduler.run(request, &mut forward, &self.cancel);

        let stats = scheduler.arena().stats();
        tracing::debug!(
            "arena after request: {} allocations, {} frees, high water {} bytes",
            stats.allocations,
            stats.frees,
            stats.high_water_bytes
        );
        if stats.live != 0 {
            tracing::error!(
                "arena leaked {} allocation(s) ({} bytes)",
                stats.live,
                stats.live_bytes
            );
        }

        result.map(|signal| signal.into_channels())
    }

    /// Serves requests until the sender is dropped or the token is cancelled.
    pub fn run(
        mut self,
        requests: Receiver<Envelope<Request>>,
        responses: UnboundedSender<Envelope<Response>>,
    ) {
        for envelope in requests.iter() {
            if self.cancel.is_cancelled() {
                break;
            }
            let id = envelope.id;
            tracing::debug!("worker handling request {}", id);
            self.handle(envelope.message, &mut |response| {
                if responses.send(Envelope::new(id, response)).is_err() {
                    tracing::debug!("control side is gone, dropping response for {}", id);
                }
            });
        }
        tracing::debug!("worker loop finished");
    }
}

/// Starts the execution context on its own thread.
pub fn spawn(
    factory: EngineFactory,
    config: EngineConfig,
    cancel: CancelToken,
    requests: Receiver<Envelope<Request>>,
    responses: UnboundedSender<Envelope<Response>>,
) -> Result<JoinHandle<()>> {
    let context = ExecutionContext::new(factory, config, cancel);
    let handle = std::thread::Builder::new()
        .name("keyshift-worker".to_string())
        .spawn(move || context.run(requests, responses))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use crate::error::ErrorKind;

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            Box::new(|| -> Result<Box<dyn StretchEngine>> {
                Ok(Box::new(MockEngine::new().with_chunk_size(4)))
            }),
            EngineConfig::default(),
            CancelToken::new(),
        )
    }

    fn request(semitones: f64) -> Request {
        Request::Process {
            payload: StretchRequest {
                channels: vec![vec![0.1; 16]],
                sample_rate: 8000.0,
                channel_count: 1,
                semitones,
                tempo: 1.0,
            },
        }
    }

    fn collect(context: &mut ExecutionContext, request: Request) -> Vec<Response> {
        let mut responses = Vec::new();
        context.handle(request, &mut |r| responses.push(r));
        responses
    }

    #[test]
    fn initialize_answers_ready() {
        let mut context = context();
        assert_eq!(collect(&mut context, Request::Initialize), vec![Response::Ready]);
        assert!(context.is_initialized());
        assert_eq!(collect(&mut context, Request::Initialize), vec![Response::Ready]);
    }

    #[test]
    fn process_before_initialize_is_an_error() {
        let mut context = context();

        let responses = collect(&mut context, request(2.0));

        match responses.as_slice() {
            [Response::Error { message, kind }] => {
                assert!(message.contains("not initialized"), "got: {message}");
                assert_eq!(*kind, ErrorKind::Other);
            }
            other => panic!("expected one error, got {:?}", other),
        }
    }

    #[test]
    fn process_streams_progress_then_complete() {
        let mut context = context();
        collect(&mut context, Request::Initialize);

        let responses = collect(&mut context, request(2.0));

        let (last, progress) = responses.split_last().unwrap();
        assert_eq!(
            last,
            &Response::Complete {
                channels: vec![vec![0.1; 16]]
            }
        );
        assert_eq!(progress.len(), 8);
        assert!(progress.iter().all(|r| matches!(r, Response::Progress { .. })));
    }

    #[test]
    fn invalid_request_reports_its_kind() {
        let mut context = context();
        collect(&mut context, Request::Initialize);

        let responses = collect(&mut context, request(f64::NAN));

        assert!(matches!(
            responses.as_slice(),
            [Response::Error {
                kind: ErrorKind::InvalidParameter,
                ..
            }]
        ));
    }

    #[test]
    fn failed_factory_is_reported() {
        let mut context = ExecutionContext::new(
            Box::new(|| -> Result<Box<dyn StretchEngine>> {
                Err(KeyshiftError::Creation {
                    message: "no engine".to_string(),
                })
            }),
            EngineConfig::default(),
            CancelToken::new(),
        );

        let responses = collect(&mut context, Request::Initialize);

        assert!(matches!(
            responses.as_slice(),
            [Response::Error {
                kind: ErrorKind::Creation,
                ..
            }]
        ));
        assert!(!context.is_initialized());
    }
}
