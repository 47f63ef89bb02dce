//! Worker channel behaviour: request lifecycle, timeouts, stale responses,
//! termination and the one-request-in-flight policy.

use keyshift::audio::AudioSignal;
use keyshift::config::EngineConfig;
use keyshift::engine::{GranularEngine, MockEngine, StretchEngine};
use keyshift::error::{ErrorKind, KeyshiftError, Result};
use keyshift::stretch::{ShiftParams, StretchRequest};
use keyshift::worker::{ChannelOptions, EngineFactory, JobEvent, WorkerChannel};
use std::time::Duration;

fn options(initialize_timeout: Duration, process_timeout: Duration) -> ChannelOptions {
    ChannelOptions {
        initialize_timeout,
        process_timeout,
        engine: EngineConfig {
            block_size: 1024,
            arena_bytes: 4 * 1024 * 1024,
        },
    }
}

fn mock(engine: MockEngine) -> EngineFactory {
    Box::new(move || -> Result<Box<dyn StretchEngine>> { Ok(Box::new(engine)) })
}

fn ramp(frames: usize, channels: usize) -> AudioSignal {
    let samples: Vec<f32> = (0..frames).map(|i| (i % 50) as f32 / 50.0 - 0.5).collect();
    AudioSignal::new(vec![samples; channels], 16000).unwrap()
}

fn request(frames: usize, semitones: f64) -> StretchRequest {
    StretchRequest::new(ramp(frames, 1), ShiftParams::new(semitones, 1.0))
}

#[tokio::test]
async fn events_arrive_in_order_with_one_terminal() {
    let channel = WorkerChannel::spawn(
        Box::new(|| -> Result<Box<dyn StretchEngine>> { Ok(Box::new(GranularEngine::new())) }),
        options(Duration::from_secs(5), Duration::from_secs(30)),
    )
    .unwrap();
    channel.initialize().await.unwrap();

    let input = ramp(16000, 2);
    let mut job = channel
        .process(StretchRequest::new(input, ShiftParams::new(-4.0, 0.5)))
        .unwrap();

    let mut progress = Vec::new();
    let output = loop {
        match job.next_event().await.unwrap() {
            JobEvent::Progress(value) => progress.push(value),
            JobEvent::Complete(signal) => break signal,
        }
    };

    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100.0));
    assert_eq!(output.channel_count(), 2);
    assert_eq!(output.frames(), 32000);
    assert_eq!(output.sample_rate(), 16000);
    // The job is finished: asking again is a protocol error, not a hang.
    assert!(matches!(job.next_event().await, Err(KeyshiftError::Protocol { .. })));
}

#[tokio::test]
async fn identity_request_completes_with_single_progress() {
    let engine = MockEngine::new();
    let log = engine.log();
    let channel = WorkerChannel::spawn(mock(engine), ChannelOptions::default()).unwrap();
    channel.initialize().await.unwrap();

    let mut progress = Vec::new();
    let output = channel
        .process(request(300, 0.0))
        .unwrap()
        .wait_with_progress(|value| progress.push(value))
        .await
        .unwrap();

    assert_eq!(output, ramp(300, 1));
    assert_eq!(progress, vec![100.0]);
    assert_eq!(log.snapshot().created, 0);
}

#[tokio::test]
async fn process_before_initialize_is_rejected() {
    let channel = WorkerChannel::spawn(mock(MockEngine::new()), ChannelOptions::default()).unwrap();

    let err = channel.process(request(16, 2.0)).unwrap().wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(err.to_string().contains("worker is not initialized"), "got: {err}");
}

#[tokio::test]
async fn failed_engine_creation_is_reported_with_its_kind() {
    let channel = WorkerChannel::spawn(
        mock(MockEngine::new().with_create_failure()),
        ChannelOptions::default(),
    )
    .unwrap();
    channel.initialize().await.unwrap();

    let err = channel.process(request(16, 2.0)).unwrap().wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Creation);
}

#[tokio::test]
async fn slow_initialize_times_out_and_can_be_retried() {
    let channel = WorkerChannel::spawn(
        Box::new(|| -> Result<Box<dyn StretchEngine>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Box::new(MockEngine::new()))
        }),
        options(Duration::from_millis(30), Duration::from_secs(5)),
    )
    .unwrap();

    let err = channel.initialize().await.unwrap_err();
    assert!(
        matches!(&err, KeyshiftError::Timeout { operation, .. } if operation == "initialize"),
        "got: {err:?}"
    );
    assert_eq!(channel.pending_requests(), 0);

    // Let the worker finish loading; its late `ready` is discarded.
    tokio::time::sleep(Duration::from_millis(400)).await;
    channel.initialize().await.unwrap();
}

#[tokio::test]
async fn timed_out_request_is_discarded_and_channel_stays_usable() {
    let channel = WorkerChannel::spawn(
        mock(MockEngine::new().with_chunk_size(4).with_call_delay(Duration::from_millis(10))),
        options(Duration::from_secs(5), Duration::from_millis(150)),
    )
    .unwrap();
    channel.initialize().await.unwrap();

    let err = channel.process(request(80, 3.0)).unwrap().wait().await.unwrap_err();
    assert!(
        matches!(&err, KeyshiftError::Timeout { operation, .. } if operation == "process"),
        "got: {err:?}"
    );
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(channel.pending_requests(), 0);

    // The stale request keeps running in the worker; once it is done the
    // next request gets its own result, not the stale one.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let output = channel.process(request(8, 3.0)).unwrap().wait().await.unwrap();
    assert_eq!(output.frames(), 8);
}

#[tokio::test]
async fn second_process_while_busy_is_rejected() {
    let channel = WorkerChannel::spawn(
        mock(MockEngine::new().with_chunk_size(4).with_call_delay(Duration::from_millis(5))),
        ChannelOptions::default(),
    )
    .unwrap();
    channel.initialize().await.unwrap();

    let first = channel.process(request(64, 1.0)).unwrap();
    let second = channel.process(request(64, 1.0));

    assert!(matches!(second, Err(KeyshiftError::RequestInFlight)));
    let output = first.wait().await.unwrap();
    assert_eq!(output, ramp(64, 1));
}

#[tokio::test]
async fn terminate_rejects_pending_and_later_requests() {
    let channel = WorkerChannel::spawn(
        mock(MockEngine::new().with_chunk_size(4).with_call_delay(Duration::from_millis(20))),
        ChannelOptions::default(),
    )
    .unwrap();
    channel.initialize().await.unwrap();
    let job = channel.process(request(400, 5.0)).unwrap();

    channel.terminate();
    channel.terminate();

    assert!(matches!(job.wait().await, Err(KeyshiftError::Terminated)));
    assert!(matches!(channel.initialize().await, Err(KeyshiftError::Terminated)));
    assert!(matches!(channel.process(request(4, 1.0)), Err(KeyshiftError::Terminated)));
    assert_eq!(channel.pending_requests(), 0);
}

#[tokio::test]
async fn invalid_request_reports_invalid_parameter() {
    let channel = WorkerChannel::spawn(mock(MockEngine::new()), ChannelOptions::default()).unwrap();
    channel.initialize().await.unwrap();

    let bad = StretchRequest {
        channels: vec![vec![0.0; 8], vec![0.0; 8]],
        sample_rate: 44100.0,
        channel_count: 3,
        semitones: 1.0,
        tempo: 1.0,
    };
    let err = channel.process(bad).unwrap().wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    // The channel still serves requests after an error.
    assert_eq!(channel.process(request(8, 1.0)).unwrap().wait().await.unwrap().frames(), 8);
}
