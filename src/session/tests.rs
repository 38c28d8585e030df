use super::*;
use crate::config::RecoveryConfig;
use crate::error::{SessionErrorCategory, Severity};
use crate::media::mock::{MockDecoderFactory, MockSurface, ScriptStep};
use crate::media::{DecoderErrorKind, DecoderEvent, ErrorDetails, RenderSurface, SurfaceEvent};
use crate::source::StreamSource;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const FRONT_DOOR: &str = "http://cams.local/front/index.m3u8";
const BACK_YARD: &str = "http://cams.local/back/index.m3u8";

fn setup(factory: MockDecoderFactory) -> (Arc<MockDecoderFactory>, Arc<MockSurface>, StreamSession) {
    let factory = Arc::new(factory);
    let surface = MockSurface::new();
    let session = StreamSession::new(factory.clone(), surface.clone(), SessionOptions::default());
    (factory, surface, session)
}

fn record_statuses(session: &StreamSession) -> Arc<Mutex<Vec<SessionStatus>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.on_status_change(move |status| sink.lock().push(status.clone()));
    seen
}

async fn wait_for_status<F>(session: &StreamSession, predicate: F)
where
    F: Fn(&SessionStatus) -> bool,
{
    let mut rx = session.subscribe_status();
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("status was not reached");
}

#[tokio::test(start_paused = true)]
async fn test_healthy_stream_becomes_ready() {
    let (factory, surface, session) = setup(MockDecoderFactory::new());
    let seen = record_statuses(&session);

    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);

    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(
        *seen.lock(),
        vec![SessionStatus::Initializing, SessionStatus::Ready]
    );
    assert_eq!(surface.owner(), Some(session.id()));
    assert!(surface.is_playing(), "autoplay should start playback");
    assert_eq!(factory.decoders()[0].loaded_url().as_deref(), Some(FRONT_DOOR));
}

#[tokio::test(start_paused = true)]
async fn test_parsed_manifest_alone_becomes_ready() {
    let factory = MockDecoderFactory::new();
    factory.script(
        FRONT_DOOR,
        vec![ScriptStep::Decoder(DecoderEvent::ManifestParsed { levels: 1 })],
    );
    let (_factory, surface, session) = setup(factory);
    let seen = record_statuses(&session);

    let started = tokio::time::Instant::now();
    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        *seen.lock(),
        vec![SessionStatus::Initializing, SessionStatus::Ready]
    );
    assert!(surface.is_playing(), "autoplay should start playback");
}

#[tokio::test(start_paused = true)]
async fn test_manifest_failure_is_fatal_and_releases_resources() {
    let factory = MockDecoderFactory::new();
    factory.script(FRONT_DOOR, ScriptStep::unreachable_manifest());
    let (factory, surface, session) = setup(factory);
    let seen = record_statuses(&session);

    session.start(StreamSource::live(FRONT_DOOR));
    let outcome = session.wait_settled().await;

    match outcome {
        SettleOutcome::Failed(classification) => {
            assert_eq!(classification.severity, Severity::Fatal);
            assert_eq!(classification.category, SessionErrorCategory::ManifestLoad);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let decoder = &factory.decoders()[0];
    assert!(decoder.is_destroyed());
    assert!(decoder.stop_load_calls() >= 1);
    assert_eq!(surface.owner(), None);
    assert_eq!(
        seen.lock().iter().filter(|status| status.is_error()).count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_hanging_stream_hits_init_deadline() {
    let (factory, surface, session) = setup(MockDecoderFactory::with_default(ScriptStep::hanging()));

    let started = tokio::time::Instant::now();
    session.start(StreamSource::live(FRONT_DOOR));
    let outcome = session.wait_settled().await;

    assert!(started.elapsed() >= Duration::from_secs(15));
    match outcome {
        SettleOutcome::Failed(classification) => {
            assert_eq!(classification.category, SessionErrorCategory::ManifestLoad);
            assert!(classification.detail.contains("timed out"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(factory.decoders()[0].is_destroyed());
    assert_eq!(surface.owner(), None);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_is_idempotent_and_silences_observers() {
    let (factory, surface, session) = setup(MockDecoderFactory::new());
    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);

    let seen = record_statuses(&session);
    session.destroy();
    session.destroy();

    // Late events from the surface must not produce transitions
    surface.signal(SurfaceEvent::Waiting);
    surface.signal(SurfaceEvent::Error {
        code: 4,
        message: "late".to_string(),
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(seen.lock().is_empty());
    assert_eq!(session.status(), SessionStatus::Ready);
    assert!(session.is_destroyed());
    assert!(factory.decoders()[0].is_destroyed());
    assert_eq!(surface.owner(), None);
    assert_eq!(surface.detach_count(), 1);
    assert_eq!(session.wait_settled().await, SettleOutcome::Destroyed);

    // Starting a destroyed session is a no-op
    session.start(StreamSource::live(BACK_YARD));
    assert_eq!(factory.created_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_while_initializing_resolves_waiters() {
    let (_factory, _surface, session) =
        setup(MockDecoderFactory::with_default(ScriptStep::hanging()));
    session.start(StreamSource::live(FRONT_DOOR));

    let waiter = {
        let session = session.clone();
        tokio::spawn(async move { session.wait_settled().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.destroy();

    assert_eq!(waiter.await.unwrap(), SettleOutcome::Destroyed);
    assert_eq!(session.status(), SessionStatus::Initializing);
}

#[tokio::test(start_paused = true)]
async fn test_native_playback_fallback() {
    let factory = Arc::new(MockDecoderFactory::unsupported());
    let surface = MockSurface::builder().native_hls(true).build();
    let session = StreamSession::new(factory.clone(), surface.clone(), SessionOptions::default());

    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);
    assert_eq!(surface.native_url().as_deref(), Some(FRONT_DOOR));
    assert_eq!(factory.created_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_runtime_is_fatal() {
    let (_factory, surface, session) = setup(MockDecoderFactory::unsupported());

    session.start(StreamSource::live(FRONT_DOOR));
    match session.status() {
        SessionStatus::Error(classification) => {
            assert_eq!(classification.category, SessionErrorCategory::Unsupported);
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(surface.owner(), None);
}

#[tokio::test(start_paused = true)]
async fn test_recoverable_errors_do_not_change_status() {
    let mut script = ScriptStep::healthy_stream();
    script.push(ScriptStep::Wait(Duration::from_millis(200)));
    script.push(ScriptStep::non_fatal(
        DecoderErrorKind::Network,
        ErrorDetails::FragLoadTimeout,
    ));
    script.push(ScriptStep::non_fatal(
        DecoderErrorKind::Media,
        ErrorDetails::BufferAppendError,
    ));
    let factory = MockDecoderFactory::with_default(script);
    let (_factory, _surface, session) = setup(factory);
    let seen = record_statuses(&session);

    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(
        *seen.lock(),
        vec![SessionStatus::Initializing, SessionStatus::Ready]
    );
}

#[tokio::test(start_paused = true)]
async fn test_buffer_stall_triggers_media_recovery() {
    let mut script = ScriptStep::healthy_stream();
    script.push(ScriptStep::Wait(Duration::from_millis(200)));
    script.push(ScriptStep::fatal(DecoderErrorKind::Media, ErrorDetails::BufferStalled));
    script.push(ScriptStep::fatal(DecoderErrorKind::Media, ErrorDetails::FragParsingError));
    let (factory, _surface, session) = setup(MockDecoderFactory::with_default(script));

    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let decoder = &factory.decoders()[0];
    assert_eq!(decoder.recover_calls(), 2);
    assert_eq!(decoder.swap_calls(), 1);
    assert_eq!(session.status(), SessionStatus::Ready);
    assert!(!decoder.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn test_media_recovery_waits_for_backoff() {
    let mut script = ScriptStep::healthy_stream();
    script.push(ScriptStep::Wait(Duration::from_millis(200)));
    script.push(ScriptStep::fatal(DecoderErrorKind::Media, ErrorDetails::BufferStalled));
    let (factory, _surface, session) = setup(MockDecoderFactory::with_default(script));

    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let decoder = &factory.decoders()[0];
    assert_eq!(decoder.recover_calls(), 0, "recovery ran before its backoff");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(decoder.recover_calls(), 1);
    assert_eq!(session.status(), SessionStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_fragment_failures_reload_then_escalate() {
    let mut script = ScriptStep::healthy_stream();
    for _ in 0..4 {
        script.push(ScriptStep::Wait(Duration::from_secs(10)));
        script.push(ScriptStep::fatal(DecoderErrorKind::Network, ErrorDetails::FragLoadError));
    }
    let factory = Arc::new(MockDecoderFactory::with_default(script));
    let surface = MockSurface::new();
    let options = SessionOptions {
        recovery: RecoveryConfig {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 2_000,
        },
        ..SessionOptions::default()
    };
    let session = StreamSession::new(factory.clone(), surface.clone(), options);

    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);
    wait_for_status(&session, SessionStatus::is_error).await;

    let decoder = &factory.decoders()[0];
    assert_eq!(decoder.start_load_calls(), 3);
    match session.status() {
        SessionStatus::Error(classification) => {
            assert_eq!(classification.category, SessionErrorCategory::Network);
            assert!(classification.is_fatal());
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert!(decoder.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn test_surface_error_is_fatal_media_decode() {
    let mut script = ScriptStep::healthy_stream();
    script.push(ScriptStep::Surface(SurfaceEvent::Error {
        code: 3,
        message: "MEDIA_ERR_DECODE".to_string(),
    }));
    let (_factory, surface, session) = setup(MockDecoderFactory::with_default(script));

    session.start(StreamSource::live(FRONT_DOOR));
    wait_for_status(&session, SessionStatus::is_error).await;

    match session.status() {
        SessionStatus::Error(classification) => {
            assert_eq!(classification.category, SessionErrorCategory::MediaDecode);
            assert_eq!(classification.detail, "Video playback error (Code: 3)");
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert!(!surface.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_waiting_and_resuming() {
    let mut script = ScriptStep::healthy_stream();
    script.push(ScriptStep::Wait(Duration::from_secs(1)));
    script.push(ScriptStep::Surface(SurfaceEvent::Waiting));
    script.push(ScriptStep::Wait(Duration::from_secs(1)));
    script.push(ScriptStep::Surface(SurfaceEvent::Playing));
    let (_factory, _surface, session) = setup(MockDecoderFactory::with_default(script));
    let seen = record_statuses(&session);

    session.start(StreamSource::live(FRONT_DOOR));
    wait_for_status(&session, |status| *status == SessionStatus::Buffering).await;
    wait_for_status(&session, |status| *status == SessionStatus::Ready).await;

    assert_eq!(
        *seen.lock(),
        vec![
            SessionStatus::Initializing,
            SessionStatus::Ready,
            SessionStatus::Buffering,
            SessionStatus::Ready,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_autoplay_refusal_is_not_an_error() {
    let factory = Arc::new(MockDecoderFactory::new());
    let surface = MockSurface::builder().autoplay_blocked(true).build();
    let session = StreamSession::new(factory, surface.clone(), SessionOptions::default());

    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);
    assert!(!surface.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_restart_replaces_pipeline() {
    let (factory, surface, session) = setup(MockDecoderFactory::new());

    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);
    session.start(StreamSource::live(BACK_YARD));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);

    let decoders = factory.decoders();
    assert_eq!(decoders.len(), 2);
    assert!(decoders[0].is_destroyed());
    assert!(!decoders[1].is_destroyed());
    assert_eq!(decoders[1].loaded_url().as_deref(), Some(BACK_YARD));
    assert_eq!(surface.attach_count(), 2);
    assert_eq!(surface.busy_rejections(), 0);
    assert_eq!(session.source(), Some(StreamSource::live(BACK_YARD)));
}

#[tokio::test(start_paused = true)]
async fn test_second_session_cannot_share_surface() {
    let factory = Arc::new(MockDecoderFactory::new());
    let surface = MockSurface::new();
    let first = StreamSession::new(factory.clone(), surface.clone(), SessionOptions::default());
    let second = StreamSession::new(factory.clone(), surface.clone(), SessionOptions::default());

    first.start(StreamSource::live(FRONT_DOOR));
    second.start(StreamSource::live(BACK_YARD));

    assert!(second.status().is_error());
    assert_eq!(first.wait_settled().await, SettleOutcome::Ready);
    assert_eq!(surface.owner(), Some(first.id()));
    assert_eq!(surface.busy_rejections(), 1);
}
