use super::*;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, ErrorCategory, PlayerError};
use crate::events::{EventBus, PlayerEvent};
use crate::media::mock::{MockDecoderFactory, MockRecorderBackend, MockSurface};
use crate::media::{MediaTrack, RenderSurface, SurfaceEvent};
use crate::session::{SessionOptions, SettleOutcome, StreamSession};
use crate::source::StreamSource;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;

const FRONT_DOOR: &str = "http://cams.local/front/index.m3u8";

fn webm_recorder() -> MockRecorderBackend {
    MockRecorderBackend::supporting(&["video/webm;codecs=vp9", "video/webm;codecs=vp8", "video/webm"])
}

async fn playing_session(surface: Arc<MockSurface>) -> StreamSession {
    let session = StreamSession::new(
        Arc::new(MockDecoderFactory::new()),
        surface,
        SessionOptions::default(),
    );
    session.start(StreamSource::live(FRONT_DOOR));
    assert_eq!(session.wait_settled().await, SettleOutcome::Ready);
    session
}

fn assert_tracks_stopped_once(surface: &MockSurface) {
    let streams = surface.issued_streams();
    assert!(!streams.is_empty(), "no capture stream was requested");
    for stream in streams {
        for track in stream.mock_tracks() {
            assert!(track.is_stopped());
            assert_eq!(track.stop_calls(), 1);
        }
    }
}

#[tokio::test]
async fn test_capability_requires_stream_and_recorder() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(surface.clone(), Arc::new(webm_recorder()), CaptureConfig::default());
    assert!(bridge.supports_capture());

    let no_recorder = CaptureBridge::new(
        surface.clone(),
        Arc::new(MockRecorderBackend::unavailable()),
        CaptureConfig::default(),
    );
    assert!(!no_recorder.supports_capture());

    let plain_surface = MockSurface::builder().capture_supported(false).build();
    let no_stream = CaptureBridge::new(plain_surface, Arc::new(webm_recorder()), CaptureConfig::default());
    assert!(!no_stream.supports_capture());
}

#[tokio::test]
async fn test_capability_reevaluated_on_surface_signals() {
    let surface = MockSurface::builder().capture_supported(false).build();
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let bridge = CaptureBridge::with_events(
        surface.clone(),
        Arc::new(webm_recorder()),
        CaptureConfig::default(),
        events,
    );
    assert!(!bridge.supports_capture());

    surface.set_capture_supported(true);
    // Not re-evaluated until the surface signals new media
    assert!(!bridge.supports_capture());

    surface.signal(SurfaceEvent::LoadedData);
    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        event,
        PlayerEvent::CaptureAvailabilityChanged { available: true }
    ));
    assert!(bridge.supports_capture());
}

#[tokio::test(start_paused = true)]
async fn test_capture_still_requires_frame() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(surface.clone(), Arc::new(webm_recorder()), CaptureConfig::default());

    let err = bridge.capture_still().await.unwrap_err();
    assert!(matches!(err, PlayerError::Capture(CaptureError::NotReady)));

    let _session = playing_session(surface.clone()).await;
    let snapshot = bridge.capture_still().await.unwrap();

    assert_eq!(snapshot.mime_type, "image/jpeg");
    assert_eq!(&snapshot.image[..2], &[0xFF, 0xD8]);
    assert_eq!((snapshot.width, snapshot.height), (64, 36));
}

#[tokio::test(start_paused = true)]
async fn test_capture_still_after_teardown_is_not_ready() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(surface.clone(), Arc::new(webm_recorder()), CaptureConfig::default());
    let session = playing_session(surface.clone()).await;
    session.destroy();

    let err = bridge.capture_still().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Capture);
    assert_eq!(err.user_message(), "Video is not ready or unavailable.");
}

#[tokio::test(start_paused = true)]
async fn test_recording_collects_chunks_and_releases_tracks() {
    let surface = MockSurface::new();
    let recorder = Arc::new(webm_recorder());
    let bridge = CaptureBridge::new(surface.clone(), recorder.clone(), CaptureConfig::default());
    let _session = playing_session(surface.clone()).await;

    bridge.start_recording().unwrap();
    assert!(bridge.is_recording());
    tokio::time::sleep(Duration::from_millis(3_500)).await;

    let recording = bridge.stop_recording().await.unwrap();

    assert_eq!(recorder.started_mimes(), vec!["video/webm;codecs=vp9".to_string()]);
    assert_eq!(recording.mime_type, "video/webm;codecs=vp9");
    // Three timeslices plus the final flush
    assert_eq!(recording.chunk_count(), 4);
    assert_eq!(recording.data().len(), recording.byte_len());
    assert!(recording.ended_at >= recording.started_at);
    assert!(!bridge.is_recording());
    assert_tracks_stopped_once(&surface);
}

#[tokio::test(start_paused = true)]
async fn test_falls_back_to_next_supported_format() {
    let surface = MockSurface::new();
    let recorder = Arc::new(MockRecorderBackend::supporting(&["video/webm"]));
    let bridge = CaptureBridge::new(surface.clone(), recorder.clone(), CaptureConfig::default());
    let _session = playing_session(surface.clone()).await;

    bridge.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let recording = bridge.stop_recording().await.unwrap();

    assert_eq!(recording.mime_type, "video/webm");
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_format_releases_tracks() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(
        surface.clone(),
        Arc::new(MockRecorderBackend::supporting(&["video/mp4"])),
        CaptureConfig::default(),
    );
    let _session = playing_session(surface.clone()).await;

    let err = bridge.start_recording().unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Unsupported);
    assert!(!bridge.is_recording());
    assert_tracks_stopped_once(&surface);
}

#[tokio::test(start_paused = true)]
async fn test_recorder_start_failure_releases_tracks() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(
        surface.clone(),
        Arc::new(webm_recorder().failing_start()),
        CaptureConfig::default(),
    );
    let _session = playing_session(surface.clone()).await;

    let err = bridge.start_recording().unwrap_err();

    assert!(matches!(
        err,
        PlayerError::Capture(CaptureError::Recorder { .. })
    ));
    assert_tracks_stopped_once(&surface);
}

#[tokio::test(start_paused = true)]
async fn test_recorder_error_releases_tracks_and_fails_stop() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(
        surface.clone(),
        Arc::new(webm_recorder().failing_after(2)),
        CaptureConfig::default(),
    );
    let _session = playing_session(surface.clone()).await;

    bridge.start_recording().unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;

    // Released by the collector as soon as the recorder failed
    assert!(!bridge.is_recording());
    assert_tracks_stopped_once(&surface);

    let err = bridge.stop_recording().await.unwrap_err();
    assert!(matches!(
        err,
        PlayerError::Capture(CaptureError::Recorder { .. })
    ));
    assert_tracks_stopped_once(&surface);
}

#[tokio::test(start_paused = true)]
async fn test_stop_deadline_releases_tracks() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(
        surface.clone(),
        Arc::new(webm_recorder().hanging_on_stop()),
        CaptureConfig::default(),
    );
    let _session = playing_session(surface.clone()).await;

    bridge.start_recording().unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let err = bridge.stop_recording().await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert_tracks_stopped_once(&surface);
}

#[tokio::test(start_paused = true)]
async fn test_empty_chunks_are_dropped() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(
        surface.clone(),
        Arc::new(webm_recorder().with_chunk_size(0)),
        CaptureConfig::default(),
    );
    let _session = playing_session(surface.clone()).await;

    bridge.start_recording().unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    let err = bridge.stop_recording().await.unwrap_err();

    assert!(matches!(err, PlayerError::Capture(CaptureError::NoData)));
    assert_tracks_stopped_once(&surface);
}

#[tokio::test(start_paused = true)]
async fn test_recording_state_errors() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(surface.clone(), Arc::new(webm_recorder()), CaptureConfig::default());

    assert!(matches!(
        bridge.stop_recording().await.unwrap_err(),
        PlayerError::Capture(CaptureError::NotRecording)
    ));
    assert!(matches!(
        bridge.start_recording().unwrap_err(),
        PlayerError::Capture(CaptureError::NoStream)
    ));

    let _session = playing_session(surface.clone()).await;
    bridge.start_recording().unwrap();
    assert!(matches!(
        bridge.start_recording().unwrap_err(),
        PlayerError::Capture(CaptureError::AlreadyRecording)
    ));
    bridge.stop_recording().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stream_without_tracks_is_incompatible() {
    let surface = MockSurface::builder().capture_tracks(0).build();
    let bridge = CaptureBridge::new(surface.clone(), Arc::new(webm_recorder()), CaptureConfig::default());
    let _session = playing_session(surface.clone()).await;

    assert!(matches!(
        bridge.start_recording().unwrap_err(),
        PlayerError::Capture(CaptureError::IncompatibleStream)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_drop_mid_recording_releases_tracks() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(surface.clone(), Arc::new(webm_recorder()), CaptureConfig::default());
    let _session = playing_session(surface.clone()).await;

    bridge.start_recording().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(bridge);

    assert_tracks_stopped_once(&surface);
}

#[tokio::test(start_paused = true)]
async fn test_session_teardown_during_recording() {
    let surface = MockSurface::new();
    let bridge = CaptureBridge::new(surface.clone(), Arc::new(webm_recorder()), CaptureConfig::default());
    let session = playing_session(surface.clone()).await;

    bridge.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    session.destroy();

    let recording = bridge.stop_recording().await.unwrap();
    assert!(recording.chunk_count() >= 2);
    assert_tracks_stopped_once(&surface);
}

#[tokio::test(start_paused = true)]
async fn test_events_published_for_captures() {
    let surface = MockSurface::new();
    let events = EventBus::new(16);
    let mut rx = events.subscribe();
    let bridge = CaptureBridge::with_events(
        surface.clone(),
        Arc::new(webm_recorder()),
        CaptureConfig::default(),
        events,
    );
    let _session = playing_session(surface.clone()).await;

    bridge.capture_still().await.unwrap();
    bridge.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    bridge.stop_recording().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event.event_type());
    }
    assert!(seen.contains(&"snapshot_captured"));
    assert!(seen.contains(&"recording_started"));
    assert!(seen.contains(&"recording_stopped"));
}

#[test]
fn test_suggested_filenames() {
    use bytes::Bytes;
    use chrono::TimeZone;
    use uuid::Uuid;

    let at = chrono::Utc.with_ymd_and_hms(2024, 1, 5, 14, 22, 33).unwrap();
    let snapshot = CaptureArtifact::from(Snapshot {
        id: Uuid::new_v4(),
        image: Bytes::from_static(&[0xFF, 0xD8]),
        mime_type: JPEG_MIME.to_string(),
        width: 2,
        height: 2,
        captured_at: at,
    });
    assert_eq!(
        snapshot.suggested_filename("Front  Door", &chrono_tz::UTC),
        "snapshot_Front_Door_20240105_142233.jpg"
    );

    let recording = CaptureArtifact::from(Recording {
        id: Uuid::new_v4(),
        chunks: vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
        mime_type: "video/webm;codecs=vp8".to_string(),
        started_at: at,
        ended_at: at + chrono::Duration::seconds(30),
    });
    let berlin: Tz = "Europe/Berlin".parse().unwrap();
    assert_eq!(
        recording.suggested_filename("Lobby", &berlin),
        "recording_Lobby_20240105_152303.webm"
    );
    assert_eq!(recording.data(), Bytes::from_static(b"abcd"));
    assert_eq!(recording.metadata("Lobby").chunks, Some(2));
    assert_eq!(extension_for("video/mp4"), "mp4");
}
