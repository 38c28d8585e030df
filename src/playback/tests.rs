use super::*;
use crate::directory::{RecordingLookup, StaticRecordingLookup};
use crate::error::{ErrorCategory, PlayerError, Result, SessionErrorCategory, ValidationError};
use crate::events::{EventBus, PlayerEvent};
use crate::media::mock::{MockDecoderFactory, MockSurface, ScriptStep};
use crate::media::RenderSurface;
use crate::session::{SessionOptions, SessionStatus};
use crate::source::{RangePolicy, TimeRange};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

const FRONT_DOOR: &str = "http://cams.local/front/index.m3u8";
const BACK_YARD: &str = "http://cams.local/back/index.m3u8";
const GARAGE: &str = "http://cams.local/garage/index.m3u8";

fn setup(factory: MockDecoderFactory) -> (Arc<MockDecoderFactory>, Arc<MockSurface>, PlaybackController) {
    let factory = Arc::new(factory);
    let surface = MockSurface::new();
    let controller = PlaybackController::with_options(
        factory.clone(),
        surface.clone(),
        SessionOptions::default(),
        RangePolicy::default(),
    );
    (factory, surface, controller)
}

struct FailingLookup;

#[async_trait]
impl RecordingLookup for FailingLookup {
    async fn resolve(&self, _camera_id: &str, _range: &TimeRange) -> Result<String> {
        Err(PlayerError::system("recording index unreachable"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_switches_never_overlap_on_the_surface() {
    let (factory, surface, controller) = setup(MockDecoderFactory::new());

    for url in [FRONT_DOOR, BACK_YARD, GARAGE, FRONT_DOOR] {
        controller.switch_to_live(url).await.unwrap();
        assert_eq!(controller.status(), SessionStatus::Ready);
    }

    assert_eq!(surface.attach_count(), 4);
    assert_eq!(surface.busy_rejections(), 0);
    assert_eq!(factory.created_count(), 4);
    assert_eq!(factory.live_count(), 1);
    assert_eq!(
        controller.current_selection(),
        Selection::Live {
            url: FRONT_DOOR.to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_switch_to_same_live_feed_is_noop() {
    let (factory, surface, controller) = setup(MockDecoderFactory::new());

    controller.switch_to_live(FRONT_DOOR).await.unwrap();
    controller.switch_to_live(FRONT_DOOR).await.unwrap();

    assert_eq!(factory.created_count(), 1);
    assert_eq!(surface.attach_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_relative_manifest_url_starts_session() {
    let (factory, surface, controller) = setup(MockDecoderFactory::new());

    controller.switch_to_live("live.m3u8").await.unwrap();

    assert_eq!(controller.status(), SessionStatus::Ready);
    assert_eq!(factory.created_count(), 1);
    assert_eq!(surface.attach_count(), 1);
    assert_eq!(
        factory.decoders()[0].loaded_url().as_deref(),
        Some("live.m3u8")
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_switch_reverts_to_last_good_source() {
    let factory = MockDecoderFactory::new();
    factory.script(BACK_YARD, ScriptStep::unreachable_manifest());
    let (_factory, surface, controller) = setup(factory);
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let controller = controller.with_events(bus);

    controller.switch_to_live(FRONT_DOOR).await.unwrap();
    let err = controller.switch_to_live(BACK_YARD).await.unwrap_err();

    match &err {
        PlayerError::Session {
            source,
            reverted_to,
        } => {
            assert_eq!(
                source.classification.category,
                SessionErrorCategory::ManifestLoad
            );
            assert_eq!(reverted_to.as_deref(), Some(FRONT_DOOR));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(
        controller.current_selection(),
        Selection::Live {
            url: FRONT_DOOR.to_string()
        }
    );

    let session = controller.active_session().unwrap();
    session.wait_settled().await;
    assert_eq!(controller.status(), SessionStatus::Ready);
    assert_eq!(surface.attach_count(), 3);
    assert_eq!(surface.busy_rejections(), 0);

    let mut saw_switch_failed = false;
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::SwitchFailed { reverted_to, .. } = event {
            assert_eq!(reverted_to.as_deref(), Some(FRONT_DOOR));
            saw_switch_failed = true;
        }
    }
    assert!(saw_switch_failed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_switch_leaves_error_visible() {
    let factory = MockDecoderFactory::new();
    factory.script(FRONT_DOOR, ScriptStep::unreachable_manifest());
    let (_factory, _surface, controller) = setup(factory);

    let err = controller.switch_to_live(FRONT_DOOR).await.unwrap_err();

    assert!(matches!(err, PlayerError::Session { reverted_to: None, .. }));
    assert_eq!(controller.current_selection(), Selection::Idle);
    assert!(controller.status().is_error());
}

#[tokio::test(start_paused = true)]
async fn test_newer_switch_supersedes_pending_one() {
    let factory = MockDecoderFactory::new();
    factory.script(FRONT_DOOR, ScriptStep::hanging());
    let (_factory, surface, controller) = setup(factory);

    let (first, second) = tokio::join!(controller.switch_to_live(FRONT_DOOR), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.switch_to_live(BACK_YARD).await
    });

    assert!(matches!(first, Err(PlayerError::Superseded)));
    second.unwrap();
    assert_eq!(
        controller.current_selection(),
        Selection::Live {
            url: BACK_YARD.to_string()
        }
    );
    assert_eq!(surface.busy_rejections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_range_does_not_disturb_playback() {
    let (factory, surface, controller) = setup(MockDecoderFactory::new());
    controller.switch_to_live(FRONT_DOOR).await.unwrap();

    let now = Utc::now();
    let err = controller
        .switch_to_range(BACK_YARD, now - ChronoDuration::minutes(5), now - ChronoDuration::minutes(10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PlayerError::Validation(ValidationError::EmptyRange { .. })
    ));

    let err = controller
        .switch_to_range(BACK_YARD, now, now + ChronoDuration::hours(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PlayerError::Validation(ValidationError::FutureBound { .. })
    ));

    assert_eq!(factory.created_count(), 1);
    assert_eq!(surface.attach_count(), 1);
    assert_eq!(controller.status(), SessionStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_search_recording_switches_to_range() {
    let (factory, _surface, controller) = setup(MockDecoderFactory::new());
    let lookup = StaticRecordingLookup::new("http://nvr.local/{camera}/{start}-{end}.m3u8");
    controller.switch_to_live(FRONT_DOOR).await.unwrap();

    let end = Utc::now() - ChronoDuration::minutes(30);
    let start = end - ChronoDuration::hours(1);
    controller
        .search_recording(&lookup, "front", start, end)
        .await
        .unwrap();

    let expected_url = format!(
        "http://nvr.local/front/{}-{}.m3u8",
        start.timestamp(),
        end.timestamp()
    );
    match controller.current_selection() {
        Selection::TimeRange { url, range } => {
            assert_eq!(url, expected_url);
            assert_eq!(range, TimeRange::new(start, end));
        }
        other => panic!("unexpected selection {:?}", other),
    }
    assert_eq!(
        factory.decoders()[1].loaded_url().as_deref(),
        Some(expected_url.as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_lookup_leaves_playback_untouched() {
    let (factory, surface, controller) = setup(MockDecoderFactory::new());
    controller.switch_to_live(FRONT_DOOR).await.unwrap();

    let end = Utc::now() - ChronoDuration::minutes(30);
    let err = controller
        .search_recording(&FailingLookup, "front", end - ChronoDuration::hours(1), end)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Lookup);
    assert_eq!(factory.created_count(), 1);
    assert_eq!(surface.attach_count(), 1);
    assert_eq!(
        controller.current_selection(),
        Selection::Live {
            url: FRONT_DOOR.to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_transport_controls_require_a_playing_session() {
    let (_factory, surface, controller) = setup(MockDecoderFactory::new());
    assert!(controller.pause().is_err());

    controller.switch_to_live(FRONT_DOOR).await.unwrap();
    controller.pause().unwrap();
    assert!(!surface.is_playing());
    controller.play().unwrap();
    assert!(surface.is_playing());
    controller.seek(Duration::from_secs(12)).unwrap();
    assert_eq!(surface.position(), Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_surface() {
    let (factory, surface, controller) = setup(MockDecoderFactory::new());
    controller.switch_to_live(FRONT_DOOR).await.unwrap();

    controller.shutdown();

    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(controller.current_selection(), Selection::Idle);
    assert_eq!(surface.owner(), None);
    assert_eq!(factory.live_count(), 0);
}
