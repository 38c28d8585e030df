use super::*;
use crate::config::PlayerConfig;
use crate::events::{EventBus, PlayerEvent};
use crate::media::mock::{MockDecoderFactory, MockSurfaceFactory, ScriptStep};
use crate::media::{DecoderErrorKind, DecoderTuning, ErrorDetails, RenderSurface};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn camera_url(index: usize) -> String {
    format!("http://cams.local/cam{}/index.m3u8", index)
}

fn setup(
    decoders: MockDecoderFactory,
    config: &PlayerConfig,
) -> (Arc<MockSurfaceFactory>, Arc<MockDecoderFactory>, PreviewSampler) {
    let surfaces = Arc::new(MockSurfaceFactory::new());
    let decoders = Arc::new(decoders);
    let sampler = PreviewSampler::new(surfaces.clone(), decoders.clone(), config);
    (surfaces, decoders, sampler)
}

#[tokio::test(start_paused = true)]
async fn test_sample_produces_scaled_jpeg() {
    let (surfaces, decoders, sampler) = setup(MockDecoderFactory::new(), &PlayerConfig::default());

    let result = sampler.sample("front", &camera_url(0)).await;

    assert_eq!(result.camera_id, "front");
    let image = result.image().expect("preview should succeed");
    assert_eq!(&image[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory_with_format(image, image::ImageFormat::Jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (300, 200));

    assert_eq!(surfaces.surfaces()[0].owner(), None);
    assert_eq!(decoders.live_count(), 0);
    assert_eq!(decoders.decoders()[0].tuning(), &DecoderTuning::preview());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_camera_times_out_without_blocking_others() {
    let decoders = MockDecoderFactory::new();
    decoders.script(camera_url(4), ScriptStep::hanging());
    let (surfaces, decoders, sampler) = setup(decoders, &PlayerConfig::default());

    let started = Instant::now();
    let cameras: Vec<(String, String)> = (0..10)
        .map(|i| (format!("cam{}", i), camera_url(i)))
        .collect();
    let results = sampler.sample_all(cameras).await;

    assert_eq!(results.len(), 10);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.camera_id, format!("cam{}", i));
        if i == 4 {
            let reason = result.failure_reason().expect("hanging camera must fail");
            assert!(reason.contains("timed out"), "reason was {}", reason);
        } else {
            assert!(result.is_success(), "camera {} failed", i);
        }
    }
    assert!(started.elapsed() <= Duration::from_secs(9));

    assert_eq!(decoders.live_count(), 0);
    for surface in surfaces.surfaces() {
        assert_eq!(surface.owner(), None);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_stream_reports_reason_and_tears_down() {
    let decoders = MockDecoderFactory::new();
    decoders.script(camera_url(1), ScriptStep::unreachable_manifest());
    decoders.script(
        camera_url(2),
        vec![ScriptStep::fatal(
            DecoderErrorKind::Media,
            ErrorDetails::BufferStalled,
        )],
    );
    let (surfaces, decoders, sampler) = setup(decoders, &PlayerConfig::default());

    let started = Instant::now();
    let manifest = sampler.sample("cam1", &camera_url(1)).await;
    let stalled = sampler.sample("cam2", &camera_url(2)).await;

    assert!(manifest.failure_reason().is_some());
    assert!(stalled.failure_reason().is_some());
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "fatal errors must not wait for the deadline"
    );
    assert_eq!(decoders.live_count(), 0);
    assert!(surfaces.surfaces().iter().all(|s| s.owner().is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_queues_samples() {
    let mut config = PlayerConfig::default();
    config.preview.max_concurrent = Some(1);
    let decoders = MockDecoderFactory::new();
    decoders.script(camera_url(0), ScriptStep::hanging());
    let (_surfaces, _decoders, sampler) = setup(decoders, &config);

    let started = Instant::now();
    let results = sampler
        .sample_all(vec![("cam0", camera_url(0)), ("cam1", camera_url(1))])
        .await;

    assert!(!results[0].is_success());
    assert!(results[1].is_success());
    assert!(started.elapsed() >= config.preview.timeout());
}

#[tokio::test(start_paused = true)]
async fn test_completion_events_published() {
    let decoders = MockDecoderFactory::new();
    decoders.script(camera_url(1), ScriptStep::unreachable_manifest());
    let (_surfaces, _decoders, sampler) = setup(decoders, &PlayerConfig::default());
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let sampler = sampler.with_events(bus);

    sampler
        .sample_all(vec![("ok", camera_url(0)), ("broken", camera_url(1))])
        .await;

    let mut completed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::PreviewCompleted {
            camera_id, success, ..
        } = event
        {
            completed.push((camera_id, success));
        }
    }
    completed.sort();
    assert_eq!(
        completed,
        vec![("broken".to_string(), false), ("ok".to_string(), true)]
    );
}
