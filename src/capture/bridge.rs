use super::artifact::{Recording, Snapshot, JPEG_MIME};
use super::negotiate::negotiate_mime;
use super::tracks::TrackGuard;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, PlayerError, Result, TimeoutError};
use crate::events::{EventBus, PlayerEvent};
use crate::frame::encode_jpeg;
use crate::media::{ChunkRecorder, RecorderBackend, RecorderEvent, RenderSurface, SurfaceEvent};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the chunk collector saw before the recorder finished
#[derive(Debug, Default)]
struct CollectedChunks {
    chunks: Vec<Bytes>,
    error: Option<String>,
}

struct ActiveRecording {
    recorder: Box<dyn ChunkRecorder>,
    tracks: Arc<TrackGuard>,
    mime_type: String,
    started_at: DateTime<Utc>,
    collector: JoinHandle<CollectedChunks>,
}

impl ActiveRecording {
    fn is_running(&self) -> bool {
        !self.collector.is_finished()
    }

    fn abandon(self) {
        self.recorder.stop();
        self.tracks.release();
        self.collector.abort();
    }
}

/// Derives snapshots and local recordings from the active render surface
pub struct CaptureBridge {
    surface: Arc<dyn RenderSurface>,
    recorder: Arc<dyn RecorderBackend>,
    config: CaptureConfig,
    available: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
    recording: Mutex<Option<ActiveRecording>>,
    events: Option<EventBus>,
}

impl CaptureBridge {
    pub fn new(
        surface: Arc<dyn RenderSurface>,
        recorder: Arc<dyn RecorderBackend>,
        config: CaptureConfig,
    ) -> Self {
        Self::build(surface, recorder, config, None)
    }

    pub fn with_events(
        surface: Arc<dyn RenderSurface>,
        recorder: Arc<dyn RecorderBackend>,
        config: CaptureConfig,
        events: EventBus,
    ) -> Self {
        Self::build(surface, recorder, config, Some(events))
    }

    fn build(
        surface: Arc<dyn RenderSurface>,
        recorder: Arc<dyn RecorderBackend>,
        config: CaptureConfig,
        events: Option<EventBus>,
    ) -> Self {
        let available = Arc::new(AtomicBool::new(evaluate_capability(
            surface.as_ref(),
            recorder.as_ref(),
        )));

        let watcher = tokio::spawn(watch_capability(
            surface.subscribe(),
            Arc::clone(&surface),
            Arc::clone(&recorder),
            Arc::clone(&available),
            events.clone(),
        ));

        Self {
            surface,
            recorder,
            config,
            available,
            watcher,
            recording: Mutex::new(None),
            events,
        }
    }

    /// Whether snapshot and recording can work with the current surface
    pub fn supports_capture(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn is_recording(&self) -> bool {
        self.recording
            .lock()
            .as_ref()
            .map(ActiveRecording::is_running)
            .unwrap_or(false)
    }

    /// Encode the currently displayed frame as JPEG
    pub async fn capture_still(&self) -> Result<Snapshot> {
        if !self.surface.ready_state().has_frame() {
            return Err(CaptureError::NotReady.into());
        }
        let frame = self.surface.current_frame().ok_or(CaptureError::NotReady)?;
        let (width, height) = (frame.width, frame.height);
        let quality = self.config.snapshot_quality;

        let image = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality, None))
            .await
            .map_err(|e| CaptureError::EncodeFailure {
                details: e.to_string(),
            })??;

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            image,
            mime_type: JPEG_MIME.to_string(),
            width,
            height,
            captured_at: Utc::now(),
        };

        info!(
            "Captured {}x{} snapshot ({} bytes)",
            width,
            height,
            snapshot.image.len()
        );
        self.emit(PlayerEvent::SnapshotCaptured {
            artifact_id: snapshot.id.to_string(),
            bytes: snapshot.image.len(),
            timestamp: snapshot.captured_at,
        });
        Ok(snapshot)
    }

    /// Start chunked recording of the surface's capture stream
    pub fn start_recording(&self) -> Result<()> {
        let mut slot = self.recording.lock();
        if let Some(active) = slot.as_ref() {
            if active.is_running() {
                return Err(CaptureError::AlreadyRecording.into());
            }
        }
        if let Some(finished) = slot.take() {
            debug!("Discarding recording that ended without stop");
            finished.abandon();
        }

        if !self.recorder.is_available() {
            return Err(CaptureError::Recorder {
                details: "no recorder is available".to_string(),
            }
            .into());
        }

        let stream = self.surface.capture_stream().ok_or(CaptureError::NoStream)?;
        let tracks = stream.tracks();
        if tracks.is_empty() {
            return Err(CaptureError::IncompatibleStream.into());
        }
        let guard = Arc::new(TrackGuard::new(tracks));

        let mime_type = match negotiate_mime(&self.config.mime_preferences, self.recorder.as_ref()) {
            Ok(mime_type) => mime_type,
            Err(e) => {
                guard.release();
                return Err(e.into());
            }
        };

        let (recorder, chunks) =
            match self
                .recorder
                .start(stream, &mime_type, self.config.recording_timeslice())
            {
                Ok(started) => started,
                Err(e) => {
                    guard.release();
                    return Err(CaptureError::Recorder {
                        details: e.to_string(),
                    }
                    .into());
                }
            };

        let collector = tokio::spawn(collect_chunks(chunks, Arc::clone(&guard)));
        let started_at = Utc::now();

        info!(
            "Recording started as {} with {} tracks",
            mime_type,
            guard.track_count()
        );
        self.emit(PlayerEvent::RecordingStarted {
            mime_type: mime_type.clone(),
            timestamp: started_at,
        });

        *slot = Some(ActiveRecording {
            recorder,
            tracks: guard,
            mime_type,
            started_at,
            collector,
        });
        Ok(())
    }

    /// Stop recording and wait for the final chunk
    ///
    /// Tracks are released on every path, including timeout.
    pub async fn stop_recording(&self) -> Result<Recording> {
        let active = self
            .recording
            .lock()
            .take()
            .ok_or(CaptureError::NotRecording)?;
        let ActiveRecording {
            recorder,
            tracks,
            mime_type,
            started_at,
            mut collector,
        } = active;

        recorder.stop();
        let deadline = self.config.stop_timeout();
        let collected = tokio::time::timeout(deadline, &mut collector).await;
        tracks.release();

        let collected = match collected {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => {
                error!("Recording collector failed: {}", e);
                return Err(PlayerError::system(format!("recording collector failed: {}", e)));
            }
            Err(_) => {
                collector.abort();
                warn!("Recorder did not flush within {:?}", deadline);
                return Err(TimeoutError::new("stop recording", deadline).into());
            }
        };

        if let Some(details) = collected.error {
            return Err(CaptureError::Recorder { details }.into());
        }
        if collected.chunks.is_empty() {
            return Err(CaptureError::NoData.into());
        }

        let recording = Recording {
            id: Uuid::new_v4(),
            chunks: collected.chunks,
            mime_type,
            started_at,
            ended_at: Utc::now(),
        };

        info!(
            "Recording stopped: {} chunks, {} bytes",
            recording.chunk_count(),
            recording.byte_len()
        );
        self.emit(PlayerEvent::RecordingStopped {
            artifact_id: recording.id.to_string(),
            chunks: recording.chunk_count(),
            bytes: recording.byte_len(),
            timestamp: recording.ended_at,
        });
        Ok(recording)
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl Drop for CaptureBridge {
    fn drop(&mut self) {
        self.watcher.abort();
        if let Some(active) = self.recording.get_mut().take() {
            warn!("Capture bridge dropped while recording, discarding");
            active.abandon();
        }
    }
}

fn evaluate_capability(surface: &dyn RenderSurface, recorder: &dyn RecorderBackend) -> bool {
    surface.supports_capture_stream() && recorder.is_available()
}

async fn watch_capability(
    mut surface_events: broadcast::Receiver<SurfaceEvent>,
    surface: Arc<dyn RenderSurface>,
    recorder: Arc<dyn RecorderBackend>,
    available: Arc<AtomicBool>,
    events: Option<EventBus>,
) {
    loop {
        match surface_events.recv().await {
            Ok(SurfaceEvent::LoadedData) | Ok(SurfaceEvent::CanPlay) => {
                let now = evaluate_capability(surface.as_ref(), recorder.as_ref());
                if available.swap(now, Ordering::SeqCst) != now {
                    debug!("Capture availability changed to {}", now);
                    if let Some(events) = &events {
                        events.emit(PlayerEvent::CaptureAvailabilityChanged { available: now });
                    }
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn collect_chunks(
    mut chunks: mpsc::UnboundedReceiver<RecorderEvent>,
    tracks: Arc<TrackGuard>,
) -> CollectedChunks {
    let mut collected = CollectedChunks::default();

    while let Some(event) = chunks.recv().await {
        match event {
            RecorderEvent::Data(chunk) if chunk.is_empty() => {}
            RecorderEvent::Data(chunk) => collected.chunks.push(chunk),
            RecorderEvent::Error(details) => {
                error!("Recorder error: {}", details);
                tracks.release();
                collected.error = Some(details);
                break;
            }
            RecorderEvent::Stopped => break,
        }
    }

    collected
}
