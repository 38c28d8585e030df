use crate::config::{PlayerConfig, PreviewConfig};
use crate::error::{PlayerError, Result, TimeoutError};
use crate::events::{EventBus, PlayerEvent};
use crate::frame::{encode_jpeg, VideoFrame};
use crate::media::{DecoderFactory, RenderSurface, SurfaceEvent, SurfaceFactory};
use crate::session::{SessionOptions, SessionStatus, StreamSession};
use crate::source::StreamSource;
use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Outcome of sampling one camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// JPEG thumbnail
    Image(Bytes),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewResult {
    pub camera_id: String,
    pub outcome: PreviewOutcome,
}

impl PreviewResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PreviewOutcome::Image(_))
    }

    pub fn image(&self) -> Option<&Bytes> {
        match &self.outcome {
            PreviewOutcome::Image(image) => Some(image),
            PreviewOutcome::Failed(_) => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            PreviewOutcome::Image(_) => None,
            PreviewOutcome::Failed(reason) => Some(reason),
        }
    }
}

/// Destroys the sampling session however the sample ends
struct SessionGuard(StreamSession);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.destroy();
    }
}

/// Pulls one thumbnail per camera through short-lived private sessions
pub struct PreviewSampler {
    surfaces: Arc<dyn SurfaceFactory>,
    decoders: Arc<dyn DecoderFactory>,
    options: SessionOptions,
    config: PreviewConfig,
    limiter: Option<Arc<Semaphore>>,
    events: Option<EventBus>,
}

impl PreviewSampler {
    pub fn new(
        surfaces: Arc<dyn SurfaceFactory>,
        decoders: Arc<dyn DecoderFactory>,
        config: &PlayerConfig,
    ) -> Self {
        Self {
            surfaces,
            decoders,
            options: SessionOptions::preview(config),
            config: config.preview.clone(),
            limiter: config
                .preview
                .max_concurrent
                .map(|permits| Arc::new(Semaphore::new(permits))),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Sample a single frame from `url`
    ///
    /// The configured timeout is one absolute deadline covering manifest
    /// load, first frame and encoding. The session is destroyed before this
    /// returns, whatever the outcome.
    pub async fn sample(&self, camera_id: &str, url: &str) -> PreviewResult {
        let _permit = match &self.limiter {
            Some(limiter) => limiter.clone().acquire_owned().await.ok(),
            None => None,
        };

        let deadline = Instant::now() + self.config.timeout();
        let outcome = match timeout_at(deadline, self.capture(url)).await {
            Ok(Ok(image)) => {
                debug!("Preview for {} captured ({} bytes)", camera_id, image.len());
                PreviewOutcome::Image(image)
            }
            Ok(Err(e)) => {
                warn!("Preview for {} failed: {}", camera_id, e);
                PreviewOutcome::Failed(e.to_string())
            }
            Err(_) => {
                let e = TimeoutError::new("preview", self.config.timeout());
                warn!("Preview for {} failed: {}", camera_id, e);
                PreviewOutcome::Failed(e.to_string())
            }
        };

        let result = PreviewResult {
            camera_id: camera_id.to_string(),
            outcome,
        };
        if let Some(events) = &self.events {
            events.emit(PlayerEvent::PreviewCompleted {
                camera_id: result.camera_id.clone(),
                success: result.is_success(),
                reason: result.failure_reason().map(str::to_string),
            });
        }
        result
    }

    /// Sample every `(camera_id, url)` pair concurrently; results keep input order
    pub async fn sample_all<I, S, U>(&self, cameras: I) -> Vec<PreviewResult>
    where
        I: IntoIterator<Item = (S, U)>,
        S: AsRef<str>,
        U: AsRef<str>,
    {
        let cameras: Vec<(S, U)> = cameras.into_iter().collect();
        info!("Sampling previews for {} cameras", cameras.len());

        let results = join_all(
            cameras
                .iter()
                .map(|(camera_id, url)| self.sample(camera_id.as_ref(), url.as_ref())),
        )
        .await;

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!("Previews complete: {}/{} succeeded", succeeded, results.len());
        results
    }

    async fn capture(&self, url: &str) -> Result<Bytes> {
        let surface = self.surfaces.create_surface();
        let mut surface_events = surface.subscribe();
        let session = StreamSession::new(
            Arc::clone(&self.decoders),
            Arc::clone(&surface),
            self.options.clone(),
        );
        let _guard = SessionGuard(session.clone());

        session.start(StreamSource::live(url));
        let frame = first_frame(&session, surface.as_ref(), &mut surface_events).await?;

        let (width, height) = self.config.resolution;
        let quality = self.config.quality;
        let image = tokio::task::spawn_blocking(move || {
            encode_jpeg(&frame, quality, Some((width, height)))
        })
        .await
        .map_err(|e| PlayerError::system(format!("Preview encoder task failed: {}", e)))??;

        Ok(image)
    }
}

/// Wait until the surface holds a decodable frame or the session fails
async fn first_frame(
    session: &StreamSession,
    surface: &dyn RenderSurface,
    events: &mut broadcast::Receiver<SurfaceEvent>,
) -> Result<VideoFrame> {
    let mut status = session.subscribe_status();

    loop {
        if let Some(frame) = frame_if_ready(surface) {
            return Ok(frame);
        }
        if let SessionStatus::Error(classification) = &*status.borrow_and_update() {
            return Err(PlayerError::session(classification.clone(), None));
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    return Err(PlayerError::system("Preview session ended"));
                }
            }
            event = events.recv() => match event {
                Ok(SurfaceEvent::LoadedData | SurfaceEvent::CanPlay | SurfaceEvent::TimeUpdate) => {}
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(PlayerError::system("Preview surface closed"));
                }
            }
        }
    }
}

fn frame_if_ready(surface: &dyn RenderSurface) -> Option<VideoFrame> {
    if surface.ready_state().has_frame() {
        surface.current_frame()
    } else {
        None
    }
}
