use crate::error::MediaError;
use crate::frame::VideoFrame;
use super::recorder::CaptureStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Identifies the session that currently owns a surface
pub type SessionId = u64;

/// How much decoded media the surface holds, ordered like HTML media ready states
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

impl ReadyState {
    /// At least one decoded frame is available
    pub fn has_frame(&self) -> bool {
        *self >= ReadyState::HaveCurrentData
    }
}

/// Playback lifecycle signals emitted by a surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    LoadedMetadata,
    LoadedData,
    CanPlay,
    Playing,
    TimeUpdate,
    Waiting,
    Ended,
    Error { code: u16, message: String },
}

/// Something frames are decoded onto and displayed from
///
/// Exactly one session may be attached at a time; `attach` fails with
/// `MediaError::SurfaceBusy` otherwise. `detach` resets playback state and
/// releases any stream previously handed out by `capture_stream`.
pub trait RenderSurface: Send + Sync {
    fn attach(&self, owner: SessionId) -> Result<(), MediaError>;
    fn detach(&self, owner: SessionId);
    fn owner(&self) -> Option<SessionId>;

    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent>;
    fn ready_state(&self) -> ReadyState;
    fn current_frame(&self) -> Option<VideoFrame>;

    /// Whether the surface plays `mime` itself, without a decoder
    fn can_play_natively(&self, _mime: &str) -> bool {
        false
    }

    fn load_native(&self, _url: &str) -> Result<(), MediaError> {
        Err(MediaError::unsupported("native playback"))
    }

    /// Decoder side: display a newly decoded frame
    fn present_frame(&self, frame: VideoFrame);

    /// Decoder side: raise a playback signal to subscribers
    fn signal(&self, event: SurfaceEvent);

    fn play(&self) -> Result<(), MediaError>;
    fn pause(&self);
    fn seek(&self, position: Duration) -> Result<(), MediaError>;

    /// Whether `capture_stream` can ever succeed on this surface
    fn supports_capture_stream(&self) -> bool;

    /// Live handle to the decoded output, `None` when nothing is playing
    fn capture_stream(&self) -> Option<Arc<dyn CaptureStream>>;
}

/// Builds private surfaces for head-less work such as preview sampling
pub trait SurfaceFactory: Send + Sync {
    fn create_surface(&self) -> Arc<dyn RenderSurface>;
}
