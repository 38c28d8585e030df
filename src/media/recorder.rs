use crate::error::MediaError;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One live decode output; stopping it releases decoder resources
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn stop(&self);
    fn is_stopped(&self) -> bool;
}

/// Capturable stream derived from a playing surface
pub trait CaptureStream: Send + Sync {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    fn is_active(&self) -> bool {
        self.tracks().iter().any(|track| !track.is_stopped())
    }
}

/// Output of a running chunk recorder
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// One timeslice worth of encoded data (may be empty)
    Data(Bytes),
    Error(String),
    /// Final event after `stop`; all data has been delivered
    Stopped,
}

/// Handle to a running recorder
pub trait ChunkRecorder: Send + Sync {
    /// Request a final flush; `RecorderEvent::Stopped` follows the last chunk
    fn stop(&self);
}

/// Encodes a capture stream into timesliced chunks
pub trait RecorderBackend: Send + Sync {
    /// Whether a recorder exists in this runtime at all
    fn is_available(&self) -> bool;

    fn is_type_supported(&self, mime: &str) -> bool;

    fn start(
        &self,
        stream: Arc<dyn CaptureStream>,
        mime: &str,
        timeslice: Duration,
    ) -> Result<(Box<dyn ChunkRecorder>, mpsc::UnboundedReceiver<RecorderEvent>), MediaError>;
}
