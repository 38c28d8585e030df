pub mod capture;
pub mod config;
pub mod directory;
pub mod download;
pub mod error;
pub mod events;
pub mod frame;
pub mod media;
pub mod playback;
pub mod preview;
pub mod session;
pub mod source;

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub mod gst;

pub use capture::{CaptureArtifact, CaptureBridge, Recording, Snapshot};
pub use config::PlayerConfig;
pub use directory::{
    export_request, Camera, CameraDirectory, Environment, ExportRequest, RecordingLookup,
    StaticDirectory, StaticRecordingLookup,
};
pub use download::{DirectorySink, DownloadSink};
pub use error::{
    CaptureError, ErrorCategory, ErrorClassification, PlayerError, Result, TimeoutError,
    ValidationError,
};
pub use events::{EventBus, EventFilter, EventReceiver, PlayerEvent};
pub use frame::{PixelFormat, VideoFrame};
pub use playback::{PlaybackController, Selection};
pub use preview::{PreviewOutcome, PreviewResult, PreviewSampler};
pub use session::{SessionOptions, SessionStatus, StreamSession};
pub use source::{RangePolicy, SourceKind, StreamSource, TimeRange};
