use std::time::Duration;
use thiserror::Error;

/// Machine-distinguishable failure category for UI consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    Network,
    ManifestLoad,
    MediaDecode,
    Unsupported,
    Capture,
    Timeout,
    Lookup,
    Configuration,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Network => "network",
            ErrorCategory::ManifestLoad => "manifest_load",
            ErrorCategory::MediaDecode => "media_decode",
            ErrorCategory::Unsupported => "unsupported",
            ErrorCategory::Capture => "capture",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Lookup => "lookup",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Whether a decoder error ends the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Recoverable,
}

/// Category of a session-level decoder failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorCategory {
    Network,
    MediaDecode,
    ManifestLoad,
    Unsupported,
}

/// Classification attached to every decoder error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub severity: Severity,
    pub category: SessionErrorCategory,
    pub detail: String,
}

impl ErrorClassification {
    pub fn fatal<S: Into<String>>(category: SessionErrorCategory, detail: S) -> Self {
        Self {
            severity: Severity::Fatal,
            category,
            detail: detail.into(),
        }
    }

    pub fn recoverable<S: Into<String>>(category: SessionErrorCategory, detail: S) -> Self {
        Self {
            severity: Severity::Recoverable,
            category,
            detail: detail.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// Short text suitable for an error overlay
    pub fn user_message(&self) -> String {
        match self.category {
            SessionErrorCategory::Network => {
                format!("Network error ({}). Check connection.", self.detail)
            }
            SessionErrorCategory::ManifestLoad => {
                format!("Could not load video data ({}).", self.detail)
            }
            SessionErrorCategory::MediaDecode => {
                format!("Media playback error ({}).", self.detail)
            }
            SessionErrorCategory::Unsupported => "Video format not supported.".to_string(),
        }
    }
}

impl std::fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {:?}: {}", self.severity, self.category, self.detail)
    }
}

/// Bad time range requested by the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Range end ({end}) must be after range start ({start})")]
    EmptyRange { start: i64, end: i64 },

    #[error("Range bound {bound} is in the future (now {now}, tolerance {tolerance_secs}s)")]
    FutureBound {
        bound: i64,
        now: i64,
        tolerance_secs: i64,
    },

    #[error("Invalid stream url: {url}")]
    InvalidUrl { url: String },
}

/// Fatal decoder failure surfaced by a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Session error: {classification}")]
pub struct SessionError {
    pub classification: ErrorClassification,
}

/// Failures of snapshot and recording operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("No decoded frame is available yet")]
    NotReady,

    #[error("Failed to encode captured frame: {details}")]
    EncodeFailure { details: String },

    #[error("No capturable stream is available")]
    NoStream,

    #[error("Capture stream has no tracks")]
    IncompatibleStream,

    #[error("None of the preferred recording formats are supported: {tried:?}")]
    UnsupportedFormat { tried: Vec<String> },

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No recording is in progress")]
    NotRecording,

    #[error("Recording produced no data")]
    NoData,

    #[error("Recorder failed: {details}")]
    Recorder { details: String },
}

/// A preview or capture deadline elapsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} timed out after {deadline:?}")]
pub struct TimeoutError {
    pub operation: String,
    pub deadline: Duration,
}

impl TimeoutError {
    pub fn new<S: Into<String>>(operation: S, deadline: Duration) -> Self {
        Self {
            operation: operation.into(),
            deadline,
        }
    }
}

/// Failures reported by media backends (decoders, surfaces, recorders)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Render surface is attached to session {owner}")]
    SurfaceBusy { owner: u64 },

    #[error("Unsupported: {details}")]
    Unsupported { details: String },

    #[error("Backend error: {details}")]
    Backend { details: String },
}

impl MediaError {
    pub fn backend<S: Into<String>>(details: S) -> Self {
        Self::Backend {
            details: details.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(details: S) -> Self {
        Self::Unsupported {
            details: details.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{source}")]
    Session {
        source: SessionError,
        /// Url playback was reverted to after the failure, if any
        reverted_to: Option<String>,
    },

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Timeout: {0}")]
    Timeout(#[from] TimeoutError),

    #[error("Media backend error: {0}")]
    Media(#[from] MediaError),

    #[error("Recording lookup failed for camera {camera_id}: {details}")]
    Lookup { camera_id: String, details: String },

    #[error("Source switch superseded by a newer request")]
    Superseded,

    #[error("System error: {message}")]
    System { message: String },
}

impl PlayerError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn lookup<S: Into<String>>(camera_id: S, details: S) -> Self {
        Self::Lookup {
            camera_id: camera_id.into(),
            details: details.into(),
        }
    }

    pub fn session(classification: ErrorClassification, reverted_to: Option<String>) -> Self {
        Self::Session {
            source: SessionError { classification },
            reverted_to,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PlayerError::Config(_) | PlayerError::Serialization(_) => ErrorCategory::Configuration,
            PlayerError::Io(_) | PlayerError::System { .. } | PlayerError::Superseded => {
                ErrorCategory::Internal
            }
            PlayerError::Validation(_) => ErrorCategory::Validation,
            PlayerError::Session { source, .. } => match source.classification.category {
                SessionErrorCategory::Network => ErrorCategory::Network,
                SessionErrorCategory::ManifestLoad => ErrorCategory::ManifestLoad,
                SessionErrorCategory::MediaDecode => ErrorCategory::MediaDecode,
                SessionErrorCategory::Unsupported => ErrorCategory::Unsupported,
            },
            PlayerError::Capture(CaptureError::UnsupportedFormat { .. }) => {
                ErrorCategory::Unsupported
            }
            PlayerError::Capture(_) => ErrorCategory::Capture,
            PlayerError::Timeout(_) => ErrorCategory::Timeout,
            PlayerError::Media(MediaError::Unsupported { .. }) => ErrorCategory::Unsupported,
            PlayerError::Media(_) => ErrorCategory::Internal,
            PlayerError::Lookup { .. } => ErrorCategory::Lookup,
        }
    }

    /// Short human-readable message for toasts and overlays
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Validation(ValidationError::EmptyRange { .. }) => {
                "The end time must be after the start time.".to_string()
            }
            PlayerError::Validation(ValidationError::FutureBound { .. }) => {
                "Cannot search for recordings in the future.".to_string()
            }
            PlayerError::Validation(ValidationError::InvalidUrl { .. }) => {
                "The stream address is not valid.".to_string()
            }
            PlayerError::Session {
                source,
                reverted_to,
            } => {
                let message = source.classification.user_message();
                if reverted_to.is_some() {
                    format!("{} Reverted to the previous feed.", message)
                } else {
                    message
                }
            }
            PlayerError::Capture(CaptureError::NotReady) => {
                "Video is not ready or unavailable.".to_string()
            }
            PlayerError::Capture(CaptureError::EncodeFailure { .. }) => {
                "Could not capture snapshot.".to_string()
            }
            PlayerError::Capture(CaptureError::NoStream) => {
                "Failed to capture the video stream.".to_string()
            }
            PlayerError::Capture(CaptureError::IncompatibleStream) => {
                "The stream might be protected or incompatible for recording.".to_string()
            }
            PlayerError::Capture(CaptureError::UnsupportedFormat { .. }) => {
                "No supported video format found for recording.".to_string()
            }
            PlayerError::Capture(CaptureError::AlreadyRecording) => {
                "A recording is already in progress.".to_string()
            }
            PlayerError::Capture(CaptureError::NotRecording) => {
                "Recording is not currently active.".to_string()
            }
            PlayerError::Capture(CaptureError::NoData) => {
                "No video data was recorded.".to_string()
            }
            PlayerError::Capture(CaptureError::Recorder { .. }) => {
                "An error occurred during recording.".to_string()
            }
            PlayerError::Timeout(_) => "The operation timed out.".to_string(),
            PlayerError::Lookup { .. } => "Failed to find recording.".to_string(),
            PlayerError::Media(MediaError::Unsupported { .. }) => {
                "Video format not supported.".to_string()
            }
            PlayerError::Superseded => "Another source was selected.".to_string(),
            PlayerError::Config(_) | PlayerError::Serialization(_) => {
                "Invalid configuration.".to_string()
            }
            PlayerError::Io(_) | PlayerError::Media(_) | PlayerError::System { .. } => {
                "An unexpected error occurred.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
