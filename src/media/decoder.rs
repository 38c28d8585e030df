use crate::error::MediaError;
use super::surface::RenderSurface;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// MIME type used to ask a surface whether it plays HLS without a decoder
pub const HLS_MIME: &str = "application/vnd.apple.mpegurl";

/// Retry budget for one loading stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            max_retries,
            retry_delay_ms,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Buffer windows and retry budgets handed to a decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderTuning {
    /// Start position in seconds; negative means the live edge
    pub start_position: f64,
    /// Target forward buffer in seconds
    pub max_buffer_length: f64,
    /// Hard ceiling on the forward buffer in seconds
    pub max_max_buffer_length: f64,
    /// Back buffer kept behind the playhead in seconds
    pub back_buffer_length: f64,
    /// Largest gap in seconds the decoder jumps over
    pub max_buffer_hole: f64,
    pub manifest_retry: RetryPolicy,
    pub level_retry: RetryPolicy,
    pub fragment_retry: RetryPolicy,
    pub fragment_timeout_ms: u64,
    pub low_latency: bool,
    pub enable_worker: bool,
}

impl DecoderTuning {
    /// Settings for the main player
    pub fn playback() -> Self {
        Self {
            start_position: -1.0,
            max_buffer_length: 30.0,
            max_max_buffer_length: 600.0,
            back_buffer_length: 60.0,
            max_buffer_hole: 0.8,
            manifest_retry: RetryPolicy::new(2, 500),
            level_retry: RetryPolicy::new(2, 500),
            fragment_retry: RetryPolicy::new(3, 1000),
            fragment_timeout_ms: 10_000,
            low_latency: true,
            enable_worker: true,
        }
    }

    /// Minimal footprint settings for thumbnail sampling
    pub fn preview() -> Self {
        Self {
            start_position: 0.0,
            max_buffer_length: 5.0,
            max_max_buffer_length: 10.0,
            back_buffer_length: 0.0,
            max_buffer_hole: 0.8,
            manifest_retry: RetryPolicy::new(1, 500),
            level_retry: RetryPolicy::new(1, 500),
            fragment_retry: RetryPolicy::new(1, 1000),
            fragment_timeout_ms: 5_000,
            low_latency: false,
            enable_worker: true,
        }
    }

    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_millis(self.fragment_timeout_ms)
    }

    pub fn starts_at_live_edge(&self) -> bool {
        self.start_position < 0.0
    }
}

impl Default for DecoderTuning {
    fn default() -> Self {
        Self::playback()
    }
}

/// Broad family of a decoder error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderErrorKind {
    Network,
    Media,
    Mux,
    Other,
}

/// Specific decoder failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetails {
    ManifestLoadError,
    ManifestLoadTimeout,
    ManifestParsingError,
    ManifestIncompatibleCodecs,
    LevelLoadError,
    LevelLoadTimeout,
    FragLoadError,
    FragLoadTimeout,
    FragParsingError,
    BufferStalled,
    BufferSeekOverHole,
    BufferAppendError,
    BufferAddCodecError,
    InternalException,
    Other(String),
}

impl ErrorDetails {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorDetails::ManifestLoadError => "manifestLoadError",
            ErrorDetails::ManifestLoadTimeout => "manifestLoadTimeOut",
            ErrorDetails::ManifestParsingError => "manifestParsingError",
            ErrorDetails::ManifestIncompatibleCodecs => "manifestIncompatibleCodecsError",
            ErrorDetails::LevelLoadError => "levelLoadError",
            ErrorDetails::LevelLoadTimeout => "levelLoadTimeOut",
            ErrorDetails::FragLoadError => "fragLoadError",
            ErrorDetails::FragLoadTimeout => "fragLoadTimeOut",
            ErrorDetails::FragParsingError => "fragParsingError",
            ErrorDetails::BufferStalled => "bufferStalledError",
            ErrorDetails::BufferSeekOverHole => "bufferSeekOverHole",
            ErrorDetails::BufferAppendError => "bufferAppendError",
            ErrorDetails::BufferAddCodecError => "bufferAddCodecError",
            ErrorDetails::InternalException => "internalException",
            ErrorDetails::Other(details) => details,
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a decoder; `fatal` means the decoder gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderError {
    pub kind: DecoderErrorKind,
    pub details: ErrorDetails,
    pub fatal: bool,
    pub message: String,
}

impl DecoderError {
    pub fn new(kind: DecoderErrorKind, details: ErrorDetails, fatal: bool) -> Self {
        let message = details.to_string();
        Self {
            kind,
            details,
            fatal,
            message,
        }
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = message.into();
        self
    }
}

/// Lifecycle events emitted by a decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    /// The decoder is bound to the surface and ready for a source
    MediaAttached,
    /// Manifest loaded and parsed; `levels` quality variants available
    ManifestParsed { levels: usize },
    /// A fragment was appended to the surface buffer
    FragmentBuffered { sequence: u64 },
    Error(DecoderError),
}

/// One adaptive-stream decode pipeline
///
/// The calling session drives it in this order: `attach_media`, wait for
/// `MediaAttached`, `load_source`. Teardown is `stop_load`, `detach_media`,
/// `destroy`; implementations must tolerate repeated teardown calls.
pub trait Decoder: Send + Sync {
    fn attach_media(&self, surface: Arc<dyn RenderSurface>) -> Result<(), MediaError>;
    fn load_source(&self, url: &str) -> Result<(), MediaError>;
    /// Resume or re-request fragment loading
    fn start_load(&self);
    fn stop_load(&self);
    fn recover_media_error(&self);
    fn swap_audio_codec(&self);
    fn detach_media(&self);
    fn destroy(&self);
}

/// Creates decoders; one per session start
pub trait DecoderFactory: Send + Sync {
    /// Whether this runtime can decode adaptive streams at all
    fn is_supported(&self) -> bool;

    fn create(
        &self,
        tuning: &DecoderTuning,
    ) -> Result<(Arc<dyn Decoder>, mpsc::UnboundedReceiver<DecoderEvent>), MediaError>;
}
