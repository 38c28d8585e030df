mod decoder;
pub mod mock;
mod recorder;
mod surface;

pub use decoder::{
    Decoder, DecoderError, DecoderErrorKind, DecoderEvent, DecoderFactory, DecoderTuning,
    ErrorDetails, RetryPolicy, HLS_MIME,
};
pub use recorder::{
    CaptureStream, ChunkRecorder, MediaTrack, RecorderBackend, RecorderEvent, TrackKind,
};
pub use surface::{ReadyState, RenderSurface, SessionId, SurfaceEvent, SurfaceFactory};
