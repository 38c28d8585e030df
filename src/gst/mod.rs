//! GStreamer implementations of the media traits
//!
//! Decoding runs through `uridecodebin` into an RGB `appsink`; recording
//! pushes displayed frames through `appsrc` into a WebM muxer.

mod decoder;
mod recorder;
mod surface;

pub use decoder::{GstDecoder, GstDecoderFactory};
pub use recorder::GstRecorderBackend;
pub use surface::{GstSurface, GstSurfaceFactory, GstTrack};
