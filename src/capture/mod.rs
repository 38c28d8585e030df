mod artifact;
mod bridge;
mod negotiate;
mod tracks;
#[cfg(test)]
mod tests;

pub use artifact::{
    extension_for, ArtifactMetadata, CaptureArtifact, Recording, Snapshot, JPEG_MIME,
};
pub use bridge::CaptureBridge;
pub use negotiate::negotiate_mime;
pub use tracks::TrackGuard;
