//! Thumbnail sampling for camera galleries

mod sampler;
#[cfg(test)]
mod tests;

pub use sampler::{PreviewOutcome, PreviewResult, PreviewSampler};
