use crate::error::CaptureError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageFormat, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Pixel layout of a decoded frame exposed by a render surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed 8-bit RGBA
    Rgba32,
    /// Already JPEG compressed
    Jpeg,
}

impl PixelFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
            PixelFormat::Jpeg => 0, // Variable size, compressed
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Jpeg)
    }
}

/// The frame currently visible on a render surface
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Frame bytes (shared, cheap to clone)
    pub data: Bytes,
    /// When the frame was decoded
    pub timestamp: DateTime<Utc>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            format,
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    /// Solid-colour RGB frame, handy for placeholder surfaces and tests
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(width, height, PixelFormat::Rgb24, data)
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => !self.data.is_empty(),
        }
    }

    fn to_rgb_image(&self) -> Result<RgbImage, CaptureError> {
        if !self.validate_size() {
            return Err(CaptureError::EncodeFailure {
                details: format!(
                    "{:?} frame {}x{} has {} bytes",
                    self.format,
                    self.width,
                    self.height,
                    self.data.len()
                ),
            });
        }

        let invalid = || CaptureError::EncodeFailure {
            details: "frame buffer does not match its dimensions".to_string(),
        };

        match self.format {
            PixelFormat::Rgb24 => RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                .ok_or_else(invalid),
            PixelFormat::Rgba32 => RgbaImage::from_raw(self.width, self.height, self.data.to_vec())
                .map(|img| DynamicImage::ImageRgba8(img).to_rgb8())
                .ok_or_else(invalid),
            PixelFormat::Jpeg => image::load_from_memory_with_format(&self.data, ImageFormat::Jpeg)
                .map(|img| img.to_rgb8())
                .map_err(|e| CaptureError::EncodeFailure {
                    details: format!("Failed to decode JPEG frame: {}", e),
                }),
        }
    }
}

/// Encode a frame as JPEG, optionally scaling it to `target` dimensions
pub fn encode_jpeg(
    frame: &VideoFrame,
    quality: u8,
    target: Option<(u32, u32)>,
) -> Result<Bytes, CaptureError> {
    if frame.format == PixelFormat::Jpeg && target.is_none() && !frame.data.is_empty() {
        return Ok(frame.data.clone());
    }

    let mut rgb = frame.to_rgb_image()?;
    if let Some((width, height)) = target {
        if (width, height) != rgb.dimensions() {
            rgb = image::imageops::resize(&rgb, width, height, FilterType::Triangle);
        }
    }

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| CaptureError::EncodeFailure {
            details: e.to_string(),
        })?;

    if buf.is_empty() {
        return Err(CaptureError::EncodeFailure {
            details: "encoder produced no output".to_string(),
        });
    }

    Ok(Bytes::from(buf))
}
