use crate::error::CaptureError;
use crate::media::RecorderBackend;
use tracing::debug;

/// First entry of `preferences` the recorder can produce
pub fn negotiate_mime(
    preferences: &[String],
    recorder: &dyn RecorderBackend,
) -> Result<String, CaptureError> {
    for mime in preferences {
        if recorder.is_type_supported(mime) {
            debug!("Recording as {}", mime);
            return Ok(mime.clone());
        }
        debug!("Recorder does not support {}", mime);
    }

    Err(CaptureError::UnsupportedFormat {
        tried: preferences.to_vec(),
    })
}
