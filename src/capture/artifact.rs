use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use uuid::Uuid;

pub const JPEG_MIME: &str = "image/jpeg";

/// Still image taken from the active surface
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: Uuid,
    pub image: Bytes,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// Locally recorded clip, kept as the chunks the recorder produced
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: Uuid,
    pub chunks: Vec<Bytes>,
    pub mime_type: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Recording {
    /// All chunks joined in arrival order
    pub fn data(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.byte_len());
        for chunk in &self.chunks {
            buffer.extend_from_slice(chunk);
        }
        buffer.freeze()
    }

    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn duration(&self) -> ChronoDuration {
        self.ended_at - self.started_at
    }
}

/// Output of the capture bridge
#[derive(Debug, Clone)]
pub enum CaptureArtifact {
    Snapshot(Snapshot),
    Recording(Recording),
}

impl CaptureArtifact {
    pub fn id(&self) -> Uuid {
        match self {
            CaptureArtifact::Snapshot(snapshot) => snapshot.id,
            CaptureArtifact::Recording(recording) => recording.id,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            CaptureArtifact::Snapshot(snapshot) => &snapshot.mime_type,
            CaptureArtifact::Recording(recording) => &recording.mime_type,
        }
    }

    pub fn data(&self) -> Bytes {
        match self {
            CaptureArtifact::Snapshot(snapshot) => snapshot.image.clone(),
            CaptureArtifact::Recording(recording) => recording.data(),
        }
    }

    /// Moment the artifact was completed
    pub fn completed_at(&self) -> DateTime<Utc> {
        match self {
            CaptureArtifact::Snapshot(snapshot) => snapshot.captured_at,
            CaptureArtifact::Recording(recording) => recording.ended_at,
        }
    }

    /// Suggested download name, e.g. `snapshot_Front_Door_20240105_142233.jpg`
    pub fn suggested_filename(&self, camera_name: &str, timezone: &Tz) -> String {
        let prefix = match self {
            CaptureArtifact::Snapshot(_) => "snapshot",
            CaptureArtifact::Recording(_) => "recording",
        };
        let timestamp = self
            .completed_at()
            .with_timezone(timezone)
            .format("%Y%m%d_%H%M%S");

        format!(
            "{}_{}_{}.{}",
            prefix,
            filename_safe(camera_name),
            timestamp,
            extension_for(self.mime_type())
        )
    }

    pub fn metadata(&self, camera_name: &str) -> ArtifactMetadata {
        let (kind, started_at, chunks) = match self {
            CaptureArtifact::Snapshot(snapshot) => ("snapshot", snapshot.captured_at, None),
            CaptureArtifact::Recording(recording) => (
                "recording",
                recording.started_at,
                Some(recording.chunk_count()),
            ),
        };
        ArtifactMetadata {
            id: self.id().to_string(),
            kind,
            camera: camera_name.to_string(),
            mime_type: self.mime_type().to_string(),
            bytes: match self {
                CaptureArtifact::Snapshot(snapshot) => snapshot.image.len(),
                CaptureArtifact::Recording(recording) => recording.byte_len(),
            },
            chunks,
            started_at,
            completed_at: self.completed_at(),
        }
    }
}

impl From<Snapshot> for CaptureArtifact {
    fn from(snapshot: Snapshot) -> Self {
        CaptureArtifact::Snapshot(snapshot)
    }
}

impl From<Recording> for CaptureArtifact {
    fn from(recording: Recording) -> Self {
        CaptureArtifact::Recording(recording)
    }
}

/// Sidecar description written next to saved artifacts
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactMetadata {
    pub id: String,
    pub kind: &'static str,
    pub camera: String,
    pub mime_type: String,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Camera names keep their characters; runs of whitespace become `_`
fn filename_safe(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("_")
}

/// File extension for a MIME type, ignoring codec parameters
pub fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "video/webm" => "webm",
        "video/mp4" => "mp4",
        "video/x-matroska" => "mkv",
        _ => "bin",
    }
}
