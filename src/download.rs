use crate::capture::CaptureArtifact;
use crate::config::DownloadConfig;
use crate::error::{PlayerError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Destination for finished artifacts and exported segments
#[async_trait]
pub trait DownloadSink: Send + Sync {
    /// Persist `data` under `filename`; returns where it ended up
    async fn save(&self, filename: &str, data: Bytes) -> Result<PathBuf>;

    /// Persist an artifact under its suggested filename
    async fn save_artifact(
        &self,
        artifact: &CaptureArtifact,
        camera_name: &str,
        timezone: &Tz,
    ) -> Result<PathBuf> {
        let filename = artifact.suggested_filename(camera_name, timezone);
        self.save(&filename, artifact.data()).await
    }
}

/// Writes artifacts into a local directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    save_metadata: bool,
}

impl DirectorySink {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            save_metadata: false,
        }
    }

    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            root: PathBuf::from(&config.path),
            save_metadata: config.save_metadata,
        }
    }

    pub fn with_metadata(mut self, enabled: bool) -> Self {
        self.save_metadata = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            PlayerError::system(format!(
                "Failed to create download directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl DownloadSink for DirectorySink {
    async fn save(&self, filename: &str, data: Bytes) -> Result<PathBuf> {
        self.ensure_root().await?;

        let path = self.root.join(safe_filename(filename));
        fs::write(&path, &data).await.map_err(|e| {
            PlayerError::system(format!("Failed to write {}: {}", path.display(), e))
        })?;

        info!("Saved {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }

    async fn save_artifact(
        &self,
        artifact: &CaptureArtifact,
        camera_name: &str,
        timezone: &Tz,
    ) -> Result<PathBuf> {
        let filename = artifact.suggested_filename(camera_name, timezone);
        let path = self.save(&filename, artifact.data()).await?;

        if self.save_metadata {
            let metadata = serde_json::to_string_pretty(&artifact.metadata(camera_name))
                .map_err(|e| PlayerError::system(format!("Failed to serialize metadata: {}", e)))?;
            let metadata_path = path.with_extension(format!(
                "{}.json",
                path.extension().and_then(|ext| ext.to_str()).unwrap_or("bin")
            ));
            fs::write(&metadata_path, metadata).await.map_err(|e| {
                PlayerError::system(format!("Failed to write metadata file: {}", e))
            })?;
            debug!("Saved metadata to {}", metadata_path.display());
        }

        Ok(path)
    }
}

/// Keep only the final path component and strip separators
fn safe_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "download.bin".to_string()
    } else {
        trimmed.to_string()
    }
}
