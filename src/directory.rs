//! Camera directory and recording lookup.
//!
//! The player only needs read access to cameras and a way to turn a camera
//! plus a time range into a manifest url. Both are traits so a remote
//! service can stand in for the config-backed implementations here.

use crate::config::DirectoryConfig;
use crate::error::{PlayerError, Result};
use crate::source::{validate_url, TimeRange};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub description: String,
    pub live_stream_url: String,
    pub environment_id: Option<String>,
}

impl Camera {
    /// Name for display and filenames, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Read access to cameras and the environments grouping them
#[async_trait]
pub trait CameraDirectory: Send + Sync {
    async fn environments(&self) -> Result<Vec<Environment>>;

    async fn cameras(&self) -> Result<Vec<Camera>>;

    async fn camera(&self, id: &str) -> Result<Option<Camera>> {
        Ok(self.cameras().await?.into_iter().find(|camera| camera.id == id))
    }

    async fn cameras_in(&self, environment_id: &str) -> Result<Vec<Camera>> {
        Ok(self
            .cameras()
            .await?
            .into_iter()
            .filter(|camera| camera.environment_id.as_deref() == Some(environment_id))
            .collect())
    }
}

/// Resolves a camera and time range to a recording manifest url
///
/// The range is checked client-side before this is called; the contract
/// of the remote service beyond that is opaque.
#[async_trait]
pub trait RecordingLookup: Send + Sync {
    async fn resolve(&self, camera_id: &str, range: &TimeRange) -> Result<String>;
}

/// Directory backed by the `[directory]` config section
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    environments: Vec<Environment>,
    cameras: Vec<Camera>,
}

impl StaticDirectory {
    pub fn new(environments: Vec<Environment>, cameras: Vec<Camera>) -> Self {
        Self {
            environments,
            cameras,
        }
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        let environments = config
            .environments
            .iter()
            .map(|entry| Environment {
                id: entry.id.clone(),
                name: entry.name.clone(),
                description: entry.description.clone(),
            })
            .collect();
        let cameras = config
            .cameras
            .iter()
            .map(|entry| Camera {
                id: entry.id.clone(),
                name: entry.name.clone(),
                description: entry.description.clone(),
                live_stream_url: entry.live_stream_url.clone(),
                environment_id: entry.environment_id.clone(),
            })
            .collect();

        let directory = Self::new(environments, cameras);
        info!(
            "Loaded {} cameras in {} environments",
            directory.cameras.len(),
            directory.environments.len()
        );
        directory
    }
}

#[async_trait]
impl CameraDirectory for StaticDirectory {
    async fn environments(&self) -> Result<Vec<Environment>> {
        Ok(self.environments.clone())
    }

    async fn cameras(&self) -> Result<Vec<Camera>> {
        Ok(self.cameras.clone())
    }
}

/// Lookup that fills a url template with `{camera}`, `{start}` and `{end}`
#[derive(Debug, Clone)]
pub struct StaticRecordingLookup {
    template: String,
}

impl StaticRecordingLookup {
    pub fn new<S: Into<String>>(template: S) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn from_config(config: &DirectoryConfig) -> Option<Self> {
        config.recording_url_template.as_deref().map(Self::new)
    }
}

#[async_trait]
impl RecordingLookup for StaticRecordingLookup {
    async fn resolve(&self, camera_id: &str, range: &TimeRange) -> Result<String> {
        let url = self
            .template
            .replace("{camera}", camera_id)
            .replace("{start}", &range.start_unix().to_string())
            .replace("{end}", &range.end_unix().to_string());

        validate_url(&url).map_err(|e| PlayerError::lookup(camera_id.to_string(), e.to_string()))?;
        debug!("Resolved recording for {} to {}", camera_id, url);
        Ok(url)
    }
}

/// Download request for an exported recording segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRequest {
    pub url: String,
    pub filename: String,
}

/// Build the export url and suggested filename for a segment of `camera`
pub fn export_request(base_url: &str, camera: &Camera, range: &TimeRange) -> Result<ExportRequest> {
    validate_url(base_url)?;

    let start = range.start_unix();
    let end = range.end_unix();
    let separator = if base_url.contains('?') { '&' } else { '?' };

    Ok(ExportRequest {
        url: format!("{}{}start={}&end={}", base_url, separator, start, end),
        filename: format!(
            "segment_{}_{}_{}.mp4",
            sanitize_segment_name(camera.display_name()),
            start,
            end
        ),
    })
}

fn sanitize_segment_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
