use crate::media::DecoderTuning;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PlayerConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub decoder: DecoderTuning,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Start playing as soon as a session becomes ready
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,

    /// Deadline for a session to leave Initializing, in milliseconds
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,

    /// How far into the future a range bound may reach, in seconds
    #[serde(default = "default_clock_skew_tolerance_secs")]
    pub clock_skew_tolerance_secs: u64,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Budget for in-session recovery of fatal decoder errors
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Recovery attempts per session before the error is treated as fatal
    #[serde(default = "default_recovery_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds; doubles per attempt
    #[serde(default = "default_recovery_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_recovery_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CaptureConfig {
    /// JPEG quality for snapshots (1-100)
    #[serde(default = "default_snapshot_quality")]
    pub snapshot_quality: u8,

    /// Recorder chunk interval in milliseconds
    #[serde(default = "default_recording_timeslice_ms")]
    pub recording_timeslice_ms: u64,

    /// How long stop waits for the final chunk, in milliseconds
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Recording formats in order of preference
    #[serde(default = "default_mime_preferences")]
    pub mime_preferences: Vec<String>,

    /// Timezone used for timestamps in suggested filenames
    #[serde(default = "default_filename_timezone")]
    pub filename_timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PreviewConfig {
    /// Thumbnail size (width, height)
    #[serde(default = "default_preview_resolution")]
    pub resolution: (u32, u32),

    #[serde(default = "default_preview_quality")]
    pub quality: u8,

    /// Absolute deadline for one sample, in milliseconds
    #[serde(default = "default_preview_timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound on concurrent samples; unbounded when absent
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    #[serde(default = "DecoderTuning::preview")]
    pub decoder: DecoderTuning,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub environments: Vec<EnvironmentEntry>,

    #[serde(default)]
    pub cameras: Vec<CameraEntry>,

    /// Manifest url for recordings with `{camera}`, `{start}` and `{end}` placeholders
    #[serde(default)]
    pub recording_url_template: Option<String>,

    /// Base url of the segment export service
    #[serde(default)]
    pub export_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EnvironmentEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub live_stream_url: String,
    #[serde(default)]
    pub environment_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DownloadConfig {
    /// Directory artifacts are written to
    #[serde(default = "default_download_path")]
    pub path: String,

    /// Write a JSON sidecar describing each saved artifact
    #[serde(default = "default_save_metadata")]
    pub save_metadata: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl PlayerConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("camplayer.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables use the `CAMPLAYER_` prefix and `__` between
    /// nested keys, e.g. `CAMPLAYER_PREVIEW__TIMEOUT_MS=5000`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("playback.autoplay", default_autoplay())?
            .set_default("playback.init_timeout_ms", default_init_timeout_ms())?
            .set_default(
                "playback.clock_skew_tolerance_secs",
                default_clock_skew_tolerance_secs(),
            )?
            .set_default(
                "playback.recovery.max_attempts",
                default_recovery_max_attempts(),
            )?
            .set_default(
                "playback.recovery.base_delay_ms",
                default_recovery_base_delay_ms(),
            )?
            .set_default(
                "playback.recovery.max_delay_ms",
                default_recovery_max_delay_ms(),
            )?
            .set_default("capture.snapshot_quality", default_snapshot_quality() as i64)?
            .set_default(
                "capture.recording_timeslice_ms",
                default_recording_timeslice_ms(),
            )?
            .set_default("capture.stop_timeout_ms", default_stop_timeout_ms())?
            .set_default("capture.mime_preferences", default_mime_preferences())?
            .set_default("capture.filename_timezone", default_filename_timezone())?
            .set_default(
                "preview.resolution",
                vec![default_preview_resolution().0, default_preview_resolution().1],
            )?
            .set_default("preview.quality", default_preview_quality() as i64)?
            .set_default("preview.timeout_ms", default_preview_timeout_ms())?
            .set_default("download.path", default_download_path())?
            .set_default("download.save_metadata", default_save_metadata())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("CAMPLAYER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("capture.mime_preferences")
                    .try_parsing(true),
            )
            .build()?;

        let config: PlayerConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.playback.init_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Playback init_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.playback.recovery.base_delay_ms > self.playback.recovery.max_delay_ms {
            return Err(ConfigError::Message(
                "Recovery base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }

        validate_quality("capture.snapshot_quality", self.capture.snapshot_quality)?;
        validate_quality("preview.quality", self.preview.quality)?;

        if self.capture.recording_timeslice_ms == 0 {
            return Err(ConfigError::Message(
                "Capture recording_timeslice_ms must be greater than 0".to_string(),
            ));
        }

        if self.capture.mime_preferences.is_empty() {
            return Err(ConfigError::Message(
                "Capture mime_preferences must list at least one format".to_string(),
            ));
        }

        if self
            .capture
            .filename_timezone
            .parse::<Tz>()
            .is_err()
        {
            return Err(ConfigError::Message(format!(
                "Unknown capture filename_timezone '{}'",
                self.capture.filename_timezone
            )));
        }

        if self.preview.resolution.0 == 0 || self.preview.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Preview resolution must be greater than 0".to_string(),
            ));
        }

        if self.preview.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Preview timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.preview.max_concurrent == Some(0) {
            return Err(ConfigError::Message(
                "Preview max_concurrent must be greater than 0 when set".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for camera in &self.directory.cameras {
            if !seen.insert(camera.id.as_str()) {
                return Err(ConfigError::Message(format!(
                    "Duplicate camera id '{}'",
                    camera.id
                )));
            }
            if camera.live_stream_url.trim().is_empty() {
                return Err(ConfigError::Message(format!(
                    "Camera '{}' has no live_stream_url",
                    camera.id
                )));
            }
            if let Some(env_id) = &camera.environment_id {
                if !self.directory.environments.iter().any(|e| &e.id == env_id) {
                    return Err(ConfigError::Message(format!(
                        "Camera '{}' references unknown environment '{}'",
                        camera.id, env_id
                    )));
                }
            }
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_quality(key: &str, quality: u8) -> Result<(), ConfigError> {
    if quality == 0 || quality > 100 {
        return Err(ConfigError::Message(format!(
            "{} must be between 1 and 100",
            key
        )));
    }
    Ok(())
}

impl PlaybackConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn clock_skew_tolerance(&self) -> Duration {
        Duration::from_secs(self.clock_skew_tolerance_secs)
    }
}

impl RecoveryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl CaptureConfig {
    pub fn recording_timeslice(&self) -> Duration {
        Duration::from_millis(self.recording_timeslice_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Zone for artifact filenames, falling back to UTC on parse errors
    pub fn filename_timezone(&self) -> Tz {
        match self.filename_timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(
                    "Invalid filename timezone '{}', falling back to UTC",
                    self.filename_timezone
                );
                chrono_tz::UTC
            }
        }
    }
}

impl PreviewConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            autoplay: default_autoplay(),
            init_timeout_ms: default_init_timeout_ms(),
            clock_skew_tolerance_secs: default_clock_skew_tolerance_secs(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_recovery_max_attempts(),
            base_delay_ms: default_recovery_base_delay_ms(),
            max_delay_ms: default_recovery_max_delay_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snapshot_quality: default_snapshot_quality(),
            recording_timeslice_ms: default_recording_timeslice_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            mime_preferences: default_mime_preferences(),
            filename_timezone: default_filename_timezone(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            resolution: default_preview_resolution(),
            quality: default_preview_quality(),
            timeout_ms: default_preview_timeout_ms(),
            max_concurrent: None,
            decoder: DecoderTuning::preview(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            path: default_download_path(),
            save_metadata: default_save_metadata(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig::default(),
            decoder: DecoderTuning::playback(),
            capture: CaptureConfig::default(),
            preview: PreviewConfig::default(),
            directory: DirectoryConfig::default(),
            download: DownloadConfig::default(),
            system: SystemConfig::default(),
        }
    }
}

// Default value functions
fn default_autoplay() -> bool {
    true
}
fn default_init_timeout_ms() -> u64 {
    15_000
}
fn default_clock_skew_tolerance_secs() -> u64 {
    300
}

fn default_recovery_max_attempts() -> u32 {
    3
}
fn default_recovery_base_delay_ms() -> u64 {
    500
}
fn default_recovery_max_delay_ms() -> u64 {
    8_000
}

fn default_snapshot_quality() -> u8 {
    90
}
fn default_recording_timeslice_ms() -> u64 {
    1_000
}
fn default_stop_timeout_ms() -> u64 {
    5_000
}
fn default_mime_preferences() -> Vec<String> {
    vec![
        "video/webm;codecs=vp9".to_string(),
        "video/webm;codecs=vp8".to_string(),
        "video/webm".to_string(),
    ]
}
fn default_filename_timezone() -> String {
    "UTC".to_string()
}

fn default_preview_resolution() -> (u32, u32) {
    (300, 200)
}
fn default_preview_quality() -> u8 {
    80
}
fn default_preview_timeout_ms() -> u64 {
    8_000
}

fn default_download_path() -> String {
    "./downloads".to_string()
}
fn default_save_metadata() -> bool {
    false
}

fn default_event_bus_capacity() -> usize {
    100
}
