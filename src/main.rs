use anyhow::{anyhow, Context, Result};
use camplayer::{
    export_request, CameraDirectory, PlayerConfig, RangePolicy, StaticDirectory, TimeRange,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "camplayer")]
#[command(about = "Headless HLS playback and capture engine for camera viewing clients")]
#[command(version)]
#[command(long_about = "Plays live and recorded HLS camera feeds, captures snapshots and \
recordings from the playing feed, and samples preview thumbnails for camera galleries.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "camplayer.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, global = true, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, global = true, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, global = true, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration file and exit
    ValidateConfig,
    /// Print the default configuration in TOML format
    PrintConfig,
    /// List configured cameras
    Cameras {
        /// Only cameras in this environment
        #[arg(long)]
        environment: Option<String>,
    },
    /// Check a recording search range (Unix seconds)
    CheckRange { start: i64, end: i64 },
    /// Build the DVR export request for a camera segment (Unix seconds)
    ExportUrl { camera: String, start: i64, end: i64 },
    /// Sample preview thumbnails into the download directory
    #[cfg(all(feature = "gstreamer", target_os = "linux"))]
    Preview {
        /// Camera ids; all cameras when omitted
        cameras: Vec<String>,
    },
    /// Save a snapshot of a camera's live feed
    #[cfg(all(feature = "gstreamer", target_os = "linux"))]
    Snapshot { camera: String },
    /// Record a camera's live feed for a number of seconds
    #[cfg(all(feature = "gstreamer", target_os = "linux"))]
    Record {
        camera: String,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::PrintConfig = args.command {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;
    info!("Starting camplayer v{}", env!("CARGO_PKG_VERSION"));

    let config = PlayerConfig::load_from_file(&args.config).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Command::ValidateConfig = args.command {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate().context("invalid configuration")?;
    let directory = StaticDirectory::from_config(&config.directory);

    match args.command {
        Command::ValidateConfig | Command::PrintConfig => Ok(()),
        Command::Cameras { environment } => list_cameras(&directory, environment.as_deref()).await,
        Command::CheckRange { start, end } => check_range(&config, start, end),
        Command::ExportUrl { camera, start, end } => {
            print_export_request(&config, &directory, &camera, start, end).await
        }
        #[cfg(all(feature = "gstreamer", target_os = "linux"))]
        Command::Preview { cameras } => gst_commands::preview(&config, &directory, cameras).await,
        #[cfg(all(feature = "gstreamer", target_os = "linux"))]
        Command::Snapshot { camera } => gst_commands::snapshot(&config, &directory, &camera).await,
        #[cfg(all(feature = "gstreamer", target_os = "linux"))]
        Command::Record { camera, seconds } => {
            gst_commands::record(&config, &directory, &camera, seconds).await
        }
    }
}

async fn list_cameras(directory: &StaticDirectory, environment: Option<&str>) -> Result<()> {
    let cameras = match environment {
        Some(environment) => directory.cameras_in(environment).await?,
        None => directory.cameras().await?,
    };

    if cameras.is_empty() {
        println!("No cameras configured");
    }
    for camera in cameras {
        println!(
            "{:<16} {:<24} {}",
            camera.id,
            camera.display_name(),
            camera.live_stream_url
        );
    }
    Ok(())
}

fn check_range(config: &PlayerConfig, start: i64, end: i64) -> Result<()> {
    let range = TimeRange::from_unix(start, end).ok_or_else(|| anyhow!("timestamp out of range"))?;
    let policy = RangePolicy::new(config.playback.clock_skew_tolerance());

    match policy.validate(&range) {
        Ok(()) => {
            println!("✓ {} to {} ({} minutes)", range.start, range.end, range.duration().num_minutes());
            Ok(())
        }
        Err(e) => {
            let e = camplayer::PlayerError::from(e);
            eprintln!("✗ {}", e.user_message());
            std::process::exit(1);
        }
    }
}

async fn print_export_request(
    config: &PlayerConfig,
    directory: &StaticDirectory,
    camera_id: &str,
    start: i64,
    end: i64,
) -> Result<()> {
    let base_url = config
        .directory
        .export_base_url
        .as_deref()
        .ok_or_else(|| anyhow!("directory.export_base_url is not configured"))?;
    let camera = directory
        .camera(camera_id)
        .await?
        .ok_or_else(|| anyhow!("unknown camera '{}'", camera_id))?;
    let range = TimeRange::from_unix(start, end).ok_or_else(|| anyhow!("timestamp out of range"))?;
    RangePolicy::new(config.playback.clock_skew_tolerance()).validate(&range)?;

    let request = export_request(base_url, &camera, &range)?;
    println!("{}", serde_json::to_string_pretty(&request)?);
    Ok(())
}

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
mod gst_commands {
    use anyhow::{anyhow, Result};
    use camplayer::gst::{GstDecoderFactory, GstRecorderBackend, GstSurface, GstSurfaceFactory};
    use camplayer::{
        Camera, CameraDirectory, CaptureArtifact, CaptureBridge, DirectorySink, DownloadSink,
        PlaybackController, PlayerConfig, PreviewSampler, StaticDirectory,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::warn;

    async fn find_camera(directory: &StaticDirectory, camera_id: &str) -> Result<Camera> {
        directory
            .camera(camera_id)
            .await?
            .ok_or_else(|| anyhow!("unknown camera '{}'", camera_id))
    }

    pub async fn preview(
        config: &PlayerConfig,
        directory: &StaticDirectory,
        camera_ids: Vec<String>,
    ) -> Result<()> {
        let cameras = if camera_ids.is_empty() {
            directory.cameras().await?
        } else {
            let mut cameras = Vec::new();
            for id in &camera_ids {
                cameras.push(find_camera(directory, id).await?);
            }
            cameras
        };

        let sampler = PreviewSampler::new(
            Arc::new(GstSurfaceFactory),
            Arc::new(GstDecoderFactory::new()?),
            config,
        );
        let sink = DirectorySink::from_config(&config.download);
        let results = sampler
            .sample_all(cameras.iter().map(|c| (c.id.as_str(), c.live_stream_url.as_str())))
            .await;

        for result in results {
            match result.image() {
                Some(image) => {
                    let path = sink
                        .save(&format!("preview_{}.jpg", result.camera_id), image.clone())
                        .await?;
                    println!("✓ {} -> {}", result.camera_id, path.display());
                }
                None => println!(
                    "✗ {}: {}",
                    result.camera_id,
                    result.failure_reason().unwrap_or("unknown failure")
                ),
            }
        }
        Ok(())
    }

    struct LivePlayer {
        controller: PlaybackController,
        bridge: CaptureBridge,
        camera: Camera,
    }

    async fn start_live(
        config: &PlayerConfig,
        directory: &StaticDirectory,
        camera_id: &str,
    ) -> Result<LivePlayer> {
        let camera = find_camera(directory, camera_id).await?;
        let surface = GstSurface::new();
        let recorder = Arc::new(GstRecorderBackend::new(&surface)?);
        let controller =
            PlaybackController::new(Arc::new(GstDecoderFactory::new()?), surface.clone(), config);
        let bridge = CaptureBridge::new(surface, recorder, config.capture.clone());

        controller.switch_to_live(&camera.live_stream_url).await?;
        Ok(LivePlayer {
            controller,
            bridge,
            camera,
        })
    }

    async fn save(config: &PlayerConfig, camera: &Camera, artifact: CaptureArtifact) -> Result<()> {
        let sink = DirectorySink::from_config(&config.download);
        let path = sink
            .save_artifact(
                &artifact,
                camera.display_name(),
                &config.capture.filename_timezone(),
            )
            .await?;
        println!("✓ Saved {}", path.display());
        Ok(())
    }

    pub async fn snapshot(
        config: &PlayerConfig,
        directory: &StaticDirectory,
        camera_id: &str,
    ) -> Result<()> {
        let player = start_live(config, directory, camera_id).await?;
        let snapshot = player.bridge.capture_still().await?;
        player.controller.shutdown();
        save(config, &player.camera, snapshot.into()).await
    }

    pub async fn record(
        config: &PlayerConfig,
        directory: &StaticDirectory,
        camera_id: &str,
        seconds: u64,
    ) -> Result<()> {
        let player = start_live(config, directory, camera_id).await?;
        player.bridge.start_recording()?;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, finishing recording early"),
        }

        let recording = player.bridge.stop_recording().await;
        player.controller.shutdown();
        save(config, &player.camera, recording?.into()).await
    }
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("camplayer={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_writer(std::io::stderr).boxed()
        }
    };

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("--log-file must name a file"))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# camplayer configuration file");
    println!("# Every value below is the built-in default.");
    println!("# Environment overrides use CAMPLAYER_<SECTION>__<KEY>, e.g. CAMPLAYER_PREVIEW__TIMEOUT_MS=5000");
    println!();
    println!("{}", toml::to_string_pretty(&PlayerConfig::default())?);
    Ok(())
}
