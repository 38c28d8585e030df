use super::surface::GstSurface;
use crate::error::MediaError;
use crate::frame::{PixelFormat, VideoFrame};
use crate::media::{CaptureStream, ChunkRecorder, RecorderBackend, RecorderEvent};
use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks, AppSrc};
use gstreamer_video::{VideoFormat, VideoInfo};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deadline for the muxer to drain after end of stream
const DRAIN_TIMEOUT_SECS: u64 = 5;

/// WebM recorder fed from the frames displayed on a `GstSurface`
pub struct GstRecorderBackend {
    frames: watch::Receiver<Option<VideoFrame>>,
}

impl GstRecorderBackend {
    pub fn new(surface: &GstSurface) -> Result<Self, MediaError> {
        gst::init()
            .map_err(|e| MediaError::backend(format!("Failed to initialize GStreamer: {}", e)))?;
        Ok(Self {
            frames: surface.subscribe_frames(),
        })
    }
}

fn encoder_for(mime: &str) -> Option<&'static str> {
    let mime = mime.to_ascii_lowercase();
    if !mime.starts_with("video/webm") {
        return None;
    }
    if mime.contains("vp9") {
        Some("vp9enc")
    } else {
        Some("vp8enc")
    }
}

impl RecorderBackend for GstRecorderBackend {
    fn is_available(&self) -> bool {
        gst::ElementFactory::find("webmmux").is_some() && gst::ElementFactory::find("appsrc").is_some()
    }

    fn is_type_supported(&self, mime: &str) -> bool {
        encoder_for(mime)
            .map(|encoder| gst::ElementFactory::find(encoder).is_some())
            .unwrap_or(false)
            && self.is_available()
    }

    fn start(
        &self,
        stream: Arc<dyn CaptureStream>,
        mime: &str,
        timeslice: Duration,
    ) -> Result<(Box<dyn ChunkRecorder>, mpsc::UnboundedReceiver<RecorderEvent>), MediaError> {
        let encoder = encoder_for(mime)
            .ok_or_else(|| MediaError::unsupported(format!("recording as {}", mime)))?;
        let first = self
            .frames
            .borrow()
            .clone()
            .ok_or_else(|| MediaError::backend("no frame to record"))?;
        if first.format != PixelFormat::Rgb24 {
            return Err(MediaError::unsupported("recording compressed frames"));
        }

        let description = format!(
            "appsrc name=src is-live=true format=time do-timestamp=true ! \
             videoconvert ! {} deadline=1 ! webmmux streamable=true ! \
             appsink name=sink sync=false",
            encoder
        );
        info!("Creating recording pipeline: {}", description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| MediaError::backend(format!("Failed to create pipeline: {}", e)))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| MediaError::backend("Failed to downcast to Pipeline"))?;

        let src = pipeline
            .by_name("src")
            .and_then(|element| element.downcast::<AppSrc>().ok())
            .ok_or_else(|| MediaError::backend("Pipeline has no appsrc"))?;
        let caps = VideoInfo::builder(VideoFormat::Rgb, first.width, first.height)
            .build()
            .and_then(|info| info.to_caps())
            .map_err(|e| MediaError::backend(format!("Failed to build caps: {}", e)))?;
        src.set_caps(Some(&caps));

        let pending = Arc::new(Mutex::new(Vec::new()));
        let sink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| MediaError::backend("Pipeline has no appsink"))?;
        let sink_pending = Arc::clone(&pending);
        sink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    if let Some(buffer) = sample.buffer() {
                        let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                        sink_pending.lock().extend_from_slice(map.as_slice());
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| MediaError::backend(format!("Failed to start recording: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        tokio::spawn(run_recording(RecordingTask {
            pipeline,
            src,
            pending,
            frames: self.frames.clone(),
            dimensions: (first.width, first.height),
            stream,
            timeslice,
            stop: stop.clone(),
            events: tx,
        }));

        Ok((Box::new(GstChunkRecorder { stop }), rx))
    }
}

struct GstChunkRecorder {
    stop: CancellationToken,
}

impl ChunkRecorder for GstChunkRecorder {
    fn stop(&self) {
        self.stop.cancel();
    }
}

struct RecordingTask {
    pipeline: gst::Pipeline,
    src: AppSrc,
    pending: Arc<Mutex<Vec<u8>>>,
    frames: watch::Receiver<Option<VideoFrame>>,
    dimensions: (u32, u32),
    stream: Arc<dyn CaptureStream>,
    timeslice: Duration,
    stop: CancellationToken,
    events: mpsc::UnboundedSender<RecorderEvent>,
}

impl RecordingTask {
    fn flush(&self) {
        let chunk = std::mem::take(&mut *self.pending.lock());
        let _ = self.events.send(RecorderEvent::Data(Bytes::from(chunk)));
    }

    fn push(&self, frame: &VideoFrame) {
        if (frame.width, frame.height) != self.dimensions {
            debug!(
                "Skipping {}x{} frame in {}x{} recording",
                frame.width, frame.height, self.dimensions.0, self.dimensions.1
            );
            return;
        }
        let buffer = gst::Buffer::from_slice(frame.data.clone());
        if let Err(e) = self.src.push_buffer(buffer) {
            warn!("Recording appsrc rejected frame: {:?}", e);
        }
    }
}

async fn run_recording(mut task: RecordingTask) {
    let mut ticker = tokio::time::interval(task.timeslice);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = task.stop.cancelled() => break,
            changed = task.frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = task.frames.borrow_and_update().clone();
                if let Some(frame) = frame {
                    task.push(&frame);
                }
            }
            _ = ticker.tick() => {
                if !task.stream.is_active() {
                    let _ = task.pipeline.set_state(gst::State::Null);
                    let _ = task
                        .events
                        .send(RecorderEvent::Error("capture stream ended".to_string()));
                    return;
                }
                task.flush();
            }
        }
    }

    let _ = task.src.end_of_stream();
    let bus = task.pipeline.bus();
    let drained = tokio::task::spawn_blocking(move || {
        bus.and_then(|bus| {
            bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(DRAIN_TIMEOUT_SECS),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            )
        })
        .map(|message| matches!(message.view(), gst::MessageView::Eos(_)))
        .unwrap_or(false)
    })
    .await
    .unwrap_or(false);

    if !drained {
        warn!("Recording pipeline did not drain cleanly");
    }
    let _ = task.pipeline.set_state(gst::State::Null);
    task.flush();
    let _ = task.events.send(RecorderEvent::Stopped);
}
