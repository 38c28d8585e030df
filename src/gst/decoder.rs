use crate::error::MediaError;
use crate::frame::{PixelFormat, VideoFrame};
use crate::media::{
    Decoder, DecoderError, DecoderErrorKind, DecoderEvent, DecoderFactory, DecoderTuning,
    ErrorDetails, RenderSurface, SurfaceEvent,
};
use futures::StreamExt;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks};
use gstreamer_video::VideoInfo;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Frames between `TimeUpdate` signals
const TIME_UPDATE_INTERVAL: u64 = 25;

/// Builds `uridecodebin` pipelines that decode HLS into RGB frames
pub struct GstDecoderFactory;

impl GstDecoderFactory {
    pub fn new() -> Result<Self, MediaError> {
        gst::init()
            .map_err(|e| MediaError::backend(format!("Failed to initialize GStreamer: {}", e)))?;
        Ok(Self)
    }
}

impl DecoderFactory for GstDecoderFactory {
    fn is_supported(&self) -> bool {
        gst::ElementFactory::find("uridecodebin").is_some()
            && gst::ElementFactory::find("hlsdemux").is_some()
    }

    fn create(
        &self,
        tuning: &DecoderTuning,
    ) -> Result<(Arc<dyn Decoder>, mpsc::UnboundedReceiver<DecoderEvent>), MediaError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let decoder = GstDecoder {
            tuning: tuning.clone(),
            events: tx,
            state: Mutex::new(DecoderState::default()),
            cancel: CancellationToken::new(),
        };
        Ok((Arc::new(decoder), rx))
    }
}

#[derive(Default)]
struct DecoderState {
    surface: Option<Arc<dyn RenderSurface>>,
    pipeline: Option<gst::Pipeline>,
    bus_task: Option<JoinHandle<()>>,
    destroyed: bool,
}

pub struct GstDecoder {
    tuning: DecoderTuning,
    events: mpsc::UnboundedSender<DecoderEvent>,
    state: Mutex<DecoderState>,
    cancel: CancellationToken,
}

impl GstDecoder {
    fn set_pipeline_state(&self, target: gst::State) {
        let pipeline = self.state.lock().pipeline.clone();
        if let Some(pipeline) = pipeline {
            if let Err(e) = pipeline.set_state(target) {
                warn!("Failed to set pipeline to {:?}: {}", target, e);
            }
        }
    }
}

impl Decoder for GstDecoder {
    fn attach_media(&self, surface: Arc<dyn RenderSurface>) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(MediaError::backend("decoder already destroyed"));
        }
        state.surface = Some(surface);
        let _ = self.events.send(DecoderEvent::MediaAttached);
        Ok(())
    }

    fn load_source(&self, url: &str) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(MediaError::backend("decoder already destroyed"));
        }
        let surface = state
            .surface
            .clone()
            .ok_or_else(|| MediaError::backend("load_source called before attach_media"))?;

        let description = pipeline_description(url, &self.tuning);
        info!("Creating GStreamer pipeline: {}", description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| MediaError::backend(format!("Failed to create pipeline: {}", e)))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| MediaError::backend("Failed to downcast to Pipeline"))?;

        configure_source(&pipeline, &self.tuning);

        let sink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| MediaError::backend("Pipeline has no appsink"))?;
        let frames = Arc::new(AtomicU64::new(0));
        install_frame_callbacks(&sink, Arc::clone(&surface), Arc::clone(&frames));

        let bus = pipeline
            .bus()
            .ok_or_else(|| MediaError::backend("Pipeline has no bus"))?;
        state.bus_task = Some(tokio::spawn(watch_bus(
            bus,
            self.events.clone(),
            surface,
            frames,
            self.cancel.clone(),
        )));

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| MediaError::backend(format!("Failed to start pipeline: {}", e)))?;
        state.pipeline = Some(pipeline);
        Ok(())
    }

    fn start_load(&self) {
        self.set_pipeline_state(gst::State::Playing);
    }

    fn stop_load(&self) {
        self.set_pipeline_state(gst::State::Paused);
    }

    fn recover_media_error(&self) {
        debug!("Restarting decode pipeline");
        self.set_pipeline_state(gst::State::Null);
        self.set_pipeline_state(gst::State::Playing);
    }

    fn swap_audio_codec(&self) {
        // Audio is never decoded; only the restart half applies.
        trace!("Audio codec swap requested; audio streams are not exposed");
    }

    fn detach_media(&self) {
        self.set_pipeline_state(gst::State::Null);
        self.state.lock().surface = None;
    }

    fn destroy(&self) {
        self.cancel.cancel();
        let (pipeline, task) = {
            let mut state = self.state.lock();
            state.destroyed = true;
            state.surface = None;
            (state.pipeline.take(), state.bus_task.take())
        };

        if let Some(pipeline) = pipeline {
            let _ = pipeline.set_state(gst::State::Null);
        }
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for GstDecoder {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn pipeline_description(url: &str, tuning: &DecoderTuning) -> String {
    let buffer_duration_ns = (tuning.max_buffer_length * 1_000_000_000.0) as i64;
    format!(
        "uridecodebin name=decode uri=\"{}\" expose-all-streams=false caps=video/x-raw \
         buffer-duration={} ! \
         videoconvert ! video/x-raw,format=RGB ! \
         appsink name=sink sync={} max-buffers=2 drop=true enable-last-sample=false",
        url, buffer_duration_ns, !tuning.low_latency
    )
}

/// Apply fetch timeout and retry budget to the http source once it exists
fn configure_source(pipeline: &gst::Pipeline, tuning: &DecoderTuning) {
    let Some(decode) = pipeline.by_name("decode") else {
        return;
    };

    let timeout_secs = tuning.fragment_timeout().as_secs().max(1) as u32;
    let retries = tuning.fragment_retry.max_retries as i32;
    decode.connect("source-setup", false, move |args| {
        if let Some(source) = args.get(1).and_then(|value| value.get::<gst::Element>().ok()) {
            if source.find_property("timeout").is_some() {
                source.set_property("timeout", timeout_secs);
            }
            if source.find_property("retries").is_some() {
                source.set_property("retries", retries);
            }
        }
        None
    });
}

fn install_frame_callbacks(
    sink: &AppSink,
    surface: Arc<dyn RenderSurface>,
    frames: Arc<AtomicU64>,
) {
    sink.set_callbacks(
        AppSinkCallbacks::builder()
            .new_sample(move |appsink| {
                let sample = appsink
                    .pull_sample()
                    .map_err(|_| gst::FlowError::Eos)?;

                match frame_from_sample(&sample) {
                    Ok(frame) => {
                        surface.present_frame(frame);
                        let count = frames.fetch_add(1, Ordering::Relaxed);
                        if count == 0 {
                            surface.signal(SurfaceEvent::LoadedData);
                            surface.signal(SurfaceEvent::CanPlay);
                        } else if count % TIME_UPDATE_INTERVAL == 0 {
                            surface.signal(SurfaceEvent::TimeUpdate);
                        }
                    }
                    Err(e) => warn!("Dropping undecodable sample: {}", e),
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );
}

/// Copy an RGB sample into a tightly packed frame
fn frame_from_sample(sample: &gst::Sample) -> Result<VideoFrame, MediaError> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| MediaError::backend("No buffer in sample"))?;
    let caps = sample
        .caps()
        .ok_or_else(|| MediaError::backend("No caps in sample"))?;
    let info = VideoInfo::from_caps(caps)
        .map_err(|e| MediaError::backend(format!("Failed to get video info: {}", e)))?;
    let map = buffer
        .map_readable()
        .map_err(|e| MediaError::backend(format!("Failed to map buffer: {}", e)))?;

    let width = info.width();
    let height = info.height();
    let row = width as usize * 3;
    let stride = info.stride()[0] as usize;
    let data = map.as_slice();

    let packed = if stride == row {
        data.get(..row * height as usize)
            .ok_or_else(|| MediaError::backend("Short video buffer"))?
            .to_vec()
    } else {
        let mut packed = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            let line = data
                .get(start..start + row)
                .ok_or_else(|| MediaError::backend("Short video buffer"))?;
            packed.extend_from_slice(line);
        }
        packed
    };

    Ok(VideoFrame::new(width, height, PixelFormat::Rgb24, packed))
}

async fn watch_bus(
    bus: gst::Bus,
    events: mpsc::UnboundedSender<DecoderEvent>,
    surface: Arc<dyn RenderSurface>,
    frames: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut messages = bus.stream();
    let mut stream_started = false;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = messages.next() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match message.view() {
            gst::MessageView::StreamStart(_) if !stream_started => {
                stream_started = true;
                // uridecodebin does not expose the variant list
                let _ = events.send(DecoderEvent::ManifestParsed { levels: 1 });
            }
            gst::MessageView::Buffering(buffering) => {
                if buffering.percent() < 100 {
                    surface.signal(SurfaceEvent::Waiting);
                } else {
                    surface.signal(SurfaceEvent::Playing);
                }
            }
            gst::MessageView::Eos(_) => {
                debug!("Decode pipeline reached end of stream");
                surface.signal(SurfaceEvent::Ended);
            }
            gst::MessageView::Warning(warning) => {
                debug!("Decode pipeline warning: {}", warning.error());
            }
            gst::MessageView::Error(err) => {
                error!("Decode pipeline error: {} ({:?})", err.error(), err.debug());
                let decoded_any = frames.load(Ordering::Relaxed) > 0;
                let classified =
                    classify_bus_error(&err.error(), decoded_any).with_message(err.error().to_string());
                let _ = events.send(DecoderEvent::Error(classified));
            }
            _ => {}
        }
    }

    trace!("Decode bus watcher stopped");
}

/// Map GStreamer error domains onto decoder error details
fn classify_bus_error(error: &gst::glib::Error, decoded_any: bool) -> DecoderError {
    if error.is::<gst::ResourceError>() {
        let details = if decoded_any {
            ErrorDetails::FragLoadError
        } else {
            ErrorDetails::ManifestLoadError
        };
        return DecoderError::new(DecoderErrorKind::Network, details, true);
    }

    if let Some(kind) = error.kind::<gst::StreamError>() {
        let details = match kind {
            gst::StreamError::CodecNotFound | gst::StreamError::WrongType => {
                ErrorDetails::BufferAddCodecError
            }
            gst::StreamError::Demux if !decoded_any => ErrorDetails::ManifestParsingError,
            _ => ErrorDetails::FragParsingError,
        };
        return DecoderError::new(DecoderErrorKind::Media, details, true);
    }

    DecoderError::new(DecoderErrorKind::Other, ErrorDetails::InternalException, true)
}
