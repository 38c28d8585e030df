use crate::error::MediaError;
use crate::frame::VideoFrame;
use crate::media::{
    CaptureStream, MediaTrack, ReadyState, RenderSurface, SessionId, SurfaceEvent,
    SurfaceFactory, TrackKind,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

/// Video track handed out by a `GstSurface`
pub struct GstTrack {
    stopped: AtomicBool,
}

impl MediaTrack for GstTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            trace!("Capture track stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct GstCaptureStream {
    track: Arc<GstTrack>,
}

impl CaptureStream for GstCaptureStream {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        vec![self.track.clone() as Arc<dyn MediaTrack>]
    }
}

struct SurfaceState {
    owner: Option<SessionId>,
    ready_state: ReadyState,
    playing: bool,
    issued: Vec<Arc<GstTrack>>,
}

/// In-memory surface fed by GStreamer decode pipelines
///
/// Holds the most recent decoded frame. While paused the displayed frame is
/// frozen; decoders keep running.
pub struct GstSurface {
    state: Mutex<SurfaceState>,
    events: broadcast::Sender<SurfaceEvent>,
    frames: watch::Sender<Option<VideoFrame>>,
}

impl GstSurface {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (frames, _) = watch::channel(None);
        Arc::new(Self {
            state: Mutex::new(SurfaceState {
                owner: None,
                ready_state: ReadyState::HaveNothing,
                playing: false,
                issued: Vec::new(),
            }),
            events,
            frames,
        })
    }

    /// Follow the displayed frame; used by the recorder backend
    pub fn subscribe_frames(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.frames.subscribe()
    }
}

impl RenderSurface for GstSurface {
    fn attach(&self, owner: SessionId) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        match state.owner {
            Some(current) if current != owner => Err(MediaError::SurfaceBusy { owner: current }),
            _ => {
                state.owner = Some(owner);
                Ok(())
            }
        }
    }

    fn detach(&self, owner: SessionId) {
        let issued = {
            let mut state = self.state.lock();
            if state.owner != Some(owner) {
                return;
            }
            state.owner = None;
            state.ready_state = ReadyState::HaveNothing;
            state.playing = false;
            std::mem::take(&mut state.issued)
        };

        for track in issued {
            track.stop();
        }
        self.frames.send_replace(None);
        debug!("Surface detached from session {}", owner);
    }

    fn owner(&self) -> Option<SessionId> {
        self.state.lock().owner
    }

    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready_state
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        self.frames.borrow().clone()
    }

    fn present_frame(&self, frame: VideoFrame) {
        {
            let mut state = self.state.lock();
            if state.owner.is_none() {
                return;
            }
            if !state.playing && state.ready_state.has_frame() {
                return;
            }
            state.ready_state = ReadyState::HaveEnoughData;
        }
        self.frames.send_replace(Some(frame));
    }

    fn signal(&self, event: SurfaceEvent) {
        let _ = self.events.send(event);
    }

    fn play(&self) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        if state.owner.is_none() {
            return Err(MediaError::backend("no stream attached"));
        }
        state.playing = true;
        Ok(())
    }

    fn pause(&self) {
        self.state.lock().playing = false;
    }

    fn seek(&self, _position: Duration) -> Result<(), MediaError> {
        Err(MediaError::unsupported("seeking a decode pipeline"))
    }

    fn supports_capture_stream(&self) -> bool {
        true
    }

    fn capture_stream(&self) -> Option<Arc<dyn CaptureStream>> {
        let mut state = self.state.lock();
        if state.owner.is_none() || !state.ready_state.has_frame() {
            return None;
        }

        let track = Arc::new(GstTrack {
            stopped: AtomicBool::new(false),
        });
        state.issued.push(Arc::clone(&track));
        Some(Arc::new(GstCaptureStream { track }))
    }
}

/// Private surfaces for preview sampling
#[derive(Debug, Default, Clone, Copy)]
pub struct GstSurfaceFactory;

impl SurfaceFactory for GstSurfaceFactory {
    fn create_surface(&self) -> Arc<dyn RenderSurface> {
        GstSurface::new()
    }
}
