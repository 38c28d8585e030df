//! Scripted in-memory media backend.
//!
//! Drives sessions, capture and previews without real decoding: each manifest
//! url maps to a list of [`ScriptStep`]s replayed once the source is loaded.
//! All types record how they were used so lifecycle rules can be asserted.

use crate::error::MediaError;
use crate::frame::VideoFrame;
use super::{
    CaptureStream, ChunkRecorder, Decoder, DecoderError, DecoderErrorKind, DecoderEvent,
    DecoderFactory, DecoderTuning, ErrorDetails, MediaTrack, ReadyState, RecorderBackend,
    RecorderEvent, RenderSurface, SessionId, SurfaceEvent, SurfaceFactory, TrackKind,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// One scripted action replayed by a mock decoder after `load_source`
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Decoder(DecoderEvent),
    Surface(SurfaceEvent),
    Frame(VideoFrame),
    Wait(Duration),
}

impl ScriptStep {
    /// Manifest parses, a frame is decoded and the surface becomes playable
    pub fn healthy_stream() -> Vec<ScriptStep> {
        vec![
            ScriptStep::Decoder(DecoderEvent::ManifestParsed { levels: 3 }),
            ScriptStep::Frame(VideoFrame::solid(64, 36, [30, 120, 200])),
            ScriptStep::Surface(SurfaceEvent::LoadedData),
            ScriptStep::Surface(SurfaceEvent::CanPlay),
        ]
    }

    /// Manifest request fails after the decoder's own retries
    pub fn unreachable_manifest() -> Vec<ScriptStep> {
        vec![ScriptStep::Decoder(DecoderEvent::Error(DecoderError::new(
            DecoderErrorKind::Network,
            ErrorDetails::ManifestLoadError,
            true,
        )))]
    }

    /// Never produces anything
    pub fn hanging() -> Vec<ScriptStep> {
        Vec::new()
    }

    pub fn fatal(kind: DecoderErrorKind, details: ErrorDetails) -> ScriptStep {
        ScriptStep::Decoder(DecoderEvent::Error(DecoderError::new(kind, details, true)))
    }

    pub fn non_fatal(kind: DecoderErrorKind, details: ErrorDetails) -> ScriptStep {
        ScriptStep::Decoder(DecoderEvent::Error(DecoderError::new(kind, details, false)))
    }
}

type ScriptBook = Mutex<HashMap<String, Vec<ScriptStep>>>;

/// Decoder factory replaying per-url scripts
pub struct MockDecoderFactory {
    supported: bool,
    scripts: Arc<ScriptBook>,
    default_script: Vec<ScriptStep>,
    fail_create: AtomicBool,
    decoders: Mutex<Vec<Arc<MockDecoder>>>,
}

impl MockDecoderFactory {
    /// Factory whose unknown urls play a healthy stream
    pub fn new() -> Self {
        Self::with_default(ScriptStep::healthy_stream())
    }

    pub fn with_default(default_script: Vec<ScriptStep>) -> Self {
        Self {
            supported: true,
            scripts: Arc::new(Mutex::new(HashMap::new())),
            default_script,
            fail_create: AtomicBool::new(false),
            decoders: Mutex::new(Vec::new()),
        }
    }

    /// Factory reporting that adaptive decoding is unavailable
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn script<S: Into<String>>(&self, url: S, steps: Vec<ScriptStep>) -> &Self {
        self.scripts.lock().insert(url.into(), steps);
        self
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Every decoder created so far, oldest first
    pub fn decoders(&self) -> Vec<Arc<MockDecoder>> {
        self.decoders.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.decoders.lock().len()
    }

    /// Decoders that were created and not yet destroyed
    pub fn live_count(&self) -> usize {
        self.decoders
            .lock()
            .iter()
            .filter(|decoder| !decoder.is_destroyed())
            .count()
    }
}

impl Default for MockDecoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderFactory for MockDecoderFactory {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn create(
        &self,
        tuning: &DecoderTuning,
    ) -> Result<(Arc<dyn Decoder>, mpsc::UnboundedReceiver<DecoderEvent>), MediaError> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(MediaError::backend("scripted decoder creation failure"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let decoder = Arc::new(MockDecoder {
            tuning: tuning.clone(),
            scripts: Arc::clone(&self.scripts),
            default_script: self.default_script.clone(),
            tx: Mutex::new(Some(tx)),
            surface: Mutex::new(None),
            task: Mutex::new(None),
            loaded_url: Mutex::new(None),
            start_load_calls: AtomicUsize::new(0),
            stop_load_calls: AtomicUsize::new(0),
            recover_calls: AtomicUsize::new(0),
            swap_calls: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        });
        self.decoders.lock().push(Arc::clone(&decoder));
        Ok((decoder, rx))
    }
}

/// Decoder that replays a script onto its surface
pub struct MockDecoder {
    tuning: DecoderTuning,
    scripts: Arc<ScriptBook>,
    default_script: Vec<ScriptStep>,
    tx: Mutex<Option<mpsc::UnboundedSender<DecoderEvent>>>,
    surface: Mutex<Option<Arc<dyn RenderSurface>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    loaded_url: Mutex<Option<String>>,
    start_load_calls: AtomicUsize,
    stop_load_calls: AtomicUsize,
    recover_calls: AtomicUsize,
    swap_calls: AtomicUsize,
    destroyed: AtomicBool,
}

impl MockDecoder {
    pub fn tuning(&self) -> &DecoderTuning {
        &self.tuning
    }

    pub fn loaded_url(&self) -> Option<String> {
        self.loaded_url.lock().clone()
    }

    pub fn start_load_calls(&self) -> usize {
        self.start_load_calls.load(Ordering::SeqCst)
    }

    pub fn stop_load_calls(&self) -> usize {
        self.stop_load_calls.load(Ordering::SeqCst)
    }

    pub fn recover_calls(&self) -> usize {
        self.recover_calls.load(Ordering::SeqCst)
    }

    pub fn swap_calls(&self) -> usize {
        self.swap_calls.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Inject an event as if the decoder raised it
    pub fn emit(&self, event: DecoderEvent) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn stop_script(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Decoder for MockDecoder {
    fn attach_media(&self, surface: Arc<dyn RenderSurface>) -> Result<(), MediaError> {
        if self.is_destroyed() {
            return Err(MediaError::backend("decoder destroyed"));
        }
        *self.surface.lock() = Some(surface);
        self.emit(DecoderEvent::MediaAttached);
        Ok(())
    }

    fn load_source(&self, url: &str) -> Result<(), MediaError> {
        let surface = self
            .surface
            .lock()
            .clone()
            .ok_or_else(|| MediaError::backend("no media attached"))?;
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| MediaError::backend("decoder destroyed"))?;

        let steps = self
            .scripts
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        *self.loaded_url.lock() = Some(url.to_string());

        debug!("Mock decoder replaying {} steps for {}", steps.len(), url);
        let task = tokio::spawn(async move {
            for step in steps {
                match step {
                    ScriptStep::Wait(delay) => tokio::time::sleep(delay).await,
                    ScriptStep::Decoder(event) => {
                        trace!("Mock decoder event: {:?}", event);
                        let _ = tx.send(event);
                    }
                    ScriptStep::Surface(event) => surface.signal(event),
                    ScriptStep::Frame(frame) => surface.present_frame(frame),
                }
                tokio::task::yield_now().await;
            }
        });

        self.stop_script();
        *self.task.lock() = Some(task);
        Ok(())
    }

    fn start_load(&self) {
        self.start_load_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_load(&self) {
        self.stop_load_calls.fetch_add(1, Ordering::SeqCst);
        self.stop_script();
    }

    fn recover_media_error(&self) {
        self.recover_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn swap_audio_codec(&self) {
        self.swap_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn detach_media(&self) {
        self.surface.lock().take();
    }

    fn destroy(&self) {
        self.stop_script();
        self.surface.lock().take();
        self.tx.lock().take();
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// Track that counts how often it was stopped
pub struct MockTrack {
    kind: TrackKind,
    stopped: AtomicBool,
    stop_calls: AtomicUsize,
}

impl MockTrack {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        })
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

pub struct MockCaptureStream {
    tracks: Vec<Arc<MockTrack>>,
}

impl MockCaptureStream {
    pub fn new(track_count: usize) -> Arc<Self> {
        let tracks = (0..track_count)
            .map(|i| {
                MockTrack::new(if i == 0 {
                    TrackKind::Video
                } else {
                    TrackKind::Audio
                })
            })
            .collect();
        Arc::new(Self { tracks })
    }

    pub fn mock_tracks(&self) -> &[Arc<MockTrack>] {
        &self.tracks
    }
}

impl CaptureStream for MockCaptureStream {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .map(|track| Arc::clone(track) as Arc<dyn MediaTrack>)
            .collect()
    }
}

struct SurfaceState {
    owner: Option<SessionId>,
    ready_state: ReadyState,
    frame: Option<VideoFrame>,
    playing: bool,
    position: Duration,
    native_url: Option<String>,
    streams: Vec<Arc<MockCaptureStream>>,
}

/// In-memory render surface
pub struct MockSurface {
    state: Mutex<SurfaceState>,
    events: broadcast::Sender<SurfaceEvent>,
    native_hls: bool,
    capture_supported: AtomicBool,
    capture_tracks: usize,
    autoplay_blocked: bool,
    attach_count: AtomicUsize,
    detach_count: AtomicUsize,
    busy_rejections: AtomicUsize,
}

impl MockSurface {
    pub fn new() -> Arc<Self> {
        MockSurfaceBuilder::new().build()
    }

    pub fn builder() -> MockSurfaceBuilder {
        MockSurfaceBuilder::new()
    }

    pub fn attach_count(&self) -> usize {
        self.attach_count.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detach_count.load(Ordering::SeqCst)
    }

    /// Attach attempts refused because another session held the surface
    pub fn busy_rejections(&self) -> usize {
        self.busy_rejections.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn position(&self) -> Duration {
        self.state.lock().position
    }

    pub fn native_url(&self) -> Option<String> {
        self.state.lock().native_url.clone()
    }

    /// Toggle stream capture support, e.g. when the source changes
    pub fn set_capture_supported(&self, supported: bool) {
        self.capture_supported.store(supported, Ordering::SeqCst);
    }

    /// Capture streams handed out so far
    pub fn issued_streams(&self) -> Vec<Arc<MockCaptureStream>> {
        self.state.lock().streams.clone()
    }
}

impl RenderSurface for MockSurface {
    fn attach(&self, owner: SessionId) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        if let Some(current) = state.owner {
            self.busy_rejections.fetch_add(1, Ordering::SeqCst);
            return Err(MediaError::SurfaceBusy { owner: current });
        }
        state.owner = Some(owner);
        self.attach_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach(&self, owner: SessionId) {
        let mut state = self.state.lock();
        if state.owner != Some(owner) {
            return;
        }
        state.owner = None;
        state.ready_state = ReadyState::HaveNothing;
        state.frame = None;
        state.playing = false;
        state.native_url = None;
        for stream in state.streams.iter() {
            for track in stream.mock_tracks() {
                if !track.is_stopped() {
                    track.stop();
                }
            }
        }
        self.detach_count.fetch_add(1, Ordering::SeqCst);
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
        self.state.lock().frame.clone()
    }

    fn can_play_natively(&self, _mime: &str) -> bool {
        self.native_hls
    }

    fn load_native(&self, url: &str) -> Result<(), MediaError> {
        if !self.native_hls {
            return Err(MediaError::unsupported("native playback"));
        }
        self.state.lock().native_url = Some(url.to_string());
        let _ = self.events.send(SurfaceEvent::LoadedMetadata);
        Ok(())
    }

    fn present_frame(&self, frame: VideoFrame) {
        let mut state = self.state.lock();
        state.frame = Some(frame);
        if state.ready_state < ReadyState::HaveEnoughData {
            state.ready_state = ReadyState::HaveEnoughData;
        }
    }

    fn signal(&self, event: SurfaceEvent) {
        let _ = self.events.send(event);
    }

    fn play(&self) -> Result<(), MediaError> {
        if self.autoplay_blocked {
            return Err(MediaError::backend("play() prevented"));
        }
        self.state.lock().playing = true;
        Ok(())
    }

    fn pause(&self) {
        self.state.lock().playing = false;
    }

    fn seek(&self, position: Duration) -> Result<(), MediaError> {
        self.state.lock().position = position;
        Ok(())
    }

    fn supports_capture_stream(&self) -> bool {
        self.capture_supported.load(Ordering::SeqCst)
    }

    fn capture_stream(&self) -> Option<Arc<dyn CaptureStream>> {
        if !self.supports_capture_stream() {
            return None;
        }
        let mut state = self.state.lock();
        if state.owner.is_none() || !state.ready_state.has_frame() {
            return None;
        }
        let stream = MockCaptureStream::new(self.capture_tracks);
        state.streams.push(Arc::clone(&stream));
        Some(stream)
    }
}

pub struct MockSurfaceBuilder {
    native_hls: bool,
    capture_supported: bool,
    capture_tracks: usize,
    autoplay_blocked: bool,
}

impl MockSurfaceBuilder {
    pub fn new() -> Self {
        Self {
            native_hls: false,
            capture_supported: true,
            capture_tracks: 2,
            autoplay_blocked: false,
        }
    }

    pub fn native_hls(mut self, enabled: bool) -> Self {
        self.native_hls = enabled;
        self
    }

    pub fn capture_supported(mut self, enabled: bool) -> Self {
        self.capture_supported = enabled;
        self
    }

    pub fn capture_tracks(mut self, count: usize) -> Self {
        self.capture_tracks = count;
        self
    }

    pub fn autoplay_blocked(mut self, blocked: bool) -> Self {
        self.autoplay_blocked = blocked;
        self
    }

    pub fn build(self) -> Arc<MockSurface> {
        let (events, _) = broadcast::channel(64);
        Arc::new(MockSurface {
            state: Mutex::new(SurfaceState {
                owner: None,
                ready_state: ReadyState::HaveNothing,
                frame: None,
                playing: false,
                position: Duration::ZERO,
                native_url: None,
                streams: Vec::new(),
            }),
            events,
            native_hls: self.native_hls,
            capture_supported: AtomicBool::new(self.capture_supported),
            capture_tracks: self.capture_tracks,
            autoplay_blocked: self.autoplay_blocked,
            attach_count: AtomicUsize::new(0),
            detach_count: AtomicUsize::new(0),
            busy_rejections: AtomicUsize::new(0),
        })
    }
}

impl Default for MockSurfaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out a fresh mock surface per request and remembers them
#[derive(Default)]
pub struct MockSurfaceFactory {
    surfaces: Mutex<Vec<Arc<MockSurface>>>,
}

impl MockSurfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surfaces(&self) -> Vec<Arc<MockSurface>> {
        self.surfaces.lock().clone()
    }
}

impl SurfaceFactory for MockSurfaceFactory {
    fn create_surface(&self) -> Arc<dyn RenderSurface> {
        let surface = MockSurface::new();
        self.surfaces.lock().push(Arc::clone(&surface));
        surface
    }
}

/// Recorder emitting a fixed-size chunk every timeslice
pub struct MockRecorderBackend {
    available: bool,
    supported: Vec<String>,
    chunk_size: usize,
    fail_after_chunks: Option<usize>,
    fail_start: bool,
    hang_on_stop: bool,
    started_mimes: Mutex<Vec<String>>,
}

impl MockRecorderBackend {
    /// Recorder supporting only the given MIME types
    pub fn supporting(mimes: &[&str]) -> Self {
        Self {
            available: true,
            supported: mimes.iter().map(|m| m.to_string()).collect(),
            chunk_size: 512,
            fail_after_chunks: None,
            fail_start: false,
            hang_on_stop: false,
            started_mimes: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::supporting(&[])
        }
    }

    /// Emit a recorder error after `chunks` chunks
    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after_chunks = Some(chunks);
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Never flush or confirm after `stop`
    pub fn hanging_on_stop(mut self) -> Self {
        self.hang_on_stop = true;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn started_mimes(&self) -> Vec<String> {
        self.started_mimes.lock().clone()
    }
}

impl RecorderBackend for MockRecorderBackend {
    fn is_available(&self) -> bool {
        self.available
    }

    fn is_type_supported(&self, mime: &str) -> bool {
        self.supported.iter().any(|m| m == mime)
    }

    fn start(
        &self,
        _stream: Arc<dyn CaptureStream>,
        mime: &str,
        timeslice: Duration,
    ) -> Result<(Box<dyn ChunkRecorder>, mpsc::UnboundedReceiver<RecorderEvent>), MediaError> {
        if self.fail_start {
            return Err(MediaError::backend("scripted recorder start failure"));
        }
        self.started_mimes.lock().push(mime.to_string());

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let chunk = Bytes::from(vec![0x1A; self.chunk_size]);
        let fail_after = self.fail_after_chunks;
        let hang_on_stop = self.hang_on_stop;
        let stop_signal = stop.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timeslice);
            ticker.tick().await;
            let mut emitted = 0usize;

            loop {
                tokio::select! {
                    _ = stop_signal.cancelled() => {
                        if hang_on_stop {
                            std::future::pending::<()>().await;
                        }
                        let _ = tx.send(RecorderEvent::Data(chunk.clone()));
                        let _ = tx.send(RecorderEvent::Stopped);
                        break;
                    }
                    _ = ticker.tick() => {
                        if fail_after == Some(emitted) {
                            let _ = tx.send(RecorderEvent::Error("scripted recorder failure".to_string()));
                            break;
                        }
                        emitted += 1;
                        if tx.send(RecorderEvent::Data(chunk.clone())).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok((Box::new(MockChunkRecorder { stop }), rx))
    }
}

struct MockChunkRecorder {
    stop: CancellationToken,
}

impl ChunkRecorder for MockChunkRecorder {
    fn stop(&self) {
        self.stop.cancel();
    }
}
