use super::recovery::{self, classify, RecoveryAction, RecoveryBudget};
use super::status::{SessionStatus, SettleOutcome};
use crate::config::{PlayerConfig, RecoveryConfig};
use crate::error::{ErrorClassification, SessionErrorCategory};
use crate::media::{
    Decoder, DecoderEvent, DecoderFactory, DecoderTuning, ErrorDetails, RenderSurface,
    SessionId, SurfaceEvent, HLS_MIME,
};
use crate::source::StreamSource;
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Observer invoked on every status transition
pub type StatusCallback = Arc<dyn Fn(&SessionStatus) + Send + Sync>;

/// Per-session behaviour knobs
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub tuning: DecoderTuning,
    /// Deadline for leaving `Initializing`
    pub init_timeout: Duration,
    /// Call `play()` on the surface once ready
    pub autoplay: bool,
    pub recovery: RecoveryConfig,
}

impl SessionOptions {
    /// Options for the main player
    pub fn playback(config: &PlayerConfig) -> Self {
        Self {
            tuning: config.decoder.clone(),
            init_timeout: config.playback.init_timeout(),
            autoplay: config.playback.autoplay,
            recovery: config.playback.recovery.clone(),
        }
    }

    /// Options for a head-less preview sample; the caller's deadline bounds it
    pub fn preview(config: &PlayerConfig) -> Self {
        Self {
            tuning: config.preview.decoder.clone(),
            init_timeout: config.preview.timeout(),
            autoplay: false,
            recovery: RecoveryConfig {
                max_attempts: 0,
                ..config.playback.recovery.clone()
            },
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::playback(&PlayerConfig::default())
    }
}

struct Pipeline {
    decoder: Option<Arc<dyn Decoder>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct SessionState {
    status: SessionStatus,
    source: Option<StreamSource>,
    generation: u64,
    destroyed: bool,
    fatal_reported: bool,
    pipeline: Option<Pipeline>,
}

struct SessionInner {
    id: SessionId,
    decoders: Arc<dyn DecoderFactory>,
    surface: Arc<dyn RenderSurface>,
    options: SessionOptions,
    /// Serializes transitions against `destroy` so no observer fires after it
    gate: ReentrantMutex<()>,
    state: Mutex<SessionState>,
    observers: Mutex<Vec<StatusCallback>>,
    status_tx: watch::Sender<SessionStatus>,
    destroyed: CancellationToken,
}

/// One playback attempt against one source on one render surface
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<SessionInner>,
}

impl StreamSession {
    pub fn new(
        decoders: Arc<dyn DecoderFactory>,
        surface: Arc<dyn RenderSurface>,
        options: SessionOptions,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        Self {
            inner: Arc::new(SessionInner {
                id: next_session_id(),
                decoders,
                surface,
                options,
                gate: ReentrantMutex::new(()),
                state: Mutex::new(SessionState {
                    status: SessionStatus::Idle,
                    source: None,
                    generation: 0,
                    destroyed: false,
                    fatal_reported: false,
                    pipeline: None,
                }),
                observers: Mutex::new(Vec::new()),
                status_tx,
                destroyed: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status.clone()
    }

    pub fn source(&self) -> Option<StreamSource> {
        self.inner.state.lock().source.clone()
    }

    pub fn surface(&self) -> Arc<dyn RenderSurface> {
        Arc::clone(&self.inner.surface)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Watch channel mirroring every applied transition
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Register an observer for status transitions
    pub fn on_status_change<F>(&self, callback: F)
    where
        F: Fn(&SessionStatus) + Send + Sync + 'static,
    {
        let _gate = self.inner.gate.lock();
        if self.inner.state.lock().destroyed {
            return;
        }
        self.inner.observers.lock().push(Arc::new(callback));
    }

    /// Begin playing `source`, replacing whatever this session was doing
    ///
    /// Failures are reported through the status, never returned.
    pub fn start(&self, source: StreamSource) {
        let inner = &self.inner;
        let _gate = inner.gate.lock();

        let (generation, previous) = {
            let mut state = inner.state.lock();
            if state.destroyed {
                warn!("Session {} is destroyed, ignoring start", inner.id);
                return;
            }
            state.generation += 1;
            state.source = Some(source.clone());
            state.fatal_reported = false;
            (state.generation, state.pipeline.take())
        };

        if previous.is_some() {
            debug!("Session {} tearing down previous pipeline", inner.id);
            inner.release(previous);
        }

        info!("Session {} starting {}", inner.id, source.describe());
        inner.transition(generation, SessionStatus::Initializing);

        // Subscribe before anything can emit
        let surface_rx = inner.surface.subscribe();

        if let Err(e) = inner.surface.attach(inner.id) {
            inner.fail(
                generation,
                ErrorClassification::fatal(
                    SessionErrorCategory::MediaDecode,
                    format!("Render surface unavailable: {}", e),
                ),
            );
            return;
        }

        let (decoder, decoder_rx) = if inner.decoders.is_supported() {
            match inner.decoders.create(&inner.options.tuning) {
                Ok((decoder, rx)) => (Some(decoder), Some(rx)),
                Err(e) => {
                    inner.fail(
                        generation,
                        ErrorClassification::fatal(
                            SessionErrorCategory::MediaDecode,
                            format!("Failed to create decoder: {}", e),
                        ),
                    );
                    return;
                }
            }
        } else if inner.surface.can_play_natively(HLS_MIME) {
            info!("Session {} using native HLS playback", inner.id);
            (None, None)
        } else {
            inner.fail(
                generation,
                ErrorClassification::fatal(
                    SessionErrorCategory::Unsupported,
                    "HLS is not supported by this runtime",
                ),
            );
            return;
        };

        let cancel = CancellationToken::new();
        {
            let mut state = inner.state.lock();
            if state.generation != generation || state.destroyed {
                return;
            }
            state.pipeline = Some(Pipeline {
                decoder: decoder.clone(),
                cancel: cancel.clone(),
                task: None,
            });
        }

        let task = tokio::spawn(run_session(
            Arc::clone(inner),
            generation,
            cancel,
            source.url.clone(),
            decoder.clone(),
            decoder_rx,
            surface_rx,
        ));

        {
            let mut state = inner.state.lock();
            let current = state.generation == generation;
            match state.pipeline.as_mut() {
                Some(pipeline) if current => pipeline.task = Some(task),
                _ => task.abort(),
            }
        }

        let attached = match &decoder {
            Some(decoder) => decoder.attach_media(Arc::clone(&inner.surface)),
            None => inner.surface.load_native(&source.url),
        };
        if let Err(e) = attached {
            inner.fail(
                generation,
                ErrorClassification::fatal(
                    SessionErrorCategory::MediaDecode,
                    format!("Failed to attach media: {}", e),
                ),
            );
        }
    }

    /// Stop loading, release the surface and drop all observers
    ///
    /// Idempotent. The status is left as it was and no observer fires
    /// once this returns.
    pub fn destroy(&self) {
        let inner = &self.inner;
        let _gate = inner.gate.lock();

        let pipeline = {
            let mut state = inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.pipeline.take()
        };

        inner.destroyed.cancel();
        inner.release(pipeline);
        inner.observers.lock().clear();
        debug!("Session {} destroyed", inner.id);
    }

    /// Resolve once the session is playing, has failed, or is destroyed
    pub async fn wait_settled(&self) -> SettleOutcome {
        let mut rx = self.inner.status_tx.subscribe();
        loop {
            if self.is_destroyed() {
                return SettleOutcome::Destroyed;
            }

            let current = rx.borrow_and_update().clone();
            match current {
                SessionStatus::Ready | SessionStatus::Buffering => return SettleOutcome::Ready,
                SessionStatus::Error(classification) => {
                    return SettleOutcome::Failed(classification)
                }
                SessionStatus::Idle | SessionStatus::Initializing => {}
            }

            tokio::select! {
                _ = self.inner.destroyed.cancelled() => return SettleOutcome::Destroyed,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return SettleOutcome::Destroyed;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

impl SessionInner {
    fn current_status(&self, generation: u64) -> Option<SessionStatus> {
        let state = self.state.lock();
        if state.destroyed || state.generation != generation {
            None
        } else {
            Some(state.status.clone())
        }
    }

    /// Apply a transition for `generation`; returns whether it took effect
    fn transition(&self, generation: u64, next: SessionStatus) -> bool {
        let _gate = self.gate.lock();

        let observers = {
            let mut state = self.state.lock();
            if state.destroyed || state.generation != generation {
                return false;
            }
            if state.status == next || !state.status.can_transition_to(&next) {
                trace!(
                    "Session {} ignoring transition {} -> {}",
                    self.id,
                    state.status,
                    next
                );
                return false;
            }
            if next.is_error() {
                if state.fatal_reported {
                    return false;
                }
                state.fatal_reported = true;
            }
            debug!("Session {}: {} -> {}", self.id, state.status, next);
            state.status = next.clone();
            self.observers.lock().clone()
        };

        self.status_tx.send_replace(next.clone());
        for observer in observers {
            observer(&next);
        }
        true
    }

    /// Report a fatal error once and release everything immediately
    fn fail(&self, generation: u64, classification: ErrorClassification) {
        let _gate = self.gate.lock();
        error!("Session {} failed: {}", self.id, classification);

        if !self.transition(generation, SessionStatus::Error(classification)) {
            return;
        }

        let pipeline = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.pipeline.take()
        };
        self.release(pipeline);
    }

    fn release(&self, pipeline: Option<Pipeline>) {
        if let Some(pipeline) = pipeline {
            pipeline.cancel.cancel();
            if let Some(task) = pipeline.task {
                task.abort();
            }
            if let Some(decoder) = pipeline.decoder {
                decoder.stop_load();
                decoder.detach_media();
                decoder.destroy();
            }
        }
        if self.surface.owner() == Some(self.id) {
            self.surface.pause();
            self.surface.detach(self.id);
        }
    }

    fn on_ready(&self, generation: u64, budget: &mut RecoveryBudget) {
        let was_initializing = matches!(
            self.current_status(generation),
            Some(SessionStatus::Initializing)
        );
        if !self.transition(generation, SessionStatus::Ready) {
            return;
        }
        budget.reset();
        if was_initializing && self.options.autoplay {
            if let Err(e) = self.surface.play() {
                warn!("Session {} autoplay was prevented: {}", self.id, e);
            }
        }
    }
}

async fn next_decoder_event(
    rx: &mut Option<mpsc::UnboundedReceiver<DecoderEvent>>,
) -> Option<DecoderEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Recovery actions waiting out their backoff
#[derive(Default)]
struct PendingRecovery {
    queue: Vec<(Instant, RecoveryAction)>,
}

impl PendingRecovery {
    fn push(&mut self, delay: Duration, action: RecoveryAction) {
        self.queue.push((Instant::now() + delay, action));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.queue.iter().map(|(at, _)| *at).min()
    }

    /// Remove and return every action whose backoff has elapsed
    fn take_due(&mut self, now: Instant) -> Vec<RecoveryAction> {
        let mut due = Vec::new();
        self.queue.retain(|(at, action)| {
            if *at <= now {
                due.push(*action);
                false
            } else {
                true
            }
        });
        due
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn run_recovery(inner: &SessionInner, decoder: &Arc<dyn Decoder>, action: RecoveryAction) {
    match action {
        RecoveryAction::ReloadFragments => {
            info!("Session {} re-requesting fragment data", inner.id);
            decoder.start_load();
        }
        RecoveryAction::RecoverMedia => {
            info!("Session {} recovering media pipeline", inner.id);
            decoder.recover_media_error();
        }
        RecoveryAction::SwapCodecThenRecover => {
            info!("Session {} swapping audio codec and recovering", inner.id);
            decoder.swap_audio_codec();
            decoder.recover_media_error();
        }
        RecoveryAction::Ignore | RecoveryAction::Fail => {}
    }
}

/// Event loop for one generation of a session
async fn run_session(
    inner: Arc<SessionInner>,
    generation: u64,
    cancel: CancellationToken,
    url: String,
    decoder: Option<Arc<dyn Decoder>>,
    mut decoder_rx: Option<mpsc::UnboundedReceiver<DecoderEvent>>,
    mut surface_rx: broadcast::Receiver<SurfaceEvent>,
) {
    let init_deadline = tokio::time::sleep(inner.options.init_timeout);
    tokio::pin!(init_deadline);

    let mut budget = RecoveryBudget::new(inner.options.recovery.clone());
    let mut pending = PendingRecovery::default();

    loop {
        let initializing = match inner.current_status(generation) {
            Some(status) => status == SessionStatus::Initializing,
            None => break,
        };

        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = &mut init_deadline, if initializing => {
                warn!(
                    "Session {} did not initialize within {:?}",
                    inner.id, inner.options.init_timeout
                );
                inner.fail(
                    generation,
                    ErrorClassification::fatal(
                        SessionErrorCategory::ManifestLoad,
                        "Stream initialization timed out",
                    ),
                );
                break;
            }

            event = next_decoder_event(&mut decoder_rx) => {
                let Some(event) = event else {
                    debug!("Session {} decoder channel closed", inner.id);
                    decoder_rx = None;
                    continue;
                };
                let Some(decoder) = decoder.as_ref() else { continue };
                handle_decoder_event(&inner, generation, decoder, &url, event, &mut budget, &mut pending);
            }

            event = surface_rx.recv() => match event {
                Ok(event) => handle_surface_event(&inner, generation, decoder.is_none(), event, &mut budget),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Session {} missed {} surface events", inner.id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Session {} surface event channel closed", inner.id);
                    break;
                }
            },

            _ = sleep_until_opt(pending.next_deadline()) => {
                let due = pending.take_due(Instant::now());
                if let Some(decoder) = decoder.as_ref() {
                    for action in due {
                        run_recovery(&inner, decoder, action);
                    }
                }
            }
        }
    }

    trace!("Session {} event loop for generation {} exited", inner.id, generation);
}

fn handle_decoder_event(
    inner: &SessionInner,
    generation: u64,
    decoder: &Arc<dyn Decoder>,
    url: &str,
    event: DecoderEvent,
    budget: &mut RecoveryBudget,
    pending: &mut PendingRecovery,
) {
    match event {
        DecoderEvent::MediaAttached => {
            debug!("Session {} media attached, loading {}", inner.id, url);
            if let Err(e) = decoder.load_source(url) {
                inner.fail(
                    generation,
                    ErrorClassification::fatal(
                        SessionErrorCategory::ManifestLoad,
                        format!("Failed to load source: {}", e),
                    ),
                );
            }
        }
        DecoderEvent::ManifestParsed { levels } => {
            debug!("Session {} manifest parsed with {} levels", inner.id, levels);
            inner.on_ready(generation, budget);
        }
        DecoderEvent::FragmentBuffered { sequence } => {
            trace!("Session {} buffered fragment {}", inner.id, sequence);
        }
        DecoderEvent::Error(error) => {
            let resolution = classify(&error);
            match resolution.action {
                RecoveryAction::Ignore => {
                    if error.details == ErrorDetails::FragLoadTimeout {
                        warn!("Session {} network buffering: {}", inner.id, error.message);
                    } else {
                        debug!(
                            "Session {} recoverable decoder error: {}",
                            inner.id, resolution.classification
                        );
                    }
                }
                RecoveryAction::Fail => inner.fail(generation, resolution.classification),
                action => match budget.schedule(action, &error) {
                    None => inner.fail(generation, recovery::exhausted(&resolution)),
                    Some(delay) => pending.push(delay, action),
                },
            }
        }
    }
}

fn handle_surface_event(
    inner: &SessionInner,
    generation: u64,
    native: bool,
    event: SurfaceEvent,
    budget: &mut RecoveryBudget,
) {
    match event {
        SurfaceEvent::LoadedMetadata => {
            if native {
                inner.on_ready(generation, budget);
            } else {
                trace!("Session {} metadata loaded", inner.id);
            }
        }
        SurfaceEvent::CanPlay | SurfaceEvent::Playing => inner.on_ready(generation, budget),
        SurfaceEvent::Waiting => {
            if inner.current_status(generation) == Some(SessionStatus::Ready) {
                inner.transition(generation, SessionStatus::Buffering);
            }
        }
        SurfaceEvent::Error { code, message } => {
            debug!("Session {} surface error {}: {}", inner.id, code, message);
            inner.fail(
                generation,
                ErrorClassification::fatal(
                    SessionErrorCategory::MediaDecode,
                    format!("Video playback error (Code: {})", code),
                ),
            );
        }
        SurfaceEvent::Ended => info!("Session {} reached end of stream", inner.id),
        SurfaceEvent::LoadedData | SurfaceEvent::TimeUpdate => {}
    }
}
