use super::selection::Selection;
use crate::config::PlayerConfig;
use crate::directory::RecordingLookup;
use crate::error::{PlayerError, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::media::{DecoderFactory, RenderSurface};
use crate::session::{SessionOptions, SessionStatus, SettleOutcome, StatusReport, StreamSession};
use crate::source::{validate_url, RangePolicy, StreamSource, TimeRange};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct ControllerState {
    session: Option<StreamSession>,
    selection: Selection,
    last_good: Option<StreamSource>,
    switch_seq: u64,
}

/// Owns the player's current session and mediates source changes
///
/// At most one session is attached to the surface at a time: every switch
/// destroys the previous session before the next one starts.
pub struct PlaybackController {
    decoders: Arc<dyn DecoderFactory>,
    surface: Arc<dyn RenderSurface>,
    options: SessionOptions,
    policy: RangePolicy,
    events: Option<EventBus>,
    state: Mutex<ControllerState>,
}

impl PlaybackController {
    pub fn new(
        decoders: Arc<dyn DecoderFactory>,
        surface: Arc<dyn RenderSurface>,
        config: &PlayerConfig,
    ) -> Self {
        Self::with_options(
            decoders,
            surface,
            SessionOptions::playback(config),
            RangePolicy::new(config.playback.clock_skew_tolerance()),
        )
    }

    pub fn with_options(
        decoders: Arc<dyn DecoderFactory>,
        surface: Arc<dyn RenderSurface>,
        options: SessionOptions,
        policy: RangePolicy,
    ) -> Self {
        Self {
            decoders,
            surface,
            options,
            policy,
            events: None,
            state: Mutex::new(ControllerState {
                session: None,
                selection: Selection::Idle,
                last_good: None,
                switch_seq: 0,
            }),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Show the live feed at `live_url`
    ///
    /// A no-op when that feed is already selected and its session is healthy.
    pub async fn switch_to_live(&self, live_url: &str) -> Result<()> {
        validate_url(live_url)?;
        {
            let state = self.state.lock();
            let healthy = state
                .session
                .as_ref()
                .map(|session| !session.status().is_error())
                .unwrap_or(false);
            if healthy && state.selection.is_live_on(live_url) {
                debug!("Already playing live {}", live_url);
                return Ok(());
            }
        }
        self.switch_source(StreamSource::live(live_url)).await
    }

    /// Show the recording at `url` covering `start..end`
    ///
    /// The range is validated before anything is torn down.
    pub async fn switch_to_range(
        &self,
        url: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let range = TimeRange::new(start, end);
        self.policy.validate(&range)?;
        validate_url(url)?;
        self.switch_source(StreamSource::range(url, range)).await
    }

    /// Resolve a recording through `lookup` and switch to it
    ///
    /// Nothing is requested for an invalid range, and a failed lookup leaves
    /// the current playback untouched.
    pub async fn search_recording(
        &self,
        lookup: &dyn RecordingLookup,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let range = TimeRange::new(start, end);
        self.policy.validate(&range)?;

        let url = lookup
            .resolve(camera_id, &range)
            .await
            .map_err(|e| match e {
                PlayerError::Lookup { .. } => e,
                other => PlayerError::lookup(camera_id.to_string(), other.to_string()),
            })?;
        info!("Recording for {} resolved to {}", camera_id, url);

        self.switch_to_range(&url, start, end).await
    }

    pub fn current_selection(&self) -> Selection {
        self.state.lock().selection.clone()
    }

    /// Status of the current session, `Idle` when there is none
    pub fn status(&self) -> SessionStatus {
        self.state
            .lock()
            .session
            .as_ref()
            .map(StreamSession::status)
            .unwrap_or(SessionStatus::Idle)
    }

    pub fn active_session(&self) -> Option<StreamSession> {
        self.state.lock().session.clone()
    }

    pub fn surface(&self) -> Arc<dyn RenderSurface> {
        Arc::clone(&self.surface)
    }

    pub fn play(&self) -> Result<()> {
        self.require_playing()?;
        self.surface.play()?;
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.require_playing()?;
        self.surface.pause();
        Ok(())
    }

    pub fn seek(&self, position: Duration) -> Result<()> {
        self.require_playing()?;
        self.surface.seek(position)?;
        Ok(())
    }

    /// Destroy the current session and return to `Idle`
    pub fn shutdown(&self) {
        let session = {
            let mut state = self.state.lock();
            state.switch_seq += 1;
            state.selection = Selection::Idle;
            state.session.take()
        };
        if let Some(session) = session {
            session.destroy();
        }
        self.emit(PlayerEvent::ShutdownRequested {
            reason: "playback controller shut down".to_string(),
            timestamp: Utc::now(),
        });
    }

    fn require_playing(&self) -> Result<()> {
        match self.status() {
            status if status.is_playing() => Ok(()),
            status => Err(PlayerError::system(format!(
                "no playable session (status: {})",
                status
            ))),
        }
    }

    async fn switch_source(&self, source: StreamSource) -> Result<()> {
        let (seq, session) = {
            let mut state = self.state.lock();
            state.switch_seq += 1;
            if let Some(previous) = state.session.take() {
                debug!("Replacing session {}", previous.id());
                previous.destroy();
            }
            let session = self.start_session(&source);
            state.session = Some(session.clone());
            state.selection = Selection::from(&source);
            (state.switch_seq, session)
        };

        match session.wait_settled().await {
            SettleOutcome::Ready => {
                let mut state = self.state.lock();
                if state.switch_seq == seq {
                    state.last_good = Some(source);
                }
                Ok(())
            }
            SettleOutcome::Destroyed => {
                debug!("Switch to {} superseded", source.url);
                Err(PlayerError::Superseded)
            }
            SettleOutcome::Failed(classification) => {
                let reverted_to = self.revert_after_failure(seq, &source);
                self.emit(PlayerEvent::SwitchFailed {
                    source: source.url.clone(),
                    error: classification.user_message(),
                    reverted_to: reverted_to.clone(),
                    timestamp: Utc::now(),
                });
                Err(PlayerError::session(classification, reverted_to))
            }
        }
    }

    /// Restore the last source that played, unless a newer switch happened
    fn revert_after_failure(&self, seq: u64, failed: &StreamSource) -> Option<String> {
        let mut state = self.state.lock();
        if state.switch_seq != seq {
            return None;
        }

        match state.last_good.clone() {
            Some(previous) if previous != *failed => {
                warn!(
                    "Switch to {} failed, reverting to {}",
                    failed.url, previous.url
                );
                state.switch_seq += 1;
                if let Some(failed_session) = state.session.take() {
                    failed_session.destroy();
                }
                let session = self.start_session(&previous);
                state.session = Some(session);
                state.selection = Selection::from(&previous);
                Some(previous.url)
            }
            _ => {
                state.selection = Selection::Idle;
                None
            }
        }
    }

    fn start_session(&self, source: &StreamSource) -> StreamSession {
        let session = StreamSession::new(
            Arc::clone(&self.decoders),
            Arc::clone(&self.surface),
            self.options.clone(),
        );

        if let Some(events) = self.events.clone() {
            let session_id = session.id();
            session.on_status_change(move |status| {
                let report = StatusReport::from(status);
                events.emit(PlayerEvent::StatusChanged {
                    session_id,
                    status: report.status.to_string(),
                    message: report.message,
                    timestamp: Utc::now(),
                });
            });
        }

        session.start(source.clone());
        self.emit(PlayerEvent::SourceSwitched {
            session_id: session.id(),
            source: source.url.clone(),
            live: source.is_live(),
            timestamp: Utc::now(),
        });
        session
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Some(session) = self.state.get_mut().session.take() {
            session.destroy();
        }
    }
}
