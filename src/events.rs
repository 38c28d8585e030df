use crate::error::EventBusError;
use crate::media::SessionId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events published by the player for UI consumers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// A new session was started for a source
    SourceSwitched {
        session_id: SessionId,
        source: String,
        live: bool,
        timestamp: DateTime<Utc>,
    },
    /// A session changed status
    StatusChanged {
        session_id: SessionId,
        status: String,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A source switch failed; playback may have reverted
    SwitchFailed {
        source: String,
        error: String,
        reverted_to: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Whether snapshot and recording are currently possible
    CaptureAvailabilityChanged { available: bool },
    SnapshotCaptured {
        artifact_id: String,
        bytes: usize,
        timestamp: DateTime<Utc>,
    },
    RecordingStarted {
        mime_type: String,
        timestamp: DateTime<Utc>,
    },
    RecordingStopped {
        artifact_id: String,
        chunks: usize,
        bytes: usize,
        timestamp: DateTime<Utc>,
    },
    /// A preview sample finished, successfully or not
    PreviewCompleted {
        camera_id: String,
        success: bool,
        reason: Option<String>,
    },
    /// A component reported an error outside any session
    SystemError { component: String, error: String },
    ShutdownRequested {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            PlayerEvent::SourceSwitched {
                session_id, source, ..
            } => format!("Session {} switched to {}", session_id, source),
            PlayerEvent::StatusChanged {
                session_id, status, ..
            } => format!("Session {} is {}", session_id, status),
            PlayerEvent::SwitchFailed {
                source,
                error,
                reverted_to,
                ..
            } => match reverted_to {
                Some(previous) => format!(
                    "Switch to {} failed ({}), reverted to {}",
                    source, error, previous
                ),
                None => format!("Switch to {} failed: {}", source, error),
            },
            PlayerEvent::CaptureAvailabilityChanged { available } => format!(
                "Capture {}",
                if *available { "available" } else { "unavailable" }
            ),
            PlayerEvent::SnapshotCaptured { bytes, .. } => {
                format!("Snapshot captured ({} bytes)", bytes)
            }
            PlayerEvent::RecordingStarted { mime_type, .. } => {
                format!("Recording started as {}", mime_type)
            }
            PlayerEvent::RecordingStopped { chunks, bytes, .. } => {
                format!("Recording stopped ({} chunks, {} bytes)", chunks, bytes)
            }
            PlayerEvent::PreviewCompleted {
                camera_id,
                success,
                reason,
            } => {
                if *success {
                    format!("Preview ready for {}", camera_id)
                } else {
                    format!(
                        "Preview failed for {}: {}",
                        camera_id,
                        reason.as_deref().unwrap_or("unknown")
                    )
                }
            }
            PlayerEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            PlayerEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::SourceSwitched { .. } => "source_switched",
            PlayerEvent::StatusChanged { .. } => "status_changed",
            PlayerEvent::SwitchFailed { .. } => "switch_failed",
            PlayerEvent::CaptureAvailabilityChanged { .. } => "capture_availability_changed",
            PlayerEvent::SnapshotCaptured { .. } => "snapshot_captured",
            PlayerEvent::RecordingStarted { .. } => "recording_started",
            PlayerEvent::RecordingStopped { .. } => "recording_stopped",
            PlayerEvent::PreviewCompleted { .. } => "preview_completed",
            PlayerEvent::SystemError { .. } => "system_error",
            PlayerEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }

    /// JSON form for forwarding to a UI process
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"type\":\"{}\",\"serialization_error\":\"{}\"}}",
                self.event_type(),
                e
            )
        })
    }
}

/// Event bus for player events using a broadcast channel
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlayerEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        Self {
            debug_logging: true,
            ..Self::new(capacity)
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Fails only when nobody is listening.
    pub fn publish(&self, event: PlayerEvent) -> Result<usize, EventBusError> {
        match &event {
            PlayerEvent::SwitchFailed { .. } => warn!("{}", event.description()),
            PlayerEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            PlayerEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Publishing event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish without caring whether anyone listens
    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.publish(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    /// Only events concerning one session
    Session(SessionId),
    Custom(fn(&PlayerEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &PlayerEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Session(id) => match event {
                PlayerEvent::SourceSwitched { session_id, .. }
                | PlayerEvent::StatusChanged { session_id, .. } => session_id == id,
                _ => false,
            },
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<PlayerEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<PlayerEvent>,
        filter: EventFilter,
        name: impl Into<String>,
    ) -> Self {
        Self {
            receiver,
            filter,
            name: name.into(),
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<PlayerEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<PlayerEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
