use crate::error::ErrorClassification;
use serde::Serialize;

/// Lifecycle state of a stream session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Initializing,
    Ready,
    Buffering,
    Error(ErrorClassification),
}

impl SessionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Initializing => "initializing",
            SessionStatus::Ready => "ready",
            SessionStatus::Buffering => "buffering",
            SessionStatus::Error(_) => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SessionStatus::Error(_))
    }

    /// Playback has started at least once and has not failed
    pub fn is_playing(&self) -> bool {
        matches!(self, SessionStatus::Ready | SessionStatus::Buffering)
    }

    /// Whether the state machine permits moving to `next`
    ///
    /// `Initializing` is reachable from anywhere because it is only entered
    /// through an explicit start.
    pub fn can_transition_to(&self, next: &SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (_, Initializing) => true,
            (Initializing, Ready) | (Initializing, Error(_)) => true,
            (Ready, Buffering) | (Ready, Error(_)) => true,
            (Buffering, Ready) | (Buffering, Error(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Error(classification) => write!(f, "error ({})", classification),
            other => f.write_str(other.name()),
        }
    }
}

/// Serializable status snapshot for event consumers
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&SessionStatus> for StatusReport {
    fn from(status: &SessionStatus) -> Self {
        let message = match status {
            SessionStatus::Error(classification) => Some(classification.user_message()),
            _ => None,
        };
        Self {
            status: status.name(),
            message,
        }
    }
}

/// How a started session settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Reached Ready (or already buffering after Ready)
    Ready,
    Failed(ErrorClassification),
    /// Destroyed before it settled
    Destroyed,
}
