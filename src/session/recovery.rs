use crate::config::RecoveryConfig;
use crate::error::{ErrorClassification, SessionErrorCategory};
use crate::media::{DecoderError, DecoderErrorKind, ErrorDetails};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What the session does about a decoder error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
    /// Decoder handles it internally; log only
    Ignore,
    /// Ask the decoder to recover its media buffer
    RecoverMedia,
    /// Swap the audio codec, then recover the media buffer
    SwapCodecThenRecover,
    /// Re-request fragment data after a backoff
    ReloadFragments,
    /// Terminate the session
    Fail,
}

impl RecoveryAction {
    fn key(&self) -> &'static str {
        match self {
            RecoveryAction::Ignore => "ignore",
            RecoveryAction::RecoverMedia => "media",
            RecoveryAction::SwapCodecThenRecover => "codec",
            RecoveryAction::ReloadFragments => "network",
            RecoveryAction::Fail => "fail",
        }
    }
}

/// Classification and planned action for one decoder error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResolution {
    pub classification: ErrorClassification,
    pub action: RecoveryAction,
}

impl ErrorResolution {
    fn new(classification: ErrorClassification, action: RecoveryAction) -> Self {
        Self {
            classification,
            action,
        }
    }
}

/// Map a decoder error onto exactly one classification and action
///
/// Only errors the decoder itself gave up on can end a session; the
/// recoverable ones among those get an in-session recovery attempt first.
pub fn classify(error: &DecoderError) -> ErrorResolution {
    let detail = error.details.to_string();

    if !error.fatal {
        let category = match error.kind {
            DecoderErrorKind::Network => SessionErrorCategory::Network,
            _ => SessionErrorCategory::MediaDecode,
        };
        return ErrorResolution::new(
            ErrorClassification::recoverable(category, detail),
            RecoveryAction::Ignore,
        );
    }

    match &error.details {
        ErrorDetails::BufferStalled | ErrorDetails::BufferSeekOverHole => ErrorResolution::new(
            ErrorClassification::recoverable(SessionErrorCategory::MediaDecode, detail),
            RecoveryAction::RecoverMedia,
        ),
        ErrorDetails::FragParsingError => ErrorResolution::new(
            ErrorClassification::recoverable(SessionErrorCategory::MediaDecode, detail),
            RecoveryAction::SwapCodecThenRecover,
        ),
        ErrorDetails::FragLoadError | ErrorDetails::FragLoadTimeout => ErrorResolution::new(
            ErrorClassification::recoverable(SessionErrorCategory::Network, detail),
            RecoveryAction::ReloadFragments,
        ),
        ErrorDetails::ManifestLoadError
        | ErrorDetails::ManifestLoadTimeout
        | ErrorDetails::ManifestParsingError
        | ErrorDetails::LevelLoadError
        | ErrorDetails::LevelLoadTimeout => ErrorResolution::new(
            ErrorClassification::fatal(SessionErrorCategory::ManifestLoad, detail),
            RecoveryAction::Fail,
        ),
        ErrorDetails::ManifestIncompatibleCodecs | ErrorDetails::BufferAddCodecError => {
            ErrorResolution::new(
                ErrorClassification::fatal(SessionErrorCategory::Unsupported, detail),
                RecoveryAction::Fail,
            )
        }
        _ => {
            let category = match error.kind {
                DecoderErrorKind::Network => SessionErrorCategory::Network,
                _ => SessionErrorCategory::MediaDecode,
            };
            ErrorResolution::new(
                ErrorClassification::fatal(category, detail),
                RecoveryAction::Fail,
            )
        }
    }
}

/// Per-session recovery budget with exponential backoff
pub struct RecoveryBudget {
    config: RecoveryConfig,
    attempts: HashMap<&'static str, u32>,
}

impl RecoveryBudget {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            attempts: HashMap::new(),
        }
    }

    /// Reserve one attempt of `action`; returns the backoff to wait first,
    /// or `None` once the budget for that action is spent
    pub fn schedule(&mut self, action: RecoveryAction, error: &DecoderError) -> Option<Duration> {
        let key = action.key();
        let attempt = self.attempts.get(key).copied().unwrap_or(0);

        if attempt >= self.config.max_attempts {
            error!(
                "Maximum recovery attempts ({}) exceeded for {} errors: {}",
                self.config.max_attempts, key, error.details
            );
            return None;
        }

        self.attempts.insert(key, attempt + 1);
        let delay = self.calculate_delay(attempt);

        info!(
            "Scheduling {} recovery (attempt {}/{}) in {:?}: {}",
            key,
            attempt + 1,
            self.config.max_attempts,
            delay,
            error.details
        );

        Some(delay)
    }

    /// Forget past attempts after playback resumed
    pub fn reset(&mut self) {
        if !self.attempts.is_empty() {
            debug!("Playback resumed, resetting recovery budget");
            self.attempts.clear();
        }
    }

    pub fn attempts(&self, action: RecoveryAction) -> u32 {
        self.attempts.get(action.key()).copied().unwrap_or(0)
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        let delay = Duration::from_millis(delay_ms);

        if delay > self.config.max_delay() {
            self.config.max_delay()
        } else {
            delay
        }
    }
}

/// Escalated classification once recovery gave up
pub fn exhausted(resolution: &ErrorResolution) -> ErrorClassification {
    warn!(
        "Recovery exhausted for {}, treating as fatal",
        resolution.classification.detail
    );
    ErrorClassification::fatal(
        resolution.classification.category,
        format!("{} (recovery failed)", resolution.classification.detail),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;

    fn fatal(kind: DecoderErrorKind, details: ErrorDetails) -> DecoderError {
        DecoderError::new(kind, details, true)
    }

    #[test]
    fn test_non_fatal_errors_are_ignored() {
        let resolution = classify(&DecoderError::new(
            DecoderErrorKind::Network,
            ErrorDetails::FragLoadTimeout,
            false,
        ));

        assert_eq!(resolution.action, RecoveryAction::Ignore);
        assert_eq!(resolution.classification.severity, Severity::Recoverable);
        assert_eq!(resolution.classification.category, SessionErrorCategory::Network);
    }

    #[test]
    fn test_fatal_classification_table() {
        let cases = [
            (DecoderErrorKind::Media, ErrorDetails::BufferStalled, RecoveryAction::RecoverMedia),
            (DecoderErrorKind::Media, ErrorDetails::BufferSeekOverHole, RecoveryAction::RecoverMedia),
            (DecoderErrorKind::Media, ErrorDetails::FragParsingError, RecoveryAction::SwapCodecThenRecover),
            (DecoderErrorKind::Network, ErrorDetails::FragLoadError, RecoveryAction::ReloadFragments),
            (DecoderErrorKind::Network, ErrorDetails::ManifestLoadError, RecoveryAction::Fail),
            (DecoderErrorKind::Network, ErrorDetails::LevelLoadTimeout, RecoveryAction::Fail),
            (DecoderErrorKind::Media, ErrorDetails::ManifestIncompatibleCodecs, RecoveryAction::Fail),
            (DecoderErrorKind::Other, ErrorDetails::InternalException, RecoveryAction::Fail),
        ];

        for (kind, details, expected) in cases {
            let resolution = classify(&fatal(kind, details.clone()));
            assert_eq!(resolution.action, expected, "{}", details);
            assert_eq!(
                resolution.classification.is_fatal(),
                expected == RecoveryAction::Fail,
                "{}",
                details
            );
        }
    }

    #[test]
    fn test_fatal_categories() {
        let manifest = classify(&fatal(DecoderErrorKind::Network, ErrorDetails::ManifestParsingError));
        assert_eq!(manifest.classification.category, SessionErrorCategory::ManifestLoad);

        let codecs = classify(&fatal(DecoderErrorKind::Media, ErrorDetails::BufferAddCodecError));
        assert_eq!(codecs.classification.category, SessionErrorCategory::Unsupported);

        let other = classify(&fatal(
            DecoderErrorKind::Network,
            ErrorDetails::Other("keyLoadError".to_string()),
        ));
        assert_eq!(other.classification.category, SessionErrorCategory::Network);
        assert_eq!(other.classification.detail, "keyLoadError");

        let media = classify(&fatal(DecoderErrorKind::Mux, ErrorDetails::BufferAppendError));
        assert_eq!(media.classification.category, SessionErrorCategory::MediaDecode);
    }

    #[test]
    fn test_budget_backoff_and_exhaustion() {
        let mut budget = RecoveryBudget::new(RecoveryConfig {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 1_500,
        });
        let error = fatal(DecoderErrorKind::Network, ErrorDetails::FragLoadError);

        assert_eq!(
            budget.schedule(RecoveryAction::ReloadFragments, &error),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            budget.schedule(RecoveryAction::ReloadFragments, &error),
            Some(Duration::from_millis(1_000))
        );
        assert_eq!(
            budget.schedule(RecoveryAction::ReloadFragments, &error),
            Some(Duration::from_millis(1_500))
        );
        assert_eq!(budget.schedule(RecoveryAction::ReloadFragments, &error), None);

        // Separate budget per action
        assert!(budget.schedule(RecoveryAction::RecoverMedia, &error).is_some());

        budget.reset();
        assert_eq!(budget.attempts(RecoveryAction::ReloadFragments), 0);
    }

    #[test]
    fn test_exhausted_escalates_to_fatal() {
        let resolution = classify(&fatal(DecoderErrorKind::Media, ErrorDetails::BufferStalled));
        let escalated = exhausted(&resolution);

        assert!(escalated.is_fatal());
        assert_eq!(escalated.category, SessionErrorCategory::MediaDecode);
        assert!(escalated.detail.starts_with("bufferStalledError"));
    }
}
