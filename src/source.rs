use crate::error::ValidationError;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed time range addressed by a recording source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Build a range from Unix seconds, as used by the recording lookup
    pub fn from_unix(start: i64, end: i64) -> Option<Self> {
        let start = Utc.timestamp_opt(start, 0).single()?;
        let end = Utc.timestamp_opt(end, 0).single()?;
        Some(Self { start, end })
    }

    pub fn start_unix(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_unix(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn duration(&self) -> ChronoDuration {
        self.end - self.start
    }
}

/// What a stream source plays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Live,
    TimeRange(TimeRange),
}

/// Source assigned to one stream session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource {
    pub url: String,
    pub kind: SourceKind,
}

impl StreamSource {
    pub fn live<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            kind: SourceKind::Live,
        }
    }

    pub fn range<S: Into<String>>(url: S, range: TimeRange) -> Self {
        Self {
            url: url.into(),
            kind: SourceKind::TimeRange(range),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.kind, SourceKind::Live)
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            SourceKind::Live => format!("live {}", self.url),
            SourceKind::TimeRange(range) => format!(
                "recording {} [{} - {}]",
                self.url,
                range.start.format("%Y-%m-%d %H:%M:%S"),
                range.end.format("%Y-%m-%d %H:%M:%S")
            ),
        }
    }
}

/// Client-side checks applied before a range is ever requested
#[derive(Debug, Clone, Copy)]
pub struct RangePolicy {
    pub clock_skew_tolerance: Duration,
}

impl Default for RangePolicy {
    fn default() -> Self {
        Self {
            clock_skew_tolerance: Duration::from_secs(5 * 60),
        }
    }
}

impl RangePolicy {
    pub fn new(clock_skew_tolerance: Duration) -> Self {
        Self {
            clock_skew_tolerance,
        }
    }

    pub fn validate(&self, range: &TimeRange) -> Result<(), ValidationError> {
        self.validate_at(range, Utc::now())
    }

    pub fn validate_at(&self, range: &TimeRange, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if range.end <= range.start {
            return Err(ValidationError::EmptyRange {
                start: range.start_unix(),
                end: range.end_unix(),
            });
        }

        let tolerance = ChronoDuration::from_std(self.clock_skew_tolerance)
            .unwrap_or_else(|_| ChronoDuration::minutes(5));
        let latest = now + tolerance;

        for bound in [range.start, range.end] {
            if bound > latest {
                return Err(ValidationError::FutureBound {
                    bound: bound.timestamp(),
                    now: now.timestamp(),
                    tolerance_secs: tolerance.num_seconds(),
                });
            }
        }

        Ok(())
    }
}

/// Reject urls that cannot possibly name a manifest
///
/// Relative and path-only manifests are accepted; the decoder resolves them.
pub fn validate_url(url: &str) -> Result<(), ValidationError> {
    let dangling_scheme = url
        .split_once("://")
        .map(|(scheme, rest)| scheme.is_empty() || rest.is_empty())
        .unwrap_or(false);
    if url.is_empty() || dangling_scheme || url.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidUrl {
            url: url.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_inverted_range_rejected() {
        let policy = RangePolicy::default();
        let range = TimeRange::new(at(1000), at(500));

        assert_eq!(
            policy.validate_at(&range, at(10_000)),
            Err(ValidationError::EmptyRange {
                start: 1000,
                end: 500
            })
        );
    }

    #[test]
    fn test_zero_length_range_rejected() {
        let policy = RangePolicy::default();
        let range = TimeRange::new(at(1000), at(1000));
        assert!(policy.validate_at(&range, at(10_000)).is_err());
    }

    #[test]
    fn test_future_bound_beyond_tolerance_rejected() {
        let policy = RangePolicy::default();
        let now = at(100_000);
        let range = TimeRange::new(at(99_000), at(100_000 + 301));

        assert!(matches!(
            policy.validate_at(&range, now),
            Err(ValidationError::FutureBound { .. })
        ));
    }

    #[test]
    fn test_future_bound_within_tolerance_accepted() {
        let policy = RangePolicy::default();
        let now = at(100_000);
        let range = TimeRange::new(at(99_000), at(100_000 + 299));

        assert!(policy.validate_at(&range, now).is_ok());
    }

    #[test]
    fn test_unix_round_trip() {
        let range = TimeRange::from_unix(1_700_000_000, 1_700_000_600).unwrap();
        assert_eq!(range.start_unix(), 1_700_000_000);
        assert_eq!(range.end_unix(), 1_700_000_600);
        assert_eq!(range.duration().num_seconds(), 600);
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/live.m3u8").is_ok());
        assert!(validate_url("").is_err());
        assert!(validate_url("bad url").is_err());
        assert!(validate_url("http://").is_err());
        assert!(validate_url("://cams/front.m3u8").is_err());
        assert!(validate_url("live.m3u8").is_ok());
        assert!(validate_url("/hls/front/index.m3u8").is_ok());
    }
}
