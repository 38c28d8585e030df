use crate::source::{SourceKind, StreamSource, TimeRange};

/// What the player is currently set to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Idle,
    Live { url: String },
    TimeRange { url: String, range: TimeRange },
}

impl Selection {
    pub fn url(&self) -> Option<&str> {
        match self {
            Selection::Idle => None,
            Selection::Live { url } | Selection::TimeRange { url, .. } => Some(url),
        }
    }

    pub fn source(&self) -> Option<StreamSource> {
        match self {
            Selection::Idle => None,
            Selection::Live { url } => Some(StreamSource::live(url.clone())),
            Selection::TimeRange { url, range } => Some(StreamSource::range(url.clone(), *range)),
        }
    }

    pub fn is_live_on(&self, live_url: &str) -> bool {
        matches!(self, Selection::Live { url } if url == live_url)
    }
}

impl From<&StreamSource> for Selection {
    fn from(source: &StreamSource) -> Self {
        match &source.kind {
            SourceKind::Live => Selection::Live {
                url: source.url.clone(),
            },
            SourceKind::TimeRange(range) => Selection::TimeRange {
                url: source.url.clone(),
                range: *range,
            },
        }
    }
}
