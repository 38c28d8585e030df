use crate::media::MediaTrack;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Stops the tracks of a capture stream exactly once
///
/// Every exit path of a recording (stop, recorder error, failed setup,
/// teardown) calls `release`; only the first call has any effect.
pub struct TrackGuard {
    tracks: Vec<Arc<dyn MediaTrack>>,
    released: AtomicBool,
}

impl TrackGuard {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            tracks,
            released: AtomicBool::new(false),
        }
    }

    /// Stop all tracks; returns false if they were already released
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        for track in &self.tracks {
            if !track.is_stopped() {
                track.stop();
            }
        }
        debug!("Released {} capture tracks", self.tracks.len());
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.release();
    }
}
