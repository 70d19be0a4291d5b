use chrono::{DateTime, Utc};
use tracing::debug;

use crate::track::Track;

/// Emitted once for every distinct track the stream switches to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackChange {
    pub track: Track,
    pub emitted_at: DateTime<Utc>,
}

/// Remembers the last reported track so a track that plays across many poll iterations is only
/// reported once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScrobbleState {
    #[default]
    NoTrack,
    Tracking(Track),
}

impl ScrobbleState {
    /// Starts in [`ScrobbleState::NoTrack`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently reported track.
    pub fn last_track(&self) -> Option<&Track> {
        match self {
            Self::NoTrack => None,
            Self::Tracking(track) => Some(track),
        }
    }

    /// Feeds the result of one poll iteration into the state machine.
    ///
    /// An absent track never counts as the end of the current one; metadata only shows up every
    /// few seconds, so most iterations observe nothing.
    pub fn observe(&mut self, track: Option<Track>, now: DateTime<Utc>) -> Option<TrackChange> {
        let track = track?;
        if self.last_track() == Some(&track) {
            return None;
        }
        debug!(previous = ?self.last_track(), current = %track, "track changed");
        *self = Self::Tracking(track.clone());
        Some(TrackChange {
            track,
            emitted_at: now,
        })
    }
}
