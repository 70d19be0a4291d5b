use std::fmt::{self, Debug, Display};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::SinkError;
use crate::state::TrackChange;
use crate::stream::USER_AGENT;
use crate::track::Track;

/// Builds the HTTP client shared by the sinks. A request that takes longer than
/// `request_timeout` fails with [`SinkError::Http`] instead of stalling the poller.
pub fn http_client(request_timeout: Duration) -> Result<reqwest::Client, SinkError> {
    Ok(reqwest::Client::builder()
        .timeout(request_timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// A listening-history service that records plays.
#[async_trait]
pub trait ScrobbleSink: Send + Sync {
    /// Records that `artist - title` started playing at `timestamp`.
    async fn report(
        &self,
        artist: &str,
        title: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SinkError>;
}

/// Opaque reference to an item in a playlist service's catalog.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemHandle(String);

impl ItemHandle {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A service that can look tracks up in its catalog and collect them in a playlist.
#[async_trait]
pub trait PlaylistSink: Send + Sync {
    /// Builds the catalog query for `track`.
    fn track_query(&self, track: &Track) -> String {
        format!("{} {}", track.artist(), track.title())
    }

    /// Returns the best match for `query`, or `None` if the catalog has nothing.
    async fn search(&self, query: &str) -> Result<Option<ItemHandle>, SinkError>;

    async fn append_to_playlist(
        &self,
        playlist_id: &str,
        items: &[ItemHandle],
    ) -> Result<(), SinkError>;
}

/// A playlist sink together with the playlist that receives new tracks.
pub struct PlaylistTarget {
    sink: Box<dyn PlaylistSink>,
    playlist_id: String,
}

impl PlaylistTarget {
    pub fn new<S: Into<String>>(sink: Box<dyn PlaylistSink>, playlist_id: S) -> Self {
        Self {
            sink,
            playlist_id: playlist_id.into(),
        }
    }
}

impl Debug for PlaylistTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistTarget")
            .field("sink", &"<sink>")
            .field("playlist_id", &self.playlist_id)
            .finish()
    }
}

/// What happened on the playlist side of a dispatch.
#[derive(Debug)]
pub enum PlaylistOutcome {
    NotConfigured,
    Added(ItemHandle),
    NotFound,
    Failed(SinkError),
}

/// Result of a single dispatch. Both sides are attempted regardless of the other.
#[derive(Debug)]
pub struct DispatchReport {
    pub scrobble: Result<(), SinkError>,
    pub playlist: PlaylistOutcome,
}

/// Forwards track changes to the scrobble sink and, if configured, the playlist sink.
pub struct SinkDispatcher {
    scrobble: Box<dyn ScrobbleSink>,
    playlist: Option<PlaylistTarget>,
}

impl Debug for SinkDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkDispatcher")
            .field("scrobble", &"<sink>")
            .field("playlist", &self.playlist)
            .finish()
    }
}

impl SinkDispatcher {
    pub fn new(scrobble: Box<dyn ScrobbleSink>) -> Self {
        Self {
            scrobble,
            playlist: None,
        }
    }

    /// Also add every new track to the playlist described by `target`.
    pub fn with_playlist(mut self, target: PlaylistTarget) -> Self {
        self.playlist = Some(target);
        self
    }

    pub fn has_playlist(&self) -> bool {
        self.playlist.is_some()
    }

    /// Reports `change` to every sink. Failures are logged and returned but never retried.
    pub async fn dispatch(&self, change: &TrackChange) -> DispatchReport {
        let TrackChange { track, emitted_at } = change;
        let (scrobble, playlist) = tokio::join!(
            self.scrobble(track, *emitted_at),
            self.add_to_playlist(track)
        );
        DispatchReport { scrobble, playlist }
    }

    async fn scrobble(&self, track: &Track, timestamp: DateTime<Utc>) -> Result<(), SinkError> {
        let result = self
            .scrobble
            .report(track.artist(), track.title(), timestamp)
            .await;
        match &result {
            Ok(()) => info!(artist = track.artist(), title = track.title(), "scrobbled"),
            Err(e) => error!(error = %e, %track, "failed to scrobble track"),
        }
        result
    }

    async fn add_to_playlist(&self, track: &Track) -> PlaylistOutcome {
        let Some(PlaylistTarget { sink, playlist_id }) = &self.playlist else {
            return PlaylistOutcome::NotConfigured;
        };

        let query = sink.track_query(track);
        let item = match sink.search(&query).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!(%track, %query, "track not found in playlist service");
                return PlaylistOutcome::NotFound;
            }
            Err(e) => {
                error!(error = %e, %track, "failed to search playlist service");
                return PlaylistOutcome::Failed(e);
            }
        };

        match sink
            .append_to_playlist(playlist_id, std::slice::from_ref(&item))
            .await
        {
            Ok(()) => {
                info!(%track, %item, playlist_id = playlist_id.as_str(), "added to playlist");
                PlaylistOutcome::Added(item)
            }
            Err(e) => {
                error!(error = %e, %track, %item, "failed to add track to playlist");
                PlaylistOutcome::Failed(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{RecordingPlaylist, RecordingScrobbler};
    use super::*;
    use crate::state::ScrobbleState;

    fn change(artist: &str, title: &str) -> TrackChange {
        TrackChange {
            track: Track::new(artist, title),
            emitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn scrobble_only() {
        let scrobbler = RecordingScrobbler::default();
        let dispatcher = SinkDispatcher::new(Box::new(scrobbler.clone()));
        let change = change("Artist", "Title");

        let report = dispatcher.dispatch(&change).await;
        assert!(report.scrobble.is_ok());
        assert!(matches!(report.playlist, PlaylistOutcome::NotConfigured));
        assert_eq!(
            *scrobbler.reports.lock().unwrap(),
            vec![(
                "Artist".to_string(),
                "Title".to_string(),
                change.emitted_at
            )]
        );
    }

    #[tokio::test]
    async fn adds_to_playlist() {
        let scrobbler = RecordingScrobbler::default();
        let playlist = RecordingPlaylist::default();
        let dispatcher = SinkDispatcher::new(Box::new(scrobbler.clone()))
            .with_playlist(PlaylistTarget::new(Box::new(playlist.clone()), "list"));

        let report = dispatcher.dispatch(&change("Artist", "Title")).await;
        assert!(report.scrobble.is_ok());
        let PlaylistOutcome::Added(item) = report.playlist else {
            panic!("expected item to be added");
        };
        assert_eq!(item.as_str(), "item:Artist Title");
        assert_eq!(
            *playlist.appended.lock().unwrap(),
            vec![("list".to_string(), vec![item])]
        );
    }

    #[tokio::test]
    async fn search_miss_is_not_a_failure() {
        let playlist = RecordingPlaylist {
            miss: true,
            ..Default::default()
        };
        let dispatcher = SinkDispatcher::new(Box::new(RecordingScrobbler::default()))
            .with_playlist(PlaylistTarget::new(Box::new(playlist.clone()), "list"));

        let report = dispatcher.dispatch(&change("Artist", "Title")).await;
        assert!(report.scrobble.is_ok());
        assert!(matches!(report.playlist, PlaylistOutcome::NotFound));
        assert!(playlist.appended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn playlist_failure_does_not_affect_scrobble_or_state() {
        let scrobbler = RecordingScrobbler::default();
        let playlist = RecordingPlaylist {
            fail: true,
            ..Default::default()
        };
        let dispatcher = SinkDispatcher::new(Box::new(scrobbler.clone()))
            .with_playlist(PlaylistTarget::new(Box::new(playlist), "list"));
        let mut state = ScrobbleState::new();

        let change = state
            .observe(Track::parse("Artist - Title"), Utc::now())
            .unwrap();
        let report = dispatcher.dispatch(&change).await;

        assert!(report.scrobble.is_ok());
        assert!(matches!(
            report.playlist,
            PlaylistOutcome::Failed(SinkError::Unauthorized(_))
        ));
        assert_eq!(scrobbler.reports.lock().unwrap().len(), 1);
        assert_eq!(state.last_track(), Some(&Track::new("Artist", "Title")));
        assert_eq!(state.observe(Track::parse("Artist - Title"), Utc::now()), None);
    }

    #[tokio::test]
    async fn scrobble_failure_does_not_affect_playlist() {
        let scrobbler = RecordingScrobbler {
            fail: true,
            ..Default::default()
        };
        let playlist = RecordingPlaylist::default();
        let dispatcher = SinkDispatcher::new(Box::new(scrobbler))
            .with_playlist(PlaylistTarget::new(Box::new(playlist.clone()), "list"));

        let report = dispatcher.dispatch(&change("Artist", "Title")).await;
        assert!(matches!(report.scrobble, Err(SinkError::Api { code: 11, .. })));
        assert!(matches!(report.playlist, PlaylistOutcome::Added(_)));
        assert_eq!(playlist.appended.lock().unwrap().len(), 1);
    }
}
