//! Streaming-service client abstraction and concrete implementations.

pub mod dry_run;
pub mod http;
pub mod spotify;
pub mod tidal;

use log::{debug, info};

use crate::config::{Config, MusicService};
use crate::credentials;
use crate::models::{PlaybackSnapshot, Track};

/// Largest page any backend serves for liked-track listings.
pub const MAX_PAGE_SIZE: usize = 50;

/// Failure talking to a streaming backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("no active playback device")]
    NoActiveDevice,
    #[error("rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("API error (status {status}): {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Parse(err.to_string())
    }
}

/// Capability contract every streaming backend satisfies.
///
/// Retrieval of liked tracks reports failures to the caller; top-track lookup,
/// queueing and playback queries swallow failures (after logging) so one bad
/// call never interrupts a poll cycle.
pub trait MusicServiceClient: Send {
    /// Display name of the backend, also used to key the on-disk cache.
    fn service_name(&self) -> &str;

    /// Id of the authenticated user. Resolved once, then cached.
    fn user_id(&self) -> Result<String, BackendError>;

    /// One page of liked tracks, newest first. `limit` is capped at `MAX_PAGE_SIZE`.
    fn get_liked_songs(&self, limit: usize, offset: usize) -> Result<Vec<Track>, BackendError>;

    /// Up to `limit` of the artist's top tracks. Empty on any failure.
    fn get_artist_top_tracks(&self, artist_id: &str, limit: usize, country: &str) -> Vec<Track>;

    /// Appends a track to the playback queue. `false` on any failure.
    fn add_to_queue(&self, track_uri: &str) -> bool;

    /// What is playing right now, or `None` when nothing is or the lookup failed.
    fn get_current_playback(&self) -> Option<PlaybackSnapshot>;

    /// Pages through liked tracks until an empty page or `max_tracks` are collected.
    fn get_all_liked_songs(&self, max_tracks: usize) -> Result<Vec<Track>, BackendError> {
        let mut tracks: Vec<Track> = Vec::new();
        let mut offset = 0usize;
        while offset < max_tracks {
            let batch = self.get_liked_songs(MAX_PAGE_SIZE, offset)?;
            if batch.is_empty() {
                break;
            }
            tracks.extend(batch);
            offset = offset.saturating_add(MAX_PAGE_SIZE);
            debug!("Fetched {} liked songs so far...", tracks.len());
        }
        tracks.truncate(max_tracks);
        Ok(tracks)
    }

    /// The `count` most recently liked tracks (at most one page), newest first.
    fn get_recently_liked_songs(&self, count: usize) -> Result<Vec<Track>, BackendError> {
        self.get_liked_songs(count.min(MAX_PAGE_SIZE), 0)
    }

    /// Queues each uri in order; returns how many were accepted.
    fn add_tracks_to_queue(&self, track_uris: &[String]) -> usize {
        track_uris
            .iter()
            .filter(|uri| self.add_to_queue(uri))
            .count()
    }

    fn is_playing(&self) -> bool {
        self.get_current_playback()
            .is_some_and(|playback| playback.is_playing)
    }
}

impl<C: MusicServiceClient + ?Sized> MusicServiceClient for Box<C> {
    fn service_name(&self) -> &str {
        (**self).service_name()
    }

    fn user_id(&self) -> Result<String, BackendError> {
        (**self).user_id()
    }

    fn get_liked_songs(&self, limit: usize, offset: usize) -> Result<Vec<Track>, BackendError> {
        (**self).get_liked_songs(limit, offset)
    }

    fn get_artist_top_tracks(&self, artist_id: &str, limit: usize, country: &str) -> Vec<Track> {
        (**self).get_artist_top_tracks(artist_id, limit, country)
    }

    fn add_to_queue(&self, track_uri: &str) -> bool {
        (**self).add_to_queue(track_uri)
    }

    fn get_current_playback(&self) -> Option<PlaybackSnapshot> {
        (**self).get_current_playback()
    }

    fn get_all_liked_songs(&self, max_tracks: usize) -> Result<Vec<Track>, BackendError> {
        (**self).get_all_liked_songs(max_tracks)
    }

    fn get_recently_liked_songs(&self, count: usize) -> Result<Vec<Track>, BackendError> {
        (**self).get_recently_liked_songs(count)
    }

    fn is_playing(&self) -> bool {
        (**self).is_playing()
    }
}

/// Builds the client for `config.service` with credentials from env or keyring.
pub fn create_music_client(
    config: &Config,
    http_logging: bool,
) -> Result<Box<dyn MusicServiceClient>, BackendError> {
    match config.service {
        MusicService::Spotify => {
            info!("Using Spotify as music service");
            let tokens = credentials::load_tokens(MusicService::Spotify)
                .map_err(BackendError::MissingCredentials)?;
            Ok(Box::new(spotify::SpotifyClient::new(
                config.spotify.clone(),
                tokens,
                http_logging,
            )?))
        }
        MusicService::Tidal => {
            info!("Using Tidal as music service");
            let tokens = credentials::load_tokens(MusicService::Tidal)
                .map_err(BackendError::MissingCredentials)?;
            Ok(Box::new(tidal::TidalClient::new(
                config.tidal.clone(),
                tokens,
                http_logging,
            )?))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockClient;
    use super::MusicServiceClient;
    use crate::models::fixtures::track;
    use crate::models::PlaybackSnapshot;

    fn liked(count: usize) -> Vec<crate::models::Track> {
        (0..count)
            .map(|index| track(&format!("t{index}"), &["a"]))
            .collect()
    }

    #[test]
    fn test_get_all_liked_songs_pages_until_empty_page() {
        let client = MockClient::new("user").with_liked(liked(120));
        let tracks = client.get_all_liked_songs(500).expect("mock never fails");

        assert_eq!(tracks.len(), 120);
        assert_eq!(
            *client.liked_page_calls.borrow(),
            vec![(50, 0), (50, 50), (50, 100), (50, 150)]
        );
    }

    #[test]
    fn test_get_all_liked_songs_truncates_to_max_tracks() {
        let client = MockClient::new("user").with_liked(liked(120));
        let tracks = client.get_all_liked_songs(60).expect("mock never fails");

        assert_eq!(tracks.len(), 60);
        assert_eq!(tracks[59].id, "t59");
        assert_eq!(*client.liked_page_calls.borrow(), vec![(50, 0), (50, 50)]);
    }

    #[test]
    fn test_get_all_liked_songs_propagates_page_errors() {
        let client = MockClient::new("user").with_liked(liked(10));
        *client.fail_liked.borrow_mut() = true;
        assert!(client.get_all_liked_songs(100).is_err());
    }

    #[test]
    fn test_recently_liked_songs_is_one_capped_page() {
        let client = MockClient::new("user").with_liked(liked(80));
        let recent = client.get_recently_liked_songs(75).expect("mock never fails");

        assert_eq!(recent.len(), 50);
        assert_eq!(recent[0].id, "t0");
        assert_eq!(*client.liked_page_calls.borrow(), vec![(50, 0)]);
    }

    #[test]
    fn test_is_playing_requires_active_snapshot() {
        let mut client = MockClient::new("user");
        assert!(!client.is_playing());

        client.playback = Some(PlaybackSnapshot {
            is_playing: false,
            ..PlaybackSnapshot::default()
        });
        assert!(!client.is_playing());

        client.playback = Some(PlaybackSnapshot {
            is_playing: true,
            ..PlaybackSnapshot::default()
        });
        assert!(client.is_playing());
    }

    #[test]
    fn test_add_tracks_to_queue_counts_successes() {
        let mut client = MockClient::new("user");
        let uris = vec!["u1".to_string(), "u2".to_string()];
        assert_eq!(client.add_tracks_to_queue(&uris), 2);

        client.queue_accepts = false;
        assert_eq!(client.add_tracks_to_queue(&uris), 0);
    }
}
