//! Client decorator that logs queue requests instead of sending them.

use log::info;

use super::{BackendError, MusicServiceClient};
use crate::models::{PlaybackSnapshot, Track};

/// Forwards every read to the wrapped client; `add_to_queue` only logs.
pub struct DryRunClient<C> {
    inner: C,
}

impl<C: MusicServiceClient> DryRunClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: MusicServiceClient> MusicServiceClient for DryRunClient<C> {
    fn service_name(&self) -> &str {
        self.inner.service_name()
    }

    fn user_id(&self) -> Result<String, BackendError> {
        self.inner.user_id()
    }

    fn get_liked_songs(&self, limit: usize, offset: usize) -> Result<Vec<Track>, BackendError> {
        self.inner.get_liked_songs(limit, offset)
    }

    fn get_artist_top_tracks(&self, artist_id: &str, limit: usize, country: &str) -> Vec<Track> {
        self.inner.get_artist_top_tracks(artist_id, limit, country)
    }

    fn add_to_queue(&self, track_uri: &str) -> bool {
        info!("[DRY RUN] Would queue: {track_uri}");
        true
    }

    fn get_current_playback(&self) -> Option<PlaybackSnapshot> {
        self.inner.get_current_playback()
    }
}
