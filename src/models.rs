//! Backend-neutral track/artist payloads and rule-evaluation records.

use std::collections::HashSet;

use chrono::{DateTime, Local, Utc};

/// Artist credited on a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub uri: String,
}

/// Track as returned by a streaming backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub uri: String,
    /// Credited artists in backend order.
    pub artists: Vec<Artist>,
    /// When the user liked the track, if the backend reports it.
    pub liked_at: Option<DateTime<Utc>>,
}

impl Track {
    /// Ids of every credited artist.
    pub fn artist_ids(&self) -> HashSet<String> {
        self.artists.iter().map(|artist| artist.id.clone()).collect()
    }

    /// Credited artist names in backend order.
    pub fn artist_names(&self) -> Vec<&str> {
        self.artists.iter().map(|artist| artist.name.as_str()).collect()
    }

    /// Returns `true` when more than one artist is credited.
    pub fn is_collaboration(&self) -> bool {
        self.artists.len() > 1
    }

    /// `"Name by A, B"` label used in log lines.
    pub fn display_label(&self) -> String {
        format!("{} by {}", self.name, self.artist_names().join(", "))
    }
}

/// Inputs handed to every scrape rule for one track evaluation.
#[derive(Debug, Clone)]
pub struct ScrapeContext<'a> {
    pub track: &'a Track,
    pub known_artist_ids: &'a HashSet<String>,
    pub user_id: &'a str,
    pub evaluated_at: DateTime<Local>,
}

impl<'a> ScrapeContext<'a> {
    pub fn new(track: &'a Track, known_artist_ids: &'a HashSet<String>, user_id: &'a str) -> Self {
        Self {
            track,
            known_artist_ids,
            user_id,
            evaluated_at: Local::now(),
        }
    }
}

/// Decision produced by the rules engine for one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeResult {
    pub should_scrape: bool,
    pub reason: String,
    pub artists_to_scrape: Vec<Artist>,
}

impl ScrapeResult {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_scrape: false,
            reason: reason.into(),
            artists_to_scrape: Vec::new(),
        }
    }
}

/// Snapshot of what the user's account is currently playing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub track_name: Option<String>,
    pub artist_names: Vec<String>,
    pub device_name: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::track;

    #[test]
    fn test_artist_ids_collapse_duplicate_credits() {
        let single = track("t1", &["a", "a"]);
        assert_eq!(single.artist_ids().len(), 1);
        assert!(single.is_collaboration());
    }

    #[test]
    fn test_is_collaboration_requires_multiple_artists() {
        assert!(!track("t1", &["a"]).is_collaboration());
        assert!(track("t2", &["a", "b"]).is_collaboration());
        assert!(!track("t3", &[]).is_collaboration());
    }

    #[test]
    fn test_display_label_joins_artist_names_in_order() {
        assert_eq!(
            track("t1", &["b", "a"]).display_label(),
            "Track t1 by Artist b, Artist a"
        );
    }
}
