//! Poll loop that detects newly liked tracks and queues collaborator top tracks.
//!
//! Streaming backends offer no change notifications, so the watcher keeps a
//! set of already-seen track ids and a set of known artist ids, diffs each
//! poll against them and persists both to a small JSON snapshot so restarts
//! neither re-trigger old likes nor miss likes made while offline.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};

use crate::backends::{BackendError, MusicServiceClient, MAX_PAGE_SIZE};
use crate::cache::CacheSnapshot;
use crate::config::ScrapingConfig;
use crate::models::{ScrapeContext, Track};
use crate::rules::{panic_message, ScrapeRulesEngine};
pub use crate::shutdown::StopHandle;

const RECENT_LIKES_PER_POLL: usize = 20;

/// Invoked with the triggering track and the tracks queued for it.
pub type ScrapeCallback = Box<dyn FnMut(&Track, &[Track]) + Send>;

/// Failure that prevents the watcher from starting.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to resolve current user: {0}")]
    Identity(#[source] BackendError),
    #[error("failed to build known artists index: {0}")]
    Index(#[source] BackendError),
}

/// Watches one account's liked tracks and reacts to new ones.
pub struct LikedSongsWatcher<C: MusicServiceClient> {
    client: C,
    rules_engine: ScrapeRulesEngine,
    settings: ScrapingConfig,
    on_scrape_triggered: Option<ScrapeCallback>,
    known_artist_ids: HashSet<String>,
    seen_track_ids: HashSet<String>,
    last_poll_time: Option<DateTime<Local>>,
    running: bool,
    stop_handle: StopHandle,
}

impl<C: MusicServiceClient> LikedSongsWatcher<C> {
    pub fn new(client: C, rules_engine: ScrapeRulesEngine, settings: ScrapingConfig) -> Self {
        Self {
            client,
            rules_engine,
            settings,
            on_scrape_triggered: None,
            known_artist_ids: HashSet::new(),
            seen_track_ids: HashSet::new(),
            last_poll_time: None,
            running: false,
            stop_handle: StopHandle::new(),
        }
    }

    pub fn with_callback(mut self, callback: ScrapeCallback) -> Self {
        self.on_scrape_triggered = Some(callback);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn known_artist_ids(&self) -> &HashSet<String> {
        &self.known_artist_ids
    }

    pub fn seen_track_ids(&self) -> &HashSet<String> {
        &self.seen_track_ids
    }

    pub fn last_poll_time(&self) -> Option<DateTime<Local>> {
        self.last_poll_time
    }

    pub fn is_running(&self) -> bool {
        self.running && !self.stop_handle.is_stopped()
    }

    /// Handle that stops the loop from another thread or from a callback.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    fn mark_seen(&mut self, track: &Track) {
        self.seen_track_ids.insert(track.id.clone());
        self.known_artist_ids.extend(track.artist_ids());
    }

    /// Loads a snapshot for `user_id` on this client's service into memory.
    fn load_cache(&mut self, user_id: &str) -> bool {
        if !self.settings.use_cache {
            return false;
        }
        let Some(snapshot) = CacheSnapshot::load(&self.settings.cache_file) else {
            return false;
        };
        if snapshot.user_id != user_id {
            info!("Cache is for different user, ignoring");
            return false;
        }
        if snapshot.service != self.client.service_name() {
            info!("Cache is for different service, ignoring");
            return false;
        }

        self.known_artist_ids.extend(snapshot.known_artist_set());
        self.seen_track_ids.extend(snapshot.seen_track_set());
        info!(
            "Loaded cache: {} known artists, {} seen tracks",
            self.known_artist_ids.len(),
            self.seen_track_ids.len()
        );
        true
    }

    fn save_cache(&self, user_id: &str) {
        let snapshot = CacheSnapshot::new(
            user_id,
            self.client.service_name(),
            &self.known_artist_ids,
            &self.seen_track_ids,
        );
        match snapshot.save(&self.settings.cache_file) {
            Ok(()) => debug!("Cache saved to {}", self.settings.cache_file.display()),
            Err(err) => warn!("Failed to save cache: {err}"),
        }
    }

    /// Fills the known-artist and seen-track sets, from cache when possible.
    ///
    /// A warm start also syncs the latest page of likes so tracks liked while
    /// the process was down are not reported as new.
    pub fn build_known_artists_index(&mut self) -> Result<&HashSet<String>, WatcherError> {
        let user_id = self.client.user_id().map_err(WatcherError::Identity)?;

        if self.load_cache(&user_id) {
            info!("Using cached known artists index, syncing recent likes");
            match self.client.get_recently_liked_songs(MAX_PAGE_SIZE) {
                Ok(recent) => {
                    let mut synced_count = 0usize;
                    for track in &recent {
                        if !self.seen_track_ids.contains(&track.id) {
                            self.mark_seen(track);
                            synced_count += 1;
                        }
                    }
                    if synced_count > 0 {
                        info!("Synced {synced_count} track(s) liked while offline");
                        self.save_cache(&user_id);
                    }
                }
                Err(err) => warn!("Failed to sync recent likes, keeping cached state: {err}"),
            }
            return Ok(&self.known_artist_ids);
        }

        info!(
            "Building known artists index from last {} liked songs...",
            self.settings.known_artists_scan_limit
        );
        let liked = self
            .client
            .get_all_liked_songs(self.settings.known_artists_scan_limit)
            .map_err(WatcherError::Index)?;
        for track in &liked {
            self.mark_seen(track);
        }
        info!(
            "Found {} known artists from {} liked songs",
            self.known_artist_ids.len(),
            liked.len()
        );
        self.save_cache(&user_id);
        Ok(&self.known_artist_ids)
    }

    /// Recent likes not yet seen, newest first. Does not mark them seen.
    pub fn check_for_new_likes(&self) -> Result<Vec<Track>, BackendError> {
        debug!("Fetching recent liked songs...");
        let recent = self.client.get_recently_liked_songs(RECENT_LIKES_PER_POLL)?;
        debug!(
            "Got {} recent tracks, {} seen so far",
            recent.len(),
            self.seen_track_ids.len()
        );

        let new_tracks: Vec<Track> = recent
            .into_iter()
            .filter(|track| !self.seen_track_ids.contains(&track.id))
            .collect();
        if new_tracks.is_empty() {
            debug!("No new tracks");
        } else {
            info!("Found {} new liked song(s):", new_tracks.len());
            for track in &new_tracks {
                info!("  {} (ID: {})", track.display_label(), track.id);
            }
        }
        Ok(new_tracks)
    }

    /// Runs the rules for `track` and queues top tracks of its new artists.
    ///
    /// The track is marked seen and its artists known whatever the outcome.
    pub fn process_new_track(&mut self, track: &Track) -> Vec<Track> {
        info!("Processing: {}", track.display_label());
        let user_id = self.client.user_id().unwrap_or_else(|err| {
            warn!("Could not resolve user id for rule context: {err}");
            String::new()
        });

        let result = {
            let context = ScrapeContext::new(track, &self.known_artist_ids, &user_id);
            self.rules_engine.evaluate(&context)
        };

        if !result.should_scrape {
            info!("  -> Skip: {}", result.reason);
            self.mark_seen(track);
            return Vec::new();
        }

        info!(
            "  -> Scraping top tracks for {} artist(s)...",
            result.artists_to_scrape.len()
        );
        let mut queued: Vec<Track> = Vec::new();
        for artist in &result.artists_to_scrape {
            info!("    Fetching top tracks for: {}", artist.name);
            let top_tracks = self.client.get_artist_top_tracks(
                &artist.id,
                self.settings.top_tracks_limit,
                &self.settings.market,
            );
            for candidate in top_tracks {
                if candidate.id == track.id {
                    continue;
                }
                if self.seen_track_ids.contains(&candidate.id) {
                    debug!("      Skipping already-liked: {}", candidate.name);
                    continue;
                }
                if queued.iter().any(|already| already.id == candidate.id) {
                    continue;
                }
                if self.client.add_to_queue(&candidate.uri) {
                    info!("    Queued: {}", candidate.name);
                    queued.push(candidate);
                } else {
                    warn!("    Failed to queue: {}", candidate.name);
                }
            }
        }

        self.mark_seen(track);
        self.save_cache(&user_id);

        if !queued.is_empty() {
            if let Some(callback) = self.on_scrape_triggered.as_mut() {
                callback(track, &queued);
            }
        }
        queued
    }

    fn poll_cycle(&mut self, all_queued: &mut Vec<Track>) -> Result<(), BackendError> {
        let new_tracks = self.check_for_new_likes()?;
        for track in &new_tracks {
            if self.stop_handle.is_stopped() {
                info!("Stop requested, leaving remaining likes for the next run");
                break;
            }
            let queued = self.process_new_track(track);
            all_queued.extend(queued);
        }
        Ok(())
    }

    /// One poll. Errors and panics are logged; whatever was queued is returned.
    pub fn run_once(&mut self) -> Vec<Track> {
        let poll_time = Local::now();
        self.last_poll_time = Some(poll_time);
        debug!("--- Poll at {} ---", poll_time.format("%H:%M:%S"));

        let mut all_queued: Vec<Track> = Vec::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.poll_cycle(&mut all_queued)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Error during poll: {err}"),
            Err(payload) => error!("Poll cycle {}", panic_message(payload.as_ref())),
        }
        all_queued
    }

    /// Builds the index and runs a single poll unless a stop was requested
    /// while indexing.
    pub fn run_single_check(&mut self) -> Result<Vec<Track>, WatcherError> {
        self.build_known_artists_index()?;
        if self.stop_handle.is_stopped() {
            info!("Interrupted before polling");
            return Ok(Vec::new());
        }
        Ok(self.run_once())
    }

    /// Builds the index, then polls every `poll_interval_seconds` until stopped.
    pub fn start(&mut self) -> Result<(), WatcherError> {
        info!("Starting liked songs watcher...");
        info!("Poll interval: {} seconds", self.settings.poll_interval_seconds);
        info!("Active rules: {:?}", self.rules_engine.list_rules());

        self.build_known_artists_index()?;

        self.running = true;
        info!(
            "Watcher started: tracking {} songs, {} artists",
            self.seen_track_ids.len(),
            self.known_artist_ids.len()
        );

        let interval = Duration::from_secs(self.settings.poll_interval_seconds);
        let mut poll_count = 0u64;
        while self.is_running() {
            poll_count += 1;
            if self.settings.require_active_playback && !self.client.is_playing() {
                debug!("No active playback, skipping poll #{poll_count}");
            } else {
                debug!("Poll #{poll_count}");
                self.run_once();
            }
            if !self.is_running() {
                break;
            }
            debug!("Sleeping {}s...", interval.as_secs());
            if !self.stop_handle.sleep(interval) {
                break;
            }
        }

        self.running = false;
        info!("Watcher stopped after {poll_count} poll(s)");
        Ok(())
    }

    pub fn stop(&mut self) {
        info!("Stopping watcher...");
        self.running = false;
        self.stop_handle.stop();
    }
}

/// Watcher driven by externally delivered "track liked" events.
pub struct EventDrivenWatcher<C: MusicServiceClient> {
    watcher: LikedSongsWatcher<C>,
}

impl<C: MusicServiceClient> EventDrivenWatcher<C> {
    pub fn new(client: C, rules_engine: ScrapeRulesEngine, settings: ScrapingConfig) -> Self {
        Self {
            watcher: LikedSongsWatcher::new(client, rules_engine, settings),
        }
    }

    pub fn initialize(&mut self) -> Result<(), WatcherError> {
        self.watcher.build_known_artists_index().map(|_| ())
    }

    pub fn on_track_liked(&mut self, track: &Track) -> Vec<Track> {
        self.watcher.process_new_track(track)
    }

    pub fn known_artist_ids(&self) -> &HashSet<String> {
        self.watcher.known_artist_ids()
    }

    pub fn seen_track_ids(&self) -> &HashSet<String> {
        self.watcher.seen_track_ids()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{EventDrivenWatcher, LikedSongsWatcher, WatcherError};
    use crate::backends::testing::MockClient;
    use crate::backends::MusicServiceClient;
    use crate::cache::CacheSnapshot;
    use crate::config::ScrapingConfig;
    use crate::models::fixtures::track;
    use crate::models::Track;
    use crate::rules::ScrapeRulesEngine;

    fn settings(dir: &TempDir) -> ScrapingConfig {
        ScrapingConfig {
            cache_file: dir.path().join("cache.json"),
            poll_interval_seconds: 5,
            ..ScrapingConfig::default()
        }
    }

    fn watcher(client: MockClient, settings: ScrapingConfig) -> LikedSongsWatcher<MockClient> {
        let engine = ScrapeRulesEngine::new(&settings);
        LikedSongsWatcher::new(client, engine, settings)
    }

    fn ids(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|track| track.id.as_str()).collect()
    }

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    /// History with one liked track by artist "k", plus top tracks for x and y.
    fn collab_client() -> MockClient {
        MockClient::new("listener")
            .with_liked(vec![track("h1", &["k"])])
            .with_top_tracks("x", vec![track("tx", &["x"])])
            .with_top_tracks("y", vec![track("ty", &["y"])])
    }

    #[test]
    fn test_new_collaboration_queues_each_unknown_artists_top_track() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut watcher = watcher(collab_client(), settings(&dir));
        watcher.build_known_artists_index().expect("index should build");

        watcher.client().like(track("t", &["x", "y"]));
        let queued = watcher.run_once();

        assert_eq!(ids(&queued), vec!["tx", "ty"]);
        assert_eq!(
            *watcher.client().queued.borrow(),
            vec!["test:track:tx".to_string(), "test:track:ty".to_string()]
        );
        assert!(watcher.seen_track_ids().contains("t"));
        assert!(watcher.known_artist_ids().is_superset(&set(&["k", "x", "y"])));
        assert!(watcher.last_poll_time().is_some());
    }

    #[test]
    fn test_single_artist_track_is_rejected_but_marked_seen() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut watcher = watcher(collab_client(), settings(&dir));
        watcher.build_known_artists_index().expect("index should build");

        let queued = watcher.process_new_track(&track("solo", &["x"]));

        assert!(queued.is_empty());
        assert!(watcher.seen_track_ids().contains("solo"));
        assert!(watcher.known_artist_ids().contains("x"));
        assert!(watcher.client().top_track_calls.borrow().is_empty());
    }

    #[test]
    fn test_collaboration_with_known_artist_is_rejected() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut watcher = watcher(collab_client(), settings(&dir));
        watcher.build_known_artists_index().expect("index should build");

        let queued = watcher.process_new_track(&track("t", &["k", "y"]));

        assert!(queued.is_empty());
        assert!(watcher.client().queued.borrow().is_empty());
        assert!(watcher.known_artist_ids().contains("y"));
    }

    #[test]
    fn test_failed_enqueues_still_mark_track_seen_and_persist() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut client = collab_client();
        client.queue_accepts = false;
        let settings = settings(&dir);
        let cache_file = settings.cache_file.clone();
        let mut watcher = watcher(client, settings);
        watcher.build_known_artists_index().expect("index should build");

        let queued = watcher.process_new_track(&track("t", &["x", "y"]));

        assert!(queued.is_empty());
        assert!(watcher.seen_track_ids().contains("t"));
        assert!(watcher.known_artist_ids().is_superset(&set(&["x", "y"])));
        let snapshot = CacheSnapshot::load(&cache_file).expect("cache should be written");
        assert!(snapshot.seen_track_ids.contains(&"t".to_string()));
    }

    #[test]
    fn test_cache_for_other_user_forces_cold_rebuild() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let settings = settings(&dir);
        CacheSnapshot::new("someone-else", "Mock", &set(&["stale"]), &set(&["old"]))
            .save(&settings.cache_file)
            .expect("cache should save");

        let mut watcher = watcher(collab_client(), settings.clone());
        let known = watcher
            .build_known_artists_index()
            .expect("index should build")
            .clone();

        assert_eq!(known, set(&["k"]));
        assert!(!watcher.seen_track_ids().contains("old"));
        assert_eq!(*watcher.client().liked_page_calls.borrow(), vec![(50, 0), (50, 50)]);

        let rewritten = CacheSnapshot::load(&settings.cache_file).expect("cache should exist");
        assert_eq!(rewritten.user_id, "listener");
    }

    #[test]
    fn test_cache_for_other_service_is_ignored() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let settings = settings(&dir);
        CacheSnapshot::new("listener", "Tidal", &set(&["stale"]), &set(&[]))
            .save(&settings.cache_file)
            .expect("cache should save");

        let mut watcher = watcher(collab_client(), settings);
        watcher.build_known_artists_index().expect("index should build");
        assert!(!watcher.known_artist_ids().contains("stale"));
    }

    #[test]
    fn test_warm_start_reloads_snapshot_and_syncs_offline_likes() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let settings = settings(&dir);

        let mut first = watcher(collab_client(), settings.clone());
        first.build_known_artists_index().expect("index should build");
        let original_known = first.known_artist_ids().clone();
        let original_seen = first.seen_track_ids().clone();

        let offline = collab_client();
        offline.like(track("offline", &["z"]));
        let mut second = watcher(offline, settings.clone());
        second.build_known_artists_index().expect("index should build");

        assert!(second.known_artist_ids().is_superset(&original_known));
        assert!(second.seen_track_ids().is_superset(&original_seen));
        assert!(second.seen_track_ids().contains("offline"));
        assert!(second.known_artist_ids().contains("z"));
        assert_eq!(*second.client().liked_page_calls.borrow(), vec![(50, 0)]);

        let snapshot = CacheSnapshot::load(&settings.cache_file).expect("cache should exist");
        assert!(snapshot.seen_track_ids.contains(&"offline".to_string()));
    }

    #[test]
    fn test_round_trip_without_offline_likes_reproduces_sets() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let settings = settings(&dir);

        let mut first = watcher(collab_client(), settings.clone());
        first.build_known_artists_index().expect("index should build");

        let mut second = watcher(collab_client(), settings);
        second.build_known_artists_index().expect("index should build");

        assert_eq!(first.known_artist_ids(), second.known_artist_ids());
        assert_eq!(first.seen_track_ids(), second.seen_track_ids());
    }

    #[test]
    fn test_warm_resync_failure_keeps_cached_state() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let settings = settings(&dir);
        CacheSnapshot::new("listener", "Mock", &set(&["a1"]), &set(&["s1"]))
            .save(&settings.cache_file)
            .expect("cache should save");

        let client = collab_client();
        *client.fail_liked.borrow_mut() = true;
        let mut watcher = watcher(client, settings);
        watcher
            .build_known_artists_index()
            .expect("resync failure should not be fatal");

        assert_eq!(*watcher.known_artist_ids(), set(&["a1"]));
        assert_eq!(*watcher.seen_track_ids(), set(&["s1"]));
    }

    #[test]
    fn test_no_cache_setting_skips_snapshot() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut settings = settings(&dir);
        CacheSnapshot::new("listener", "Mock", &set(&["cached"]), &set(&[]))
            .save(&settings.cache_file)
            .expect("cache should save");
        settings.use_cache = false;

        let mut watcher = watcher(collab_client(), settings);
        watcher.build_known_artists_index().expect("index should build");
        assert_eq!(*watcher.known_artist_ids(), set(&["k"]));
    }

    #[test]
    fn test_cold_index_failure_is_a_startup_error() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let client = collab_client();
        *client.fail_liked.borrow_mut() = true;
        let mut watcher = watcher(client, settings(&dir));

        assert!(matches!(
            watcher.build_known_artists_index(),
            Err(WatcherError::Index(_))
        ));
    }

    #[test]
    fn test_processed_track_never_resurfaces_and_never_double_counts() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut watcher = watcher(collab_client(), settings(&dir));
        watcher.build_known_artists_index().expect("index should build");
        watcher.client().like(track("t", &["x", "y"]));

        assert_eq!(watcher.run_once().len(), 2);
        let known_after_first = watcher.known_artist_ids().clone();

        assert!(watcher.check_for_new_likes().expect("mock page").is_empty());
        assert!(watcher.run_once().is_empty());
        assert!(watcher.process_new_track(&track("t", &["x", "y"])).is_empty());
        assert_eq!(*watcher.known_artist_ids(), known_after_first);
        assert_eq!(watcher.client().queued.borrow().len(), 2);
    }

    #[test]
    fn test_top_tracks_skip_trigger_seen_and_duplicate_candidates() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut settings = settings(&dir);
        settings.top_tracks_limit = 3;
        settings.market = "SE".to_string();
        let shared = track("shared", &["x", "y"]);
        let client = MockClient::new("listener")
            .with_liked(vec![track("h1", &["k"])])
            .with_top_tracks(
                "x",
                vec![track("t", &["x", "y"]), track("h1", &["k"]), shared.clone()],
            )
            .with_top_tracks("y", vec![shared, track("fresh", &["y"])]);
        let mut watcher = watcher(client, settings);
        watcher.build_known_artists_index().expect("index should build");

        let queued = watcher.process_new_track(&track("t", &["x", "y"]));

        assert_eq!(ids(&queued), vec!["shared", "fresh"]);
        assert_eq!(
            *watcher.client().top_track_calls.borrow(),
            vec![
                ("x".to_string(), 3, "SE".to_string()),
                ("y".to_string(), 3, "SE".to_string())
            ]
        );
    }

    #[test]
    fn test_multiple_new_likes_are_processed_in_backend_order() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let client = collab_client().with_top_tracks("z", vec![track("tz", &["z"])]);
        let mut watcher = watcher(client, settings(&dir));
        watcher.build_known_artists_index().expect("index should build");

        watcher.client().like(track("older", &["x", "y"]));
        watcher.client().like(track("newer", &["x", "z"]));
        let queued = watcher.run_once();

        // "newer" is processed first and makes x known, so "older" is rejected.
        assert_eq!(ids(&queued), vec!["tx", "tz"]);
        assert!(watcher.seen_track_ids().is_superset(&set(&["newer", "older"])));
    }

    #[test]
    fn test_callback_only_fires_when_something_was_queued() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let calls: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&calls);
        let mut watcher = watcher(collab_client(), settings(&dir)).with_callback(Box::new(
            move |trigger: &Track, queued: &[Track]| {
                recorder
                    .lock()
                    .expect("callback lock poisoned")
                    .push((trigger.id.clone(), queued.len()));
            },
        ));
        watcher.build_known_artists_index().expect("index should build");

        watcher.process_new_track(&track("solo", &["x"]));
        watcher.process_new_track(&track("t", &["y", "w"]));

        assert_eq!(
            *calls.lock().expect("callback lock poisoned"),
            vec![("t".to_string(), 1)]
        );
    }

    #[test]
    fn test_run_once_survives_fetch_errors() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut watcher = watcher(collab_client(), settings(&dir));
        watcher.build_known_artists_index().expect("index should build");
        *watcher.client().fail_liked.borrow_mut() = true;

        assert!(watcher.run_once().is_empty());
        assert!(watcher.last_poll_time().is_some());
    }

    #[test]
    fn test_run_once_survives_panicking_callback() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut watcher = watcher(collab_client(), settings(&dir))
            .with_callback(Box::new(|_: &Track, _: &[Track]| panic!("callback exploded")));
        watcher.build_known_artists_index().expect("index should build");
        watcher.client().like(track("t", &["x", "y"]));

        let queued = watcher.run_once();

        assert!(queued.is_empty());
        assert!(watcher.seen_track_ids().contains("t"));
        assert!(watcher.check_for_new_likes().expect("mock page").is_empty());
    }

    #[test]
    fn test_start_returns_after_callback_requests_stop() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let client = collab_client();
        // Indexing makes two page requests; the like shows up on the first poll.
        *client.scheduled_like.borrow_mut() = Some((3, track("t", &["x", "y"])));
        let watcher = watcher(client, settings(&dir));
        let handle = watcher.stop_handle();
        let mut watcher =
            watcher.with_callback(Box::new(move |_: &Track, _: &[Track]| handle.stop()));

        watcher.start().expect("start should succeed");

        assert!(!watcher.is_running());
        assert_eq!(watcher.client().queued.borrow().len(), 2);
        assert!(watcher.seen_track_ids().contains("t"));
    }

    #[test]
    fn test_start_with_pending_stop_exits_after_indexing() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut watcher = watcher(collab_client(), settings(&dir));
        watcher.stop();

        watcher.start().expect("start should succeed");

        assert!(watcher.seen_track_ids().contains("h1"));
        assert!(watcher.last_poll_time().is_none());
    }

    #[test]
    fn test_start_skips_polls_without_active_playback() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let client = collab_client();
        *client.scheduled_like.borrow_mut() = Some((3, track("t", &["x", "y"])));
        let settings = ScrapingConfig {
            require_active_playback: true,
            ..settings(&dir)
        };
        let mut watcher = watcher(client, settings);
        let handle = watcher.stop_handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            handle.stop();
        });

        watcher.start().expect("start should succeed");
        stopper.join().expect("stopper thread panicked");

        assert!(watcher.last_poll_time().is_none());
        assert!(watcher.client().queued.borrow().is_empty());
        assert!(!watcher.seen_track_ids().contains("t"));
    }

    #[test]
    fn test_single_check_polls_once_after_indexing() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let client = collab_client();
        *client.scheduled_like.borrow_mut() = Some((3, track("t", &["x", "y"])));
        let mut watcher = watcher(client, settings(&dir));

        let queued = watcher.run_single_check().expect("check should succeed");

        assert_eq!(queued.len(), 2);
        assert!(watcher.last_poll_time().is_some());
    }

    #[test]
    fn test_single_check_after_interrupt_skips_the_poll() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut watcher = watcher(collab_client(), settings(&dir));
        watcher.stop_handle().stop();

        let queued = watcher.run_single_check().expect("check should succeed");

        assert!(queued.is_empty());
        assert!(watcher.seen_track_ids().contains("h1"));
        assert!(watcher.last_poll_time().is_none());
    }

    #[test]
    fn test_run_once_leaves_remaining_likes_after_stop() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let watcher = watcher(collab_client(), settings(&dir));
        let handle = watcher.stop_handle();
        let mut watcher =
            watcher.with_callback(Box::new(move |_: &Track, _: &[Track]| handle.stop()));
        watcher.build_known_artists_index().expect("index should build");
        watcher.client().like(track("older", &["p", "q"]));
        watcher.client().like(track("newer", &["x", "y"]));

        let queued = watcher.run_once();

        assert_eq!(queued.len(), 2);
        assert!(watcher.seen_track_ids().contains("newer"));
        assert!(!watcher.seen_track_ids().contains("older"));
    }

    #[test]
    fn test_start_propagates_identity_and_index_errors() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let client = collab_client();
        *client.fail_liked.borrow_mut() = true;
        let mut watcher = watcher(client, settings(&dir));
        assert!(watcher.start().is_err());
    }

    #[test]
    fn test_event_driven_watcher_reuses_index_and_processing() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let settings = settings(&dir);
        let engine = ScrapeRulesEngine::new(&settings);
        let mut events = EventDrivenWatcher::new(collab_client(), engine, settings);
        events.initialize().expect("index should build");

        assert_eq!(*events.known_artist_ids(), set(&["k"]));
        assert_eq!(*events.seen_track_ids(), set(&["h1"]));

        let queued = events.on_track_liked(&track("t", &["x", "y"]));
        assert_eq!(ids(&queued), vec!["tx", "ty"]);
        assert!(events.seen_track_ids().contains("t"));
    }

    #[test]
    fn test_mock_user_id_feeds_cache_key() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let settings = settings(&dir);
        let mut watcher = watcher(collab_client(), settings.clone());
        watcher.build_known_artists_index().expect("index should build");

        let snapshot = CacheSnapshot::load(&settings.cache_file).expect("cache should exist");
        assert!(snapshot.belongs_to(
            &watcher.client().user_id().expect("mock user"),
            watcher.client().service_name()
        ));
    }
}
