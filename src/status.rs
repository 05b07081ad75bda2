//! Human-readable status report for `--status`.

use std::fmt::Write as _;

use crate::config::ScrapingConfig;
use crate::models::PlaybackSnapshot;

/// Renders service, account, playback and effective scraping settings.
pub fn render_status(
    service_name: &str,
    user_id: &str,
    playback: Option<&PlaybackSnapshot>,
    scraping: &ScrapingConfig,
) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "FavvoCoaster Status");
    let _ = writeln!(report, "{}", "=".repeat(50));
    let _ = writeln!(report, "Service: {service_name}");
    let _ = writeln!(report, "Logged in as: {user_id}");

    match playback.filter(|playback| playback.is_playing) {
        Some(playback) => {
            let track_name = playback.track_name.as_deref().unwrap_or("Unknown track");
            if playback.artist_names.is_empty() {
                let _ = writeln!(report, "Currently playing: {track_name}");
            } else {
                let _ = writeln!(
                    report,
                    "Currently playing: {track_name} by {}",
                    playback.artist_names.join(", ")
                );
            }
            if let Some(device_name) = playback.device_name.as_deref() {
                let _ = writeln!(report, "Device: {device_name}");
            }
        }
        None => {
            let _ = writeln!(report, "No active playback");
        }
    }

    let _ = writeln!(report);
    let _ = writeln!(report, "Configuration:");
    let _ = writeln!(report, "  Min artists to trigger: {}", scraping.min_artists);
    let _ = writeln!(report, "  Top tracks per artist: {}", scraping.top_tracks_limit);
    let _ = writeln!(report, "  Skip known artists: {}", scraping.skip_known_artists);
    let _ = writeln!(report, "  Poll interval: {}s", scraping.poll_interval_seconds);
    let _ = writeln!(report, "  Known artists scan limit: {}", scraping.known_artists_scan_limit);
    let _ = writeln!(report, "  Market: {}", scraping.market);
    let _ = writeln!(
        report,
        "  Cache: {} ({})",
        if scraping.use_cache { "enabled" } else { "disabled" },
        scraping.cache_file.display()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::render_status;
    use crate::config::ScrapingConfig;
    use crate::models::PlaybackSnapshot;

    #[test]
    fn test_status_shows_current_track_and_artists() {
        let playback = PlaybackSnapshot {
            is_playing: true,
            track_name: Some("Song".to_string()),
            artist_names: vec!["A".to_string(), "B".to_string()],
            device_name: Some("Desk".to_string()),
        };
        let report = render_status("Spotify", "listener", Some(&playback), &ScrapingConfig::default());

        assert!(report.contains("Service: Spotify"));
        assert!(report.contains("Logged in as: listener"));
        assert!(report.contains("Currently playing: Song by A, B"));
        assert!(report.contains("Device: Desk"));
        assert!(report.contains("Min artists to trigger: 2"));
        assert!(report.contains("Poll interval: 30s"));
    }

    #[test]
    fn test_status_reports_no_playback_for_paused_or_missing() {
        let paused = PlaybackSnapshot::default();
        let settings = ScrapingConfig {
            use_cache: false,
            ..ScrapingConfig::default()
        };
        let report = render_status("Tidal", "42", Some(&paused), &settings);
        assert!(report.contains("No active playback"));
        assert!(report.contains("Cache: disabled"));

        assert!(render_status("Tidal", "42", None, &settings).contains("No active playback"));
    }
}
