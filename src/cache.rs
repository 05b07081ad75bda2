//! On-disk snapshot of watcher state, keyed by user and service.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use log::{debug, warn};
use serde::{Deserialize, Deserializer};

/// Persisted watcher state. Arrays are written sorted so snapshots diff cleanly.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct CacheSnapshot {
    pub user_id: String,
    pub service: String,
    #[serde(default)]
    pub known_artist_ids: Vec<String>,
    #[serde(default)]
    pub seen_track_ids: Vec<String>,
    #[serde(deserialize_with = "deserialize_updated_at")]
    pub updated_at: DateTime<Utc>,
}

/// Accepts RFC 3339 and offset-less local timestamps such as
/// `2024-03-01T12:30:00.123456`.
fn deserialize_updated_at<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_updated_at(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid updated_at timestamp '{raw}'")))
}

fn parse_updated_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = raw.parse::<NaiveDateTime>().ok()?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc));
    Some(local.unwrap_or_else(|| Utc.from_utc_datetime(&naive)))
}

impl CacheSnapshot {
    pub fn new(
        user_id: &str,
        service: &str,
        known_artist_ids: &HashSet<String>,
        seen_track_ids: &HashSet<String>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            service: service.to_string(),
            known_artist_ids: sorted(known_artist_ids),
            seen_track_ids: sorted(seen_track_ids),
            updated_at: Utc::now(),
        }
    }

    pub fn belongs_to(&self, user_id: &str, service: &str) -> bool {
        self.user_id == user_id && self.service == service
    }

    pub fn known_artist_set(&self) -> HashSet<String> {
        self.known_artist_ids.iter().cloned().collect()
    }

    pub fn seen_track_set(&self) -> HashSet<String> {
        self.seen_track_ids.iter().cloned().collect()
    }

    /// Reads a snapshot. A missing or unparsable file is treated as no cache.
    pub fn load(path: &Path) -> Option<Self> {
        let Ok(contents) = fs::read_to_string(path) else {
            debug!("No cache at {}", path.display());
            return None;
        };
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!("Failed to load cache {}: {}", path.display(), err);
                None
            }
        }
    }

    /// Replaces the file at `path` via a sibling temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                format!("failed to create cache directory {}: {err}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(self)
            .map_err(|err| format!("failed to serialize cache: {err}"))?;

        let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = path.with_file_name(temp_name);
        fs::write(&temp_path, serialized)
            .map_err(|err| format!("failed to write {}: {err}", temp_path.display()))?;
        fs::rename(&temp_path, path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            format!("failed to replace {}: {err}", path.display())
        })
    }
}

fn sorted(ids: &HashSet<String>) -> Vec<String> {
    let mut ids: Vec<String> = ids.iter().cloned().collect();
    ids.sort_unstable();
    ids
}
