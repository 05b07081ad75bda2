//! Tidal API backend.
//!
//! Tidal's public API exposes no remote playback queue, so queueing and
//! playback queries degrade to "not available".

use std::cell::OnceCell;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde_json::Value;

use super::http::{ApiRequest, HttpTransport};
use super::{BackendError, MusicServiceClient, MAX_PAGE_SIZE};
use crate::config::TidalConfig;
use crate::credentials::TokenSet;
use crate::models::{Artist, PlaybackSnapshot, Track};

const SERVICE_NAME: &str = "Tidal";
const REQUESTS_PER_SECOND: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TidalSession {
    user_id: String,
    country_code: String,
}

/// Tidal client over the v1 API with a bearer token.
pub struct TidalClient {
    settings: TidalConfig,
    transport: HttpTransport,
    access_token: String,
    session: OnceCell<TidalSession>,
}

impl TidalClient {
    pub fn new(
        settings: TidalConfig,
        tokens: TokenSet,
        http_logging: bool,
    ) -> Result<Self, BackendError> {
        if tokens.access_token.trim().is_empty() {
            return Err(BackendError::MissingCredentials(
                "Tidal access token is empty".to_string(),
            ));
        }
        Ok(Self {
            settings,
            transport: HttpTransport::new(REQUESTS_PER_SECOND, http_logging),
            access_token: tokens.access_token,
            session: OnceCell::new(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.settings.api_base_url.trim().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn get_json(&self, request: ApiRequest) -> Result<Value, BackendError> {
        self.transport
            .execute(&request.bearer(&self.access_token))?
            .json()
    }

    fn session(&self) -> Result<&TidalSession, BackendError> {
        if let Some(session) = self.session.get() {
            return Ok(session);
        }
        let payload = self.get_json(ApiRequest::get(self.api_url("sessions")))?;
        let session = parse_session(&payload, &self.settings.country_code)
            .ok_or_else(|| BackendError::Parse("session response missing userId".to_string()))?;
        debug!(
            "Tidal session for user {} (country {})",
            session.user_id, session.country_code
        );
        Ok(self.session.get_or_init(|| session))
    }
}

impl MusicServiceClient for TidalClient {
    fn service_name(&self) -> &str {
        SERVICE_NAME
    }

    fn user_id(&self) -> Result<String, BackendError> {
        Ok(self.session()?.user_id.clone())
    }

    fn get_liked_songs(&self, limit: usize, offset: usize) -> Result<Vec<Track>, BackendError> {
        let session = self.session()?;
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        debug!(
            "Fetching Tidal favorites for user {}: limit={limit}, offset={offset}, order=DATE DESC",
            session.user_id
        );
        let path = format!("users/{}/favorites/tracks", session.user_id);
        let page = self.get_json(
            ApiRequest::get(self.api_url(&path))
                .query("limit", limit)
                .query("offset", offset)
                .query("order", "DATE")
                .query("orderDirection", "DESC")
                .query("countryCode", &session.country_code),
        )?;
        let tracks: Vec<Track> = page
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_favorite).collect())
            .unwrap_or_default();
        if offset == 0 {
            if let Some(newest) = tracks.first() {
                debug!("Newest favorite: {} (ID: {})", newest.name, newest.id);
            }
        }
        Ok(tracks)
    }

    fn get_artist_top_tracks(&self, artist_id: &str, limit: usize, _country: &str) -> Vec<Track> {
        let session = match self.session() {
            Ok(session) => session,
            Err(err) => {
                error!("Failed to get top tracks for artist {artist_id}: {err}");
                return Vec::new();
            }
        };
        let path = format!("artists/{}/toptracks", urlencoding::encode(artist_id));
        let request = ApiRequest::get(self.api_url(&path))
            .query("limit", limit)
            .query("countryCode", &session.country_code);
        match self.get_json(request) {
            Ok(payload) => payload
                .get("items")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(parse_track).take(limit).collect())
                .unwrap_or_default(),
            Err(err) => {
                error!("Failed to get top tracks for artist {artist_id}: {err}");
                Vec::new()
            }
        }
    }

    fn add_to_queue(&self, track_uri: &str) -> bool {
        warn!(
            "Tidal queue management not available; cannot queue {track_uri}. This feature requires an active Tidal Connect session."
        );
        false
    }

    fn get_current_playback(&self) -> Option<PlaybackSnapshot> {
        debug!("Tidal does not expose remote playback state");
        None
    }
}

/// Tidal ids arrive as JSON numbers; accept strings too.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn parse_session(payload: &Value, country_override: &str) -> Option<TidalSession> {
    let user_id = id_string(payload.get("userId")?)?;
    let country_code = if country_override.trim().is_empty() {
        payload
            .get("countryCode")
            .and_then(Value::as_str)
            .unwrap_or("US")
            .to_string()
    } else {
        country_override.trim().to_ascii_uppercase()
    };
    Some(TidalSession {
        user_id,
        country_code,
    })
}

/// Parses Tidal timestamps such as `2024-03-01T12:30:00.000+0000`.
fn parse_tidal_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn parse_artist(artist: &Value) -> Option<Artist> {
    let id = id_string(artist.get("id")?)?;
    Some(Artist {
        name: artist
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Artist")
            .to_string(),
        uri: format!("tidal:artist:{id}"),
        id,
    })
}

fn parse_track(track: &Value) -> Option<Track> {
    let id = id_string(track.get("id")?)?;
    let artists = track
        .get("artists")
        .and_then(Value::as_array)
        .map(|artists| artists.iter().filter_map(parse_artist).collect())
        .unwrap_or_default();
    Some(Track {
        name: track
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Title")
            .to_string(),
        uri: format!("tidal:track:{id}"),
        id,
        artists,
        liked_at: None,
    })
}

fn parse_favorite(entry: &Value) -> Option<Track> {
    let mut track = parse_track(entry.get("item")?)?;
    track.liked_at = entry
        .get("created")
        .and_then(Value::as_str)
        .and_then(parse_tidal_timestamp);
    Some(track)
}
