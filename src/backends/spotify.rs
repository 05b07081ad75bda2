//! Spotify Web API backend.

use std::cell::{OnceCell, RefCell};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::Value;

use super::http::{error_for_status, ApiRequest, ApiResponse, HttpTransport};
use super::{BackendError, MusicServiceClient, MAX_PAGE_SIZE};
use crate::config::{MusicService, SpotifyConfig};
use crate::credentials::{self, TokenSet};
use crate::models::{Artist, PlaybackSnapshot, Track};

const SERVICE_NAME: &str = "Spotify";
const REQUESTS_PER_SECOND: u32 = 10;

/// Persists rotated tokens after a refresh.
pub type TokenStore = Box<dyn Fn(&TokenSet) -> Result<(), String> + Send>;

/// Spotify client over the Web API with bearer tokens.
pub struct SpotifyClient {
    settings: SpotifyConfig,
    transport: HttpTransport,
    tokens: RefCell<TokenSet>,
    token_store: TokenStore,
    user_id: OnceCell<String>,
}

impl SpotifyClient {
    pub fn new(
        settings: SpotifyConfig,
        tokens: TokenSet,
        http_logging: bool,
    ) -> Result<Self, BackendError> {
        if tokens.access_token.trim().is_empty() {
            return Err(BackendError::MissingCredentials(
                "Spotify access token is empty".to_string(),
            ));
        }
        Ok(Self {
            settings,
            transport: HttpTransport::new(REQUESTS_PER_SECOND, http_logging),
            tokens: RefCell::new(tokens),
            token_store: Box::new(|tokens: &TokenSet| {
                credentials::store_tokens(MusicService::Spotify, tokens)
            }),
            user_id: OnceCell::new(),
        })
    }

    /// Replaces the keyring as the destination for refreshed tokens.
    pub fn with_token_store(mut self, store: TokenStore) -> Self {
        self.token_store = store;
        self
    }

    fn api_url(&self, path: &str) -> String {
        join_url(&self.settings.api_base_url, path)
    }

    fn can_refresh(&self) -> bool {
        self.tokens.borrow().refresh_token.is_some()
            && !self.settings.client_id.trim().is_empty()
            && !self.settings.client_secret.trim().is_empty()
    }

    /// Sends an authorized request, refreshing the access token once on 401.
    fn send_authorized<F>(&self, build: F) -> Result<ApiResponse, BackendError>
    where
        F: Fn() -> ApiRequest,
    {
        let access_token = self.tokens.borrow().access_token.clone();
        let response = self.transport.execute(&build().bearer(&access_token))?;
        if response.status != 401 || !self.can_refresh() {
            return Ok(response);
        }

        info!("Spotify access token rejected, refreshing");
        let refreshed = self.refresh_access_token()?;
        self.transport.execute(&build().bearer(&refreshed))
    }

    fn refresh_access_token(&self) -> Result<String, BackendError> {
        let refresh_token = self.tokens.borrow().refresh_token.clone().ok_or_else(|| {
            BackendError::MissingCredentials("no Spotify refresh token available".to_string())
        })?;
        let request = ApiRequest::post(join_url(&self.settings.accounts_base_url, "api/token"))
            .form(vec![
                ("grant_type".to_string(), "refresh_token".to_string()),
                ("refresh_token".to_string(), refresh_token.clone()),
                ("client_id".to_string(), self.settings.client_id.clone()),
                ("client_secret".to_string(), self.settings.client_secret.clone()),
            ]);
        let response = self.transport.execute(&request)?;
        if !response.is_success() {
            let message = error_for_status(&response).to_string();
            return Err(BackendError::Unauthorized(format!(
                "token refresh failed: {message}"
            )));
        }

        let payload: Value = serde_json::from_str(&response.body)?;
        let rotated = parse_token_response(&payload, &refresh_token).ok_or_else(|| {
            BackendError::Parse("token response missing access_token".to_string())
        })?;
        if let Err(err) = (self.token_store)(&rotated) {
            warn!("Could not store refreshed Spotify token: {err}");
        }
        let access_token = rotated.access_token.clone();
        *self.tokens.borrow_mut() = rotated;
        debug!("Spotify access token refreshed");
        Ok(access_token)
    }

    fn get_json(&self, build: impl Fn() -> ApiRequest) -> Result<Value, BackendError> {
        self.send_authorized(build)?.json()
    }
}

impl MusicServiceClient for SpotifyClient {
    fn service_name(&self) -> &str {
        SERVICE_NAME
    }

    fn user_id(&self) -> Result<String, BackendError> {
        if let Some(user_id) = self.user_id.get() {
            return Ok(user_id.clone());
        }
        let profile = self.get_json(|| ApiRequest::get(self.api_url("me")))?;
        let user_id = profile
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Parse("user profile missing id".to_string()))?
            .to_string();
        let _ = self.user_id.set(user_id.clone());
        Ok(user_id)
    }

    fn get_liked_songs(&self, limit: usize, offset: usize) -> Result<Vec<Track>, BackendError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let page = self.get_json(|| {
            ApiRequest::get(self.api_url("me/tracks"))
                .query("limit", limit)
                .query("offset", offset)
        })?;
        Ok(page
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_saved_track).collect())
            .unwrap_or_default())
    }

    fn get_artist_top_tracks(&self, artist_id: &str, limit: usize, country: &str) -> Vec<Track> {
        let path = format!("artists/{}/top-tracks", urlencoding::encode(artist_id));
        match self.get_json(|| ApiRequest::get(self.api_url(&path)).query("market", country)) {
            Ok(payload) => payload
                .get("tracks")
                .and_then(Value::as_array)
                .map(|tracks| {
                    tracks
                        .iter()
                        .filter_map(parse_track)
                        .take(limit)
                        .collect()
                })
                .unwrap_or_default(),
            Err(err) => {
                error!("Failed to get top tracks for artist {artist_id}: {err}");
                Vec::new()
            }
        }
    }

    fn add_to_queue(&self, track_uri: &str) -> bool {
        let outcome = self.send_authorized(|| {
            ApiRequest::post(self.api_url("me/player/queue")).query("uri", track_uri)
        });
        match outcome {
            Ok(response) if response.is_success() => {
                info!("Added to queue: {track_uri}");
                true
            }
            Ok(response) if response.status == 404 => {
                warn!(
                    "{}. Cannot add to queue. Make sure Spotify is playing on a device.",
                    BackendError::NoActiveDevice
                );
                false
            }
            Ok(response) => {
                error!("Failed to add to queue: {}", error_for_status(&response));
                false
            }
            Err(err) => {
                error!("Failed to add to queue: {err}");
                false
            }
        }
    }

    fn get_current_playback(&self) -> Option<PlaybackSnapshot> {
        let response = match self.send_authorized(|| ApiRequest::get(self.api_url("me/player"))) {
            Ok(response) => response,
            Err(err) => {
                debug!("Could not get Spotify playback: {err}");
                return None;
            }
        };
        if response.status == 204 || response.body.trim().is_empty() {
            return None;
        }
        match response.json::<Value>() {
            Ok(payload) => Some(parse_playback(&payload)),
            Err(err) => {
                debug!("Could not get Spotify playback: {err}");
                None
            }
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Reads an `/api/token` answer; Spotify omits `refresh_token` when it is not rotated.
fn parse_token_response(payload: &Value, previous_refresh_token: &str) -> Option<TokenSet> {
    let access_token = payload.get("access_token")?.as_str()?.to_string();
    let refresh_token = payload
        .get("refresh_token")
        .and_then(Value::as_str)
        .unwrap_or(previous_refresh_token)
        .to_string();
    Some(TokenSet {
        access_token,
        refresh_token: Some(refresh_token),
    })
}

fn parse_artist(artist: &Value) -> Option<Artist> {
    Some(Artist {
        id: artist.get("id")?.as_str()?.to_string(),
        name: artist
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Artist")
            .to_string(),
        uri: artist
            .get("uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Parses a track object. Local files (no id) are skipped.
fn parse_track(track: &Value) -> Option<Track> {
    let id = track.get("id")?.as_str()?.to_string();
    let artists = track
        .get("artists")
        .and_then(Value::as_array)
        .map(|artists| artists.iter().filter_map(parse_artist).collect())
        .unwrap_or_default();
    Some(Track {
        uri: track
            .get("uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("spotify:track:{id}")),
        name: track
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Title")
            .to_string(),
        id,
        artists,
        liked_at: None,
    })
}

fn parse_saved_track(item: &Value) -> Option<Track> {
    let mut track = parse_track(item.get("track")?)?;
    track.liked_at = item
        .get("added_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc));
    Some(track)
}

fn parse_playback(payload: &Value) -> PlaybackSnapshot {
    let item = payload.get("item");
    PlaybackSnapshot {
        is_playing: payload
            .get("is_playing")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        track_name: item
            .and_then(|item| item.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        artist_names: item
            .and_then(|item| item.get("artists"))
            .and_then(Value::as_array)
            .map(|artists| {
                artists
                    .iter()
                    .filter_map(|artist| artist.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        device_name: payload
            .get("device")
            .and_then(|device| device.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
