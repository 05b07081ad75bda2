//! Persistent application configuration model and defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;

const CONFIG_DIR_NAME: &str = "favvocoaster";
const CONFIG_FILE_NAME: &str = "config.toml";
const CACHE_FILE_NAME: &str = "favvocoaster_cache.json";

/// Failure while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Streaming backend to watch.
    #[serde(default)]
    pub service: MusicService,
    /// Enables debug-level logging.
    #[serde(default)]
    pub debug: bool,
    /// Watch loop and rule behavior.
    #[serde(default)]
    pub scraping: ScrapingConfig,
    /// Spotify application credentials and endpoints.
    #[serde(default)]
    pub spotify: SpotifyConfig,
    /// Tidal application credentials and endpoints.
    #[serde(default)]
    pub tidal: TidalConfig,
}

/// Supported streaming backends.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MusicService {
    #[default]
    Spotify,
    Tidal,
}

impl MusicService {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
            Self::Tidal => "tidal",
        }
    }
}

impl FromStr for MusicService {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "spotify" => Ok(Self::Spotify),
            "tidal" => Ok(Self::Tidal),
            other => Err(format!("unsupported music service '{other}'")),
        }
    }
}

/// Watch loop and rule preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ScrapingConfig {
    /// Minimum credited artists for a liked track to trigger scraping.
    #[serde(default = "default_min_artists")]
    pub min_artists: usize,
    /// Top tracks fetched per scraped artist.
    #[serde(default = "default_top_tracks_limit")]
    pub top_tracks_limit: usize,
    /// Skip tracks crediting any already-known artist.
    #[serde(default = "default_true")]
    pub skip_known_artists: bool,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Liked tracks scanned when building the known-artist index from scratch.
    #[serde(default = "default_known_artists_scan_limit")]
    pub known_artists_scan_limit: usize,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
    /// Market/country code used for top-track lookups.
    #[serde(default = "default_market")]
    pub market: String,
    /// Skip a poll (single-shot or continuous) when nothing is playing.
    #[serde(default)]
    pub require_active_playback: bool,
}

/// Spotify application settings. Tokens are never stored here.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_spotify_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_spotify_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_spotify_accounts_base_url")]
    pub accounts_base_url: String,
}

/// Tidal application settings. Tokens are never stored here.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TidalConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_tidal_api_base_url")]
    pub api_base_url: String,
    /// Overrides the country reported by the Tidal session.
    #[serde(default)]
    pub country_code: String,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            min_artists: default_min_artists(),
            top_tracks_limit: default_top_tracks_limit(),
            skip_known_artists: true,
            poll_interval_seconds: default_poll_interval_seconds(),
            known_artists_scan_limit: default_known_artists_scan_limit(),
            use_cache: true,
            cache_file: default_cache_file(),
            market: default_market(),
            require_active_playback: false,
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_spotify_redirect_uri(),
            api_base_url: default_spotify_api_base_url(),
            accounts_base_url: default_spotify_accounts_base_url(),
        }
    }
}

impl Default for TidalConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            api_base_url: default_tidal_api_base_url(),
            country_code: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_artists() -> usize {
    2
}

fn default_top_tracks_limit() -> usize {
    1
}

fn default_poll_interval_seconds() -> u64 {
    30
}

fn default_known_artists_scan_limit() -> usize {
    500
}

fn default_market() -> String {
    "US".to_string()
}

fn default_cache_file() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CACHE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CACHE_FILE_NAME))
}

fn default_spotify_redirect_uri() -> String {
    "http://localhost:8888/callback".to_string()
}

fn default_spotify_api_base_url() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_spotify_accounts_base_url() -> String {
    "https://accounts.spotify.com".to_string()
}

fn default_tidal_api_base_url() -> String {
    "https://api.tidal.com/v1".to_string()
}

/// Default location of `config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Where the loaded configuration came from. Config is read before logging
/// is set up, so the caller reports this once the logger exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    NoConfigDir,
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            Self::File(path) => info!("Loaded config from {}", path.display()),
            Self::Missing(path) => info!(
                "Config file not found, using defaults. path={}",
                path.display()
            ),
            Self::NoConfigDir => info!("No config directory available, using defaults"),
        }
    }
}

/// Reads `path` if it exists; a missing file yields defaults.
pub fn load_config_file(path: &Path) -> Result<(Config, ConfigSource), ConfigError> {
    if !path.exists() {
        return Ok((Config::default(), ConfigSource::Missing(path.to_path_buf())));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((config, ConfigSource::File(path.to_path_buf())))
}

/// Loads the config file, applies environment overrides, then clamps values.
pub fn load_config(path: Option<&Path>) -> Result<(Config, ConfigSource), ConfigError> {
    let (config, source) = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => load_config_file(&path)?,
        None => (Config::default(), ConfigSource::NoConfigDir),
    };
    let config = apply_env_overrides(config, |key| std::env::var(key).ok())?;
    Ok((sanitize_config(config), source))
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("'{raw}': {err}"),
    })
}

fn parse_env_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("'{raw}' is not a boolean"),
        }),
    }
}

/// Applies `SERVICE`, `SCRAPE_*`, `SPOTIFY_*`, `TIDAL_*` and `DEBUG` overrides.
pub fn apply_env_overrides<F>(mut config: Config, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup("SERVICE") {
        config.service = raw.parse().map_err(|message| ConfigError::Invalid {
            key: "SERVICE".to_string(),
            message,
        })?;
    }
    if let Some(raw) = lookup("DEBUG") {
        // DEBUG is shared with other tools, so unknown values are not an error.
        config.debug = parse_env_bool("DEBUG", &raw).unwrap_or(false);
    }

    let scraping = &mut config.scraping;
    if let Some(raw) = lookup("SCRAPE_MIN_ARTISTS") {
        scraping.min_artists = parse_env("SCRAPE_MIN_ARTISTS", &raw)?;
    }
    if let Some(raw) = lookup("SCRAPE_TOP_TRACKS_LIMIT") {
        scraping.top_tracks_limit = parse_env("SCRAPE_TOP_TRACKS_LIMIT", &raw)?;
    }
    if let Some(raw) = lookup("SCRAPE_SKIP_KNOWN_ARTISTS") {
        scraping.skip_known_artists = parse_env_bool("SCRAPE_SKIP_KNOWN_ARTISTS", &raw)?;
    }
    if let Some(raw) = lookup("SCRAPE_POLL_INTERVAL_SECONDS") {
        scraping.poll_interval_seconds = parse_env("SCRAPE_POLL_INTERVAL_SECONDS", &raw)?;
    }
    if let Some(raw) = lookup("SCRAPE_KNOWN_ARTISTS_SCAN_LIMIT") {
        scraping.known_artists_scan_limit = parse_env("SCRAPE_KNOWN_ARTISTS_SCAN_LIMIT", &raw)?;
    }
    if let Some(raw) = lookup("SCRAPE_USE_CACHE") {
        scraping.use_cache = parse_env_bool("SCRAPE_USE_CACHE", &raw)?;
    }
    if let Some(raw) = lookup("SCRAPE_CACHE_FILE") {
        scraping.cache_file = PathBuf::from(raw.trim());
    }
    if let Some(raw) = lookup("SCRAPE_MARKET") {
        scraping.market = raw.trim().to_string();
    }

    if let Some(raw) = lookup("SPOTIFY_CLIENT_ID") {
        config.spotify.client_id = raw.trim().to_string();
    }
    if let Some(raw) = lookup("SPOTIFY_CLIENT_SECRET") {
        config.spotify.client_secret = raw.trim().to_string();
    }
    if let Some(raw) = lookup("SPOTIFY_REDIRECT_URI") {
        config.spotify.redirect_uri = raw.trim().to_string();
    }
    if let Some(raw) = lookup("TIDAL_CLIENT_ID") {
        config.tidal.client_id = raw.trim().to_string();
    }
    if let Some(raw) = lookup("TIDAL_COUNTRY_CODE") {
        config.tidal.country_code = raw.trim().to_string();
    }
    Ok(config)
}

/// Clamps scraping values into ranges the watcher can operate with.
pub fn sanitize_config(config: Config) -> Config {
    let scraping = config.scraping;
    let market = scraping.market.trim().to_ascii_uppercase();
    Config {
        scraping: ScrapingConfig {
            min_artists: scraping.min_artists.max(1),
            top_tracks_limit: scraping.top_tracks_limit.clamp(1, 10),
            poll_interval_seconds: scraping.poll_interval_seconds.max(5),
            known_artists_scan_limit: scraping.known_artists_scan_limit.clamp(50, 10_000),
            market: if market.is_empty() {
                default_market()
            } else {
                market
            },
            ..scraping
        },
        ..config
    }
}
