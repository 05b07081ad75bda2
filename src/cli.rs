//! Command-line flags for the `favvocoaster` binary.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{Config, MusicService};

const ENV_HELP: &str = "\
Environment variables:
  SERVICE                        Music service: spotify (default) or tidal
  SPOTIFY_CLIENT_ID              Spotify app client id (needed for token refresh)
  SPOTIFY_CLIENT_SECRET          Spotify app client secret
  SPOTIFY_ACCESS_TOKEN           Spotify access token (otherwise read from the keyring)
  SPOTIFY_REFRESH_TOKEN          Spotify refresh token
  TIDAL_ACCESS_TOKEN             Tidal access token (otherwise read from the keyring)
  SCRAPE_MIN_ARTISTS             Min artists to trigger scraping (default: 2)
  SCRAPE_TOP_TRACKS_LIMIT        Top tracks per artist (default: 1)
  SCRAPE_POLL_INTERVAL_SECONDS   Polling interval (default: 30)";

/// Service selectable on the command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ServiceArg {
    Spotify,
    Tidal,
}

impl From<ServiceArg> for MusicService {
    fn from(value: ServiceArg) -> Self {
        match value {
            ServiceArg::Spotify => MusicService::Spotify,
            ServiceArg::Tidal => MusicService::Tidal,
        }
    }
}

/// Auto-queue top tracks from the artists of newly liked songs.
#[derive(Parser, Debug)]
#[command(name = "favvocoaster")]
#[command(version)]
#[command(after_help = ENV_HELP)]
pub struct Args {
    /// Music service to use (overrides SERVICE)
    #[arg(short = 'S', long, value_enum)]
    pub service: Option<ServiceArg>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Run a single poll and exit
    #[arg(short = '1', long)]
    pub once: bool,

    /// Log what would be queued without queueing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Show current status and configuration, then exit
    #[arg(short, long)]
    pub status: bool,

    /// Ignore the cache and rebuild the known artists index from scratch
    #[arg(long)]
    pub no_cache: bool,

    /// Trace every HTTP request/response with timings (secrets redacted)
    #[arg(long)]
    pub http_log: bool,

    /// Path to config.toml
    #[arg(short, long, value_name = "PATH", env = "FAVVOCOASTER_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Applies flag overrides on top of file and environment settings.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(service) = self.service {
            config.service = service.into();
        }
        if self.debug {
            config.debug = true;
        }
        if self.no_cache {
            config.scraping.use_cache = false;
        }
    }
}
