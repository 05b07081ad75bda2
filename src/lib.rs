//! Watches a streaming account for newly liked tracks and queues top tracks
//! from the collaborating artists the listener has not liked before.
//!
//! - [`backends`] - streaming service clients (Spotify, Tidal, dry run)
//! - [`rules`] - ordered rule engine deciding when a like triggers scraping
//! - [`watcher`] - poll loop, known-artist index and seen-track bookkeeping
//! - [`cache`] - on-disk snapshot of watcher state
//! - [`config`] / [`credentials`] - settings file, environment and keyring

pub mod backends;
pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod http_log;
pub mod models;
pub mod rules;
pub mod shutdown;
pub mod status;
pub mod watcher;
