//! Token lookup for the streaming backends.
//!
//! Tokens are obtained out of band and read from the environment first, then
//! from the OS keyring.

use keyring::Entry;
use log::debug;

use crate::config::MusicService;

const KEYRING_SERVICE_PREFIX: &str = "favvocoaster";
const ACCESS_TOKEN_ENTRY: &str = "access_token";
const REFRESH_TOKEN_ENTRY: &str = "refresh_token";

/// Bearer credentials for one backend.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"***")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

fn keyring_service_name(service: MusicService) -> String {
    format!("{KEYRING_SERVICE_PREFIX}.{}", service.as_str())
}

fn access_token_env_var(service: MusicService) -> &'static str {
    match service {
        MusicService::Spotify => "SPOTIFY_ACCESS_TOKEN",
        MusicService::Tidal => "TIDAL_ACCESS_TOKEN",
    }
}

fn refresh_token_env_var(service: MusicService) -> Option<&'static str> {
    match service {
        MusicService::Spotify => Some("SPOTIFY_REFRESH_TOKEN"),
        MusicService::Tidal => None,
    }
}

fn token_entry(service: MusicService, entry_name: &str) -> Result<Entry, String> {
    let service_name = keyring_service_name(service);
    Entry::new(&service_name, entry_name)
        .map_err(|err| format!("failed to create keyring entry '{service_name}/{entry_name}': {err}"))
}

fn keyring_error_hint(error: &str) -> Option<String> {
    if error.contains("org.freedesktop.DBus.Error.ServiceUnknown") {
        return Some(
            "no Secret Service provider is available. Start GNOME Keyring or KeePassXC Secret Service, or export the token through the environment instead."
                .to_string(),
        );
    }
    None
}

fn format_keyring_error(operation: &str, service: MusicService, error: &str) -> String {
    let base = format!(
        "{operation} failed in system keyring for '{}': {error}",
        keyring_service_name(service)
    );
    match keyring_error_hint(error) {
        Some(hint) => format!("{base}. Hint: {hint}"),
        None => base,
    }
}

fn get_keyring_value(service: MusicService, entry_name: &str) -> Result<Option<String>, String> {
    let entry = token_entry(service, entry_name)?;
    match entry.get_password() {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => {
            let detail = format!("failed to get keyring password: {err}");
            Err(format_keyring_error(
                &format!("load {entry_name}"),
                service,
                detail.as_str(),
            ))
        }
    }
}

fn set_keyring_value(service: MusicService, entry_name: &str, value: &str) -> Result<(), String> {
    let entry = token_entry(service, entry_name)?;
    entry.set_password(value).map_err(|err| {
        let detail = format!("failed to set keyring password: {err}");
        format_keyring_error(&format!("save {entry_name}"), service, detail.as_str())
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

/// Resolves tokens from `env_lookup`, falling back to `keyring_lookup` per entry.
pub fn resolve_tokens<E, K>(
    service: MusicService,
    env_lookup: E,
    keyring_lookup: K,
) -> Result<TokenSet, String>
where
    E: Fn(&str) -> Option<String>,
    K: Fn(MusicService, &str) -> Result<Option<String>, String>,
{
    let access_token = match non_empty(env_lookup(access_token_env_var(service))) {
        Some(token) => {
            debug!("Using {} access token from environment", service.as_str());
            token
        }
        None => non_empty(keyring_lookup(service, ACCESS_TOKEN_ENTRY)?).ok_or_else(|| {
            format!(
                "no {} access token found; set {} or store it in the keyring under '{}/{}'",
                service.as_str(),
                access_token_env_var(service),
                keyring_service_name(service),
                ACCESS_TOKEN_ENTRY
            )
        })?,
    };

    let refresh_token = match refresh_token_env_var(service).and_then(|var| non_empty(env_lookup(var)))
    {
        Some(token) => Some(token),
        // A missing refresh token only disables refresh; keyring trouble is not fatal here.
        None => keyring_lookup(service, REFRESH_TOKEN_ENTRY)
            .ok()
            .and_then(non_empty),
    };

    Ok(TokenSet {
        access_token,
        refresh_token,
    })
}

/// Loads tokens for `service` from the process environment and the OS keyring.
pub fn load_tokens(service: MusicService) -> Result<TokenSet, String> {
    resolve_tokens(service, |name| std::env::var(name).ok(), get_keyring_value)
}

/// Persists rotated tokens into the OS keyring.
pub fn store_tokens(service: MusicService, tokens: &TokenSet) -> Result<(), String> {
    set_keyring_value(service, ACCESS_TOKEN_ENTRY, &tokens.access_token)?;
    if let Some(refresh_token) = tokens.refresh_token.as_deref() {
        set_keyring_value(service, REFRESH_TOKEN_ENTRY, refresh_token)?;
    }
    Ok(())
}
