//! Request/response tracing for backend HTTP calls.
//!
//! Records go to the `favvocoaster::http` log target with millisecond timings.
//! Credential-bearing headers, query parameters and JSON body fields are
//! redacted before they are rendered.

use std::cell::Cell;
use std::time::Duration;

use log::{debug, error};
use serde_json::Value;

pub const HTTP_LOG_TARGET: &str = "favvocoaster::http";
const REDACTED: &str = "***REDACTED***";
const MAX_LOGGED_BODY_CHARS: usize = 2000;
const SENSITIVE_KEYS: &[&str] = &[
    "authorization",
    "token",
    "cookie",
    "set-cookie",
    "sessionid",
    "access_token",
    "refresh_token",
    "client_secret",
    "x-tidal-token",
];

/// Returns `true` for header/parameter names whose values must never be logged.
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&lowered.as_str())
}

/// Copies `pairs`, replacing sensitive values.
pub fn redact_pairs(pairs: &[(String, String)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(key, value)| {
            let shown = if is_sensitive_key(key) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (key.clone(), shown)
        })
        .collect()
}

fn redact_json(value: &mut Value) {
    match value {
        Value::Object(fields) => {
            for (key, field) in fields.iter_mut() {
                if is_sensitive_key(key) {
                    *field = Value::String(REDACTED.to_string());
                } else {
                    redact_json(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_json),
        _ => {}
    }
}

/// Masks sensitive fields of a JSON body. Non-JSON bodies are returned as is.
pub fn redact_body(body: &str) -> String {
    let Ok(mut parsed) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    if !matches!(parsed, Value::Object(_) | Value::Array(_)) {
        return body.to_string();
    }
    redact_json(&mut parsed);
    parsed.to_string()
}

/// Shortens long bodies, keeping a note of the original size.
pub fn truncate_body(body: &str) -> String {
    let total_chars = body.chars().count();
    if total_chars <= MAX_LOGGED_BODY_CHARS {
        return body.to_string();
    }
    let head: String = body.chars().take(MAX_LOGGED_BODY_CHARS).collect();
    format!("{head}... [truncated, {total_chars} total chars]")
}

/// Per-client request tracer. Disabled tracers log nothing.
#[derive(Debug, Default)]
pub struct HttpTrace {
    enabled: bool,
    request_counter: Cell<u64>,
}

impl HttpTrace {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            request_counter: Cell::new(0),
        }
    }

    /// Logs an outgoing request and returns its id (0 when disabled).
    pub fn request(
        &self,
        method: &str,
        url: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
    ) -> u64 {
        if !self.enabled {
            return 0;
        }
        let request_id = self.request_counter.get().saturating_add(1);
        self.request_counter.set(request_id);
        debug!(
            target: HTTP_LOG_TARGET,
            "[REQ-{}] --> {} {}\n    Params: {:?}\n    Headers: {:?}",
            request_id,
            method,
            url,
            redact_pairs(query),
            redact_pairs(headers)
        );
        request_id
    }

    pub fn response(&self, request_id: u64, status: u16, elapsed: Duration, body: &str) {
        if !self.enabled {
            return;
        }
        debug!(
            target: HTTP_LOG_TARGET,
            "[REQ-{}] <-- {} ({:.1}ms)\n    Body: {}",
            request_id,
            status,
            elapsed.as_secs_f64() * 1000.0,
            truncate_body(&redact_body(body))
        );
    }

    pub fn failure(&self, request_id: u64, elapsed: Duration, error: &str) {
        if !self.enabled {
            return;
        }
        error!(
            target: HTTP_LOG_TARGET,
            "[REQ-{}] <-- ERROR after {:.1}ms: {}",
            request_id,
            elapsed.as_secs_f64() * 1000.0,
            error
        );
    }
}
