//! Blocking HTTP transport shared by the streaming backends.
//!
//! Every request passes through a per-client rate limiter. A 429 answer is
//! retried once after the server-provided delay; everything else is handed
//! back to the backend to interpret.

use std::num::NonZeroU32;
use std::thread;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::warn;
use serde::de::DeserializeOwned;

use super::BackendError;
use crate::http_log::HttpTrace;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(15);
const LIMITER_POLL_INTERVAL: Duration = Duration::from_millis(25);
const MAX_RETRY_AFTER_SECS: u64 = 30;
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Outgoing request description.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: &'static str,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// Sent as `application/x-www-form-urlencoded` when present.
    pub form: Option<Vec<(String, String)>>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    fn new(method: &'static str, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            form: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = Some(fields);
        self
    }
}

/// Raw answer with any HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body, treating non-2xx statuses as errors.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BackendError> {
        if !self.is_success() {
            return Err(error_for_status(self));
        }
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Maps a non-2xx response onto the backend error taxonomy.
pub fn error_for_status(response: &ApiResponse) -> BackendError {
    let message = extract_error_message(&response.body);
    match response.status {
        401 => BackendError::Unauthorized(message),
        429 => BackendError::RateLimited {
            retry_after_secs: response.retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        status => BackendError::Http { status, message },
    }
}

/// Pulls a human-readable message out of the error payloads both services use.
pub fn extract_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("userMessage"))
            .or_else(|| value.get("error_description"))
            .or_else(|| value.get("error"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    });
    match message {
        Some(message) => message,
        None if body.trim().is_empty() => "empty response".to_string(),
        None => body.trim().chars().take(200).collect(),
    }
}

/// Parses a `Retry-After` header in seconds, capped so a misbehaving server
/// cannot park the watcher.
pub fn parse_retry_after(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
        .min(MAX_RETRY_AFTER_SECS)
}

fn build_query_url(url: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let encoded = query
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{url}?{encoded}")
}

pub struct HttpTransport {
    agent: ureq::Agent,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    trace: HttpTrace,
}

impl HttpTransport {
    pub fn new(requests_per_second: u32, http_logging: bool) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(IO_TIMEOUT)
            .timeout_write(IO_TIMEOUT)
            .build();
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            agent,
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN)),
            trace: HttpTrace::new(http_logging),
        }
    }

    fn wait_for_slot(&self) {
        while self.limiter.check().is_err() {
            thread::sleep(LIMITER_POLL_INTERVAL);
        }
    }

    /// Sends `request`, retrying once after a 429. Non-2xx statuses come back
    /// as `Ok`; only network failures are errors.
    pub fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
        let response = self.send_once(request)?;
        if response.status != 429 {
            return Ok(response);
        }

        let delay_secs = response.retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        warn!(
            "Rate limited on {} {}, retrying in {}s",
            request.method, request.url, delay_secs
        );
        thread::sleep(Duration::from_secs(delay_secs));
        self.send_once(request)
    }

    fn send_once(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
        self.wait_for_slot();
        let request_id = self.trace.request(
            request.method,
            &request.url,
            &request.query,
            &request.headers,
        );
        let started = Instant::now();

        let url = build_query_url(&request.url, &request.query);
        let mut pending = self.agent.request(request.method, &url);
        for (key, value) in &request.headers {
            pending = pending.set(key, value);
        }
        let outcome = match (&request.form, request.method) {
            (Some(fields), _) => {
                let borrowed = fields
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str()))
                    .collect::<Vec<_>>();
                pending.send_form(&borrowed)
            }
            (None, "GET") => pending.call(),
            (None, _) => pending.send_string(""),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                let message = transport.to_string();
                self.trace.failure(request_id, started.elapsed(), &message);
                return Err(BackendError::Transport(message));
            }
        };

        let status = response.status();
        let retry_after_secs = (status == 429)
            .then(|| parse_retry_after(response.header("Retry-After")));
        let body = response.into_string().map_err(|err| {
            let message = format!("failed to read response body: {err}");
            self.trace.failure(request_id, started.elapsed(), &message);
            BackendError::Transport(message)
        })?;
        self.trace
            .response(request_id, status, started.elapsed(), &body);

        Ok(ApiResponse {
            status,
            body,
            retry_after_secs,
        })
    }
}
