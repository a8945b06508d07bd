//! Configuration for the capture layer.
//!
//! [`CaptureConfig`] is a plain struct with sensible defaults. It can be built in code,
//! deserialized as part of an application's own config file, or read from `TAPLINE_*`
//! environment variables with [`CaptureConfig::from_env`].

use axum::http::{HeaderName, StatusCode};
use serde::Deserialize;

/// Default cap on the number of body bytes buffered per direction (64 KiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Default number of records that may wait for the sink before new ones are dropped.
pub const DEFAULT_RECORD_QUEUE_CAPACITY: usize = 1024;

/// Headers whose values never appear in a record.
pub const DEFAULT_REDACTED_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "proxy-authorization",
    "x-api-key",
    "x-auth-token",
];

/// Configuration for the request capture middleware.
///
/// Controls what is captured, how much of each body is buffered, and how records are
/// scrubbed before they leave the layer.
///
/// # Examples
///
/// ```rust
/// use tapline::CaptureConfig;
///
/// // Default configuration
/// let config = CaptureConfig::default();
/// assert!(config.capture_request_body);
///
/// // Only log response bodies, and at most 4 KiB of them
/// let config = CaptureConfig {
///     capture_request_body: false,
///     max_body_bytes: 4096,
///     ..CaptureConfig::default()
/// };
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Whether to capture request bodies
    pub capture_request_body: bool,
    /// Whether to capture response bodies
    pub capture_response_body: bool,
    /// Maximum number of body bytes buffered per direction. Larger bodies are still
    /// delivered in full; only the record is truncated.
    pub max_body_bytes: usize,
    /// Header names (case-insensitive) whose values are replaced in records
    pub redact_headers: Vec<String>,
    /// Scheme recorded when the request URI does not carry one (origin-form requests)
    pub default_scheme: String,
    /// Status recorded when the inner service fails or panics without producing a response
    #[serde(with = "status_code")]
    pub failure_status: StatusCode,
    /// Records waiting for a slow sink beyond this many are dropped (and logged)
    pub record_queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_request_body: true,
            capture_response_body: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            redact_headers: DEFAULT_REDACTED_HEADERS
                .iter()
                .map(|h| (*h).to_owned())
                .collect(),
            default_scheme: "http".to_owned(),
            failure_status: StatusCode::INTERNAL_SERVER_ERROR,
            record_queue_capacity: DEFAULT_RECORD_QUEUE_CAPACITY,
        }
    }
}

impl CaptureConfig {
    /// Load configuration from `TAPLINE_*` environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `TAPLINE_CAPTURE_REQUEST_BODY` | `capture_request_body` |
    /// | `TAPLINE_CAPTURE_RESPONSE_BODY` | `capture_response_body` |
    /// | `TAPLINE_MAX_BODY_BYTES` | `max_body_bytes` |
    /// | `TAPLINE_REDACT_HEADERS` | `redact_headers` (comma separated, replaces the defaults) |
    /// | `TAPLINE_DEFAULT_SCHEME` | `default_scheme` |
    /// | `TAPLINE_FAILURE_STATUS` | `failure_status` |
    /// | `TAPLINE_RECORD_QUEUE_CAPACITY` | `record_queue_capacity` |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("TAPLINE_CAPTURE_REQUEST_BODY") {
            config.capture_request_body = parse_flag(&v, config.capture_request_body);
        }
        if let Some(v) = lookup("TAPLINE_CAPTURE_RESPONSE_BODY") {
            config.capture_response_body = parse_flag(&v, config.capture_response_body);
        }
        if let Some(v) = lookup("TAPLINE_MAX_BODY_BYTES") {
            match v.trim().parse() {
                Ok(n) => config.max_body_bytes = n,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid TAPLINE_MAX_BODY_BYTES"),
            }
        }
        if let Some(v) = lookup("TAPLINE_REDACT_HEADERS") {
            config.redact_headers = v
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(v) = lookup("TAPLINE_DEFAULT_SCHEME") {
            config.default_scheme = v;
        }
        if let Some(v) = lookup("TAPLINE_FAILURE_STATUS") {
            match v.trim().parse::<u16>().ok().and_then(|c| StatusCode::from_u16(c).ok()) {
                Some(status) => config.failure_status = status,
                None => tracing::warn!(value = %v, "Ignoring invalid TAPLINE_FAILURE_STATUS"),
            }
        }
        if let Some(v) = lookup("TAPLINE_RECORD_QUEUE_CAPACITY") {
            match v.trim().parse() {
                Ok(n) if n > 0 => config.record_queue_capacity = n,
                _ => tracing::warn!(value = %v, "Ignoring invalid TAPLINE_RECORD_QUEUE_CAPACITY"),
            }
        }

        config
    }

    /// Whether the value of `name` must be hidden in records.
    pub(crate) fn is_redacted(&self, name: &HeaderName) -> bool {
        self.redact_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name.as_str()))
    }
}

fn parse_flag(value: &str, fallback: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            tracing::warn!(value = %value, "Ignoring invalid boolean flag");
            fallback
        }
    }
}

mod status_code {
    use axum::http::StatusCode;
    use serde::{de::Error, Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<StatusCode, D::Error> {
        let code = u16::deserialize(d)?;
        StatusCode::from_u16(code).map_err(D::Error::custom)
    }
}
