//! Data types for captured HTTP request and response information.
//!
//! This module contains the snapshots built for each intercepted request, the record
//! handed to a [`RecordSink`](crate::RecordSink), and the small enums describing how a
//! body was captured and how the response replay ended.

use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::time::{Duration, SystemTime};

use crate::config::CaptureConfig;
use crate::format;

/// Placeholder stored instead of the value of a redacted header.
pub const REDACTED: &str = "[redacted]";

/// Correlation id assigned to each intercepted request.
///
/// The coordinator inserts it into the request extensions, so handlers can pick it up with
/// `Extension<CorrelationId>` and put it in their own logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CorrelationId(pub u64);

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// How much of a body made it into the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum CapturedBody {
    /// The whole body, decoded as UTF-8 (lossy).
    Complete(String),
    /// The first `max_body_bytes` of a larger body. The client still got all of it.
    Truncated(String),
    /// Not buffered because the content type is not textual. Holds the content type.
    Skipped(String),
    /// Capture is disabled for this direction.
    NotCaptured,
    /// The body stream failed while it was being read.
    Incomplete {
        /// Whatever arrived before the failure
        text: String,
        /// The stream error
        error: String,
    },
}

impl CapturedBody {
    /// The captured text, empty when nothing was captured.
    pub fn text(&self) -> &str {
        match self {
            Self::Complete(text) | Self::Truncated(text) | Self::Incomplete { text, .. } => text,
            Self::Skipped(_) | Self::NotCaptured => "",
        }
    }

    /// Whether the text is everything the peer sent.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// How delivery of the replayed response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// Every captured byte was handed back to the transport.
    Delivered,
    /// The response body was dropped before it was fully delivered, usually because the
    /// client went away.
    Interrupted,
    /// The inner service failed or panicked and produced no response to replay.
    HandlerFailed,
}

/// Immutable snapshot of an intercepted request.
///
/// Built once per request, after the body has been captured, and owned by that request's
/// flow only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSnapshot {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// `http` / `https`, from the request URI or the configured default
    pub scheme: String,
    /// Host (and port) from the URI authority or the `Host` header
    pub host: String,
    /// Request path
    pub path: String,
    /// Raw query string without the leading `?`, empty when absent
    pub query: String,
    /// Request headers in arrival order, sensitive values redacted
    pub headers: Vec<(String, String)>,
    /// Request body as captured
    pub body: CapturedBody,
}

impl RequestSnapshot {
    /// Build a snapshot from the request head and the captured body.
    pub fn from_parts(
        parts: &axum::http::request::Parts,
        body: CapturedBody,
        config: &CaptureConfig,
    ) -> Self {
        let uri = &parts.uri;
        let scheme = uri
            .scheme_str()
            .map(str::to_owned)
            .unwrap_or_else(|| config.default_scheme.clone());
        let host = uri
            .authority()
            .map(|a| a.as_str().to_owned())
            .or_else(|| {
                parts
                    .headers
                    .get(axum::http::header::HOST)
                    .map(|h| String::from_utf8_lossy(h.as_bytes()).into_owned())
            })
            .unwrap_or_default();

        Self {
            method: parts.method.as_str().to_owned(),
            scheme,
            host,
            path: uri.path().to_owned(),
            query: uri.query().unwrap_or_default().to_owned(),
            headers: snapshot_headers(&parts.headers, config),
            body,
        }
    }
}

/// Snapshot of the response the inner service produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSnapshot {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: u16,
    /// Response headers in order, sensitive values redacted
    pub headers: Vec<(String, String)>,
    /// Response body as captured
    pub body: CapturedBody,
}

impl ResponseSnapshot {
    /// Snapshot for a request whose inner service produced no response at all.
    pub(crate) fn failed(status: StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            headers: Vec::new(),
            body: CapturedBody::Complete(String::new()),
        }
    }

    /// The status as a [`StatusCode`].
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// One request/response pair, as handed to a [`RecordSink`](crate::RecordSink).
///
/// Exactly one record is produced for every request that reaches the capture layer.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// Unique identifier of this request within the process
    pub correlation_id: CorrelationId,
    /// When the request was received by the middleware
    pub timestamp: SystemTime,
    /// Time from receiving the request until the response was captured
    pub duration: Duration,
    /// The request
    pub request: RequestSnapshot,
    /// The response
    pub response: ResponseSnapshot,
    /// How replaying the response to the client ended
    pub replay: ReplayOutcome,
}

impl LogRecord {
    /// The request rendered as a single log line.
    pub fn request_text(&self) -> String {
        format::format_request(&self.request)
    }

    /// The response rendered as a single log line.
    pub fn response_text(&self) -> String {
        format::format_response(self.response.status_code(), &self.response.body)
    }
}

/// Copy headers in order, hiding the values the config marks as sensitive.
pub(crate) fn snapshot_headers(headers: &HeaderMap, config: &CaptureConfig) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if config.is_redacted(name) {
                REDACTED.to_owned()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_owned(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(request: Request<()>) -> axum::http::request::Parts {
        request.into_parts().0
    }

    #[test]
    fn test_snapshot_origin_form_uses_host_header() {
        let parts = parts(
            Request::get("/api/employee/5?expand=true")
                .header("host", "example.com:8080")
                .header("authorization", "Bearer secret")
                .body(())
                .unwrap(),
        );
        let snapshot = RequestSnapshot::from_parts(
            &parts,
            CapturedBody::Complete(String::new()),
            &CaptureConfig::default(),
        );

        assert_eq!(snapshot.method, "GET");
        assert_eq!(snapshot.scheme, "http");
        assert_eq!(snapshot.host, "example.com:8080");
        assert_eq!(snapshot.path, "/api/employee/5");
        assert_eq!(snapshot.query, "expand=true");
        assert_eq!(
            snapshot.headers,
            vec![
                ("host".to_owned(), "example.com:8080".to_owned()),
                ("authorization".to_owned(), REDACTED.to_owned()),
            ]
        );
    }

    #[test]
    fn test_snapshot_absolute_form_uri_wins() {
        let parts = parts(
            Request::post("https://api.example.com/orders")
                .header("host", "ignored.example.com")
                .body(())
                .unwrap(),
        );
        let snapshot = RequestSnapshot::from_parts(
            &parts,
            CapturedBody::Complete("{}".to_owned()),
            &CaptureConfig::default(),
        );

        assert_eq!(snapshot.scheme, "https");
        assert_eq!(snapshot.host, "api.example.com");
        assert_eq!(snapshot.query, "");
    }

    #[test]
    fn test_captured_body_text() {
        assert_eq!(CapturedBody::Truncated("abc".into()).text(), "abc");
        assert_eq!(CapturedBody::Skipped("image/png".into()).text(), "");
        assert!(!CapturedBody::NotCaptured.is_complete());
        assert!(CapturedBody::Complete(String::new()).is_complete());
    }

    #[test]
    fn test_correlation_id_display() {
        assert_eq!(CorrelationId(0x2a).to_string(), "000000000000002a");
    }
}
