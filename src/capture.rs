//! In-memory capture of a response body.
//!
//! [`ResponseCapture`] takes the body out of a response, leaving the head (status and
//! headers) in place as the real destination, and buffers what the handler wrote. The
//! captured bytes can be read any number of times. Replaying puts an equivalent body back
//! into the same response.

use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use tracing::debug;

use crate::body::{drain, uncaptured_content_type, Drained};
use crate::config::CaptureConfig;
use crate::replay::{RecordDispatch, ReplayBody, Rest};
use crate::types::{snapshot_headers, CapturedBody, ReplayOutcome, ResponseSnapshot};

enum Captured {
    Buffered(Drained),
    /// Not buffered; the original body is handed back untouched.
    PassThrough {
        body: Body,
        reason: CapturedBody,
    },
}

/// A response whose body has been swapped out into a capture buffer.
///
/// # Examples
///
/// ```rust
/// use axum::{body::Body, response::Response};
/// use http_body_util::BodyExt;
/// use tapline::{CaptureConfig, ResponseCapture};
///
/// # async fn example() {
/// let response = Response::new(Body::from("Hello, World!"));
/// let capture = ResponseCapture::swap(response, &CaptureConfig::default()).await;
///
/// assert_eq!(capture.read_all(), "Hello, World!");
/// assert_eq!(capture.read_all(), "Hello, World!");
///
/// let response = capture.into_response();
/// let bytes = response.into_body().collect().await.unwrap().to_bytes();
/// assert_eq!(bytes, "Hello, World!");
/// # }
/// ```
pub struct ResponseCapture {
    response: Response,
    captured: Captured,
}

impl ResponseCapture {
    /// Take the body out of `response` and capture it under `config`'s size and content
    /// type policies.
    pub async fn swap(mut response: Response, config: &CaptureConfig) -> Self {
        let body = std::mem::replace(response.body_mut(), Body::empty());

        let captured = if !config.capture_response_body {
            Captured::PassThrough {
                body,
                reason: CapturedBody::NotCaptured,
            }
        } else if let Some(content_type) = uncaptured_content_type(response.headers()) {
            debug!(content_type = %content_type, "Skipping capture of response body");
            Captured::PassThrough {
                body,
                reason: CapturedBody::Skipped(content_type),
            }
        } else {
            Captured::Buffered(drain(body, config.max_body_bytes).await)
        };

        Self { response, captured }
    }

    /// Take the body out of `response` without reading it.
    ///
    /// For responses that never put a body on the wire, such as answers to `HEAD`.
    pub fn unbuffered(mut response: Response) -> Self {
        let body = std::mem::replace(response.body_mut(), Body::empty());
        Self {
            response,
            captured: Captured::PassThrough {
                body,
                reason: CapturedBody::NotCaptured,
            },
        }
    }

    /// The status code the handler set.
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// The headers the handler set.
    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// Everything captured so far. Empty when the body was passed through.
    pub fn read_all(&self) -> Bytes {
        match &self.captured {
            Captured::Buffered(drained) => drained.snapshot(),
            Captured::PassThrough { .. } => Bytes::new(),
        }
    }

    /// The captured body as it appears in a record.
    pub fn captured_body(&self) -> CapturedBody {
        match &self.captured {
            Captured::Buffered(drained) => drained.captured_body(),
            Captured::PassThrough { reason, .. } => reason.clone(),
        }
    }

    pub(crate) fn snapshot(&self, config: &CaptureConfig) -> ResponseSnapshot {
        ResponseSnapshot {
            status: self.status().as_u16(),
            headers: snapshot_headers(self.headers(), config),
            body: self.captured_body(),
        }
    }

    /// Put the captured body back into the response, unchanged.
    pub fn into_response(self) -> Response {
        let (mut response, replay) = self.into_parts();
        *response.body_mut() = replay.into_body();
        response
    }

    /// Like [`into_response`](Self::into_response), dispatching the record once the
    /// replay has finished.
    pub(crate) fn replay(self, dispatch: RecordDispatch) -> Response {
        let (mut response, replay) = self.into_parts();
        *response.body_mut() = replay.with_dispatch(dispatch).into_body();
        response
    }

    /// Put the body back and dispatch right away.
    ///
    /// Used when the transport is allowed to discard the body without reading it, so the
    /// end of the replay can never be observed.
    pub(crate) fn replay_bodiless(self, dispatch: RecordDispatch) -> Response {
        dispatch.finish(ReplayOutcome::Delivered);
        self.into_response()
    }

    fn into_parts(self) -> (Response, ReplayBody) {
        let replay = match self.captured {
            Captured::Buffered(drained) => drained.into_replay(),
            Captured::PassThrough { body, .. } => ReplayBody::new(Vec::new(), Rest::Stream(body)),
        };
        (self.response, replay)
    }
}

/// Whether a response with `status` to a `method` request carries a body on the wire.
pub(crate) fn has_body(method: &Method, status: StatusCode) -> bool {
    method != Method::HEAD
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::tests::test_record;
    use axum::http::header::CONTENT_TYPE;
    use futures::{stream, StreamExt};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn streaming_response(chunks: &[&'static str]) -> Response {
        let chunks: Vec<Result<Bytes, std::io::Error>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        Response::builder()
            .status(StatusCode::CREATED)
            .header(CONTENT_TYPE, "text/plain")
            .header("set-cookie", "session=abc")
            .body(Body::from_stream(stream::iter(chunks)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_multi_chunk_capture_and_replay() {
        let config = CaptureConfig::default();
        let capture = ResponseCapture::swap(streaming_response(&["a", "bc", "def"]), &config).await;

        assert_eq!(capture.status(), StatusCode::CREATED);
        assert_eq!(capture.read_all(), "abcdef");

        let snapshot = capture.snapshot(&config);
        assert_eq!(snapshot.status, 201);
        assert_eq!(snapshot.body, CapturedBody::Complete("abcdef".to_owned()));
        assert!(snapshot
            .headers
            .contains(&("set-cookie".to_owned(), crate::types::REDACTED.to_owned())));

        let response = capture.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["set-cookie"], "session=abc");
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "abcdef");
    }

    #[tokio::test]
    async fn test_handler_wrote_nothing() {
        let response = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap();
        let capture = ResponseCapture::swap(response, &CaptureConfig::default()).await;

        assert!(capture.read_all().is_empty());
        assert_eq!(capture.captured_body(), CapturedBody::Complete(String::new()));

        let (tx, mut rx) = mpsc::channel(8);
        let response = capture.replay(RecordDispatch::new(tx, test_record(7)));
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(rx.try_recv().unwrap().replay, ReplayOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_binary_response_passes_through() {
        let response = Response::builder()
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(vec![0u8, 1, 2, 3]))
            .unwrap();
        let capture = ResponseCapture::swap(response, &CaptureConfig::default()).await;

        assert!(capture.read_all().is_empty());
        assert_eq!(
            capture.captured_body(),
            CapturedBody::Skipped("application/octet-stream".to_owned())
        );

        let (tx, mut rx) = mpsc::channel(8);
        let response = capture.replay(RecordDispatch::new(tx, test_record(8)));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.as_ref(), &[0u8, 1, 2, 3]);
        assert_eq!(rx.try_recv().unwrap().replay, ReplayOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_large_response_replayed_in_full() {
        let config = CaptureConfig {
            max_body_bytes: 4,
            ..CaptureConfig::default()
        };
        let capture =
            ResponseCapture::swap(streaming_response(&["abc", "def", "ghi"]), &config).await;

        assert_eq!(capture.read_all(), "abcd");
        assert_eq!(capture.captured_body(), CapturedBody::Truncated("abcd".to_owned()));

        let response = capture.into_response();
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "abcdefghi");
    }

    #[tokio::test]
    async fn test_event_stream_is_not_buffered() {
        let events = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from("data: 0\n\n"))])
            .chain(stream::pending());
        let response = Response::builder()
            .header(CONTENT_TYPE, "text/event-stream")
            .body(Body::from_stream(events))
            .unwrap();

        let capture = tokio::time::timeout(
            Duration::from_secs(1),
            ResponseCapture::swap(response, &CaptureConfig::default()),
        )
        .await
        .expect("an open event stream must not be drained");
        assert_eq!(
            capture.captured_body(),
            CapturedBody::Skipped("text/event-stream".to_owned())
        );

        let mut body = capture.into_response().into_body();
        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), "data: 0\n\n");
    }

    #[tokio::test]
    async fn test_bodiless_replay_dispatches_immediately() {
        let response = Response::new(Body::from("never sent"));
        let capture = ResponseCapture::unbuffered(response);
        assert_eq!(capture.captured_body(), CapturedBody::NotCaptured);

        let (tx, mut rx) = mpsc::channel(8);
        let response = capture.replay_bodiless(RecordDispatch::new(tx, test_record(9)));
        drop(response);
        assert_eq!(rx.try_recv().unwrap().replay, ReplayOutcome::Delivered);
    }

    #[test]
    fn test_has_body() {
        assert!(has_body(&Method::GET, StatusCode::OK));
        assert!(!has_body(&Method::HEAD, StatusCode::OK));
        assert!(!has_body(&Method::GET, StatusCode::NO_CONTENT));
        assert!(!has_body(&Method::GET, StatusCode::NOT_MODIFIED));
        assert!(!has_body(&Method::GET, StatusCode::CONTINUE));
        assert!(has_body(&Method::POST, StatusCode::NOT_FOUND));
    }
}
