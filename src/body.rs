//! Draining bodies into memory while keeping them readable for the next consumer.
//!
//! A body can only be read once. [`drain`] reads it frame by frame until the stream is
//! exhausted, or until `max_body_bytes` have been buffered, and keeps every frame it read.
//! The result can be turned back into an equivalent body with [`Drained::into_replay`]:
//! the buffered frames first, in order, then whatever was not read, streamed live.
//!
//! The declared length of a body is only used as a capacity hint. Chunked bodies carry
//! none, and a wrong `Content-Length` must never cut a capture short.

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, HeaderMap},
};
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame};
use http_body_util::BodyExt;
use tracing::{debug, warn};

use crate::config::CaptureConfig;
use crate::replay::{ReplayBody, Rest};
use crate::types::CapturedBody;

/// A body that has been read into memory, up to the capture limit.
pub(crate) struct Drained {
    frames: Vec<Frame<Bytes>>,
    captured: Bytes,
    truncated: bool,
    error: Option<String>,
    rest: Rest,
    length_known: bool,
}

impl Drained {
    /// Immutable snapshot of the captured bytes. Reading it never affects the replay.
    pub(crate) fn snapshot(&self) -> Bytes {
        self.captured.clone()
    }

    /// The captured bytes decoded as UTF-8, replacing invalid sequences.
    pub(crate) fn captured_body(&self) -> CapturedBody {
        let text = String::from_utf8_lossy(&self.captured).into_owned();
        match (&self.error, self.truncated) {
            (Some(error), _) => CapturedBody::Incomplete {
                text,
                error: error.clone(),
            },
            (None, true) => CapturedBody::Truncated(text),
            (None, false) => CapturedBody::Complete(text),
        }
    }

    /// A body equivalent to the one that was drained.
    pub(crate) fn into_replay(self) -> ReplayBody {
        let replay = ReplayBody::new(self.frames, self.rest);
        if self.length_known {
            replay
        } else {
            replay.unknown_length()
        }
    }
}

/// Read `body` until it is exhausted or more than `limit` bytes of data have arrived.
///
/// Every frame read is kept for the replay, including trailers. Stream errors end the
/// drain; the error is kept so the replay can hand it on.
pub(crate) async fn drain(mut body: Body, limit: usize) -> Drained {
    let length_known = body.size_hint().exact().is_some();
    let capacity = usize::try_from(body.size_hint().lower())
        .unwrap_or(usize::MAX)
        .min(limit);
    let mut captured = BytesMut::with_capacity(capacity);
    let mut frames = Vec::new();
    let mut seen = 0usize;

    loop {
        match body.frame().await {
            None => {
                return Drained {
                    frames,
                    captured: captured.freeze(),
                    truncated: false,
                    error: None,
                    rest: Rest::Done,
                    length_known,
                };
            }
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    let room = limit.saturating_sub(captured.len());
                    captured.extend_from_slice(&data[..data.len().min(room)]);
                    seen = seen.saturating_add(data.len());
                }
                frames.push(frame);

                if seen > limit {
                    debug!(limit, "Body exceeds capture limit, streaming the rest");
                    let rest = if body.is_end_stream() {
                        Rest::Done
                    } else {
                        Rest::Stream(body)
                    };
                    return Drained {
                        frames,
                        captured: captured.freeze(),
                        truncated: true,
                        error: None,
                        rest,
                        length_known,
                    };
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Stream error during body capture");
                return Drained {
                    frames,
                    captured: captured.freeze(),
                    truncated: false,
                    error: Some(e.to_string()),
                    rest: Rest::Failed(e),
                    length_known,
                };
            }
        }
    }
}

/// Capture a request body and restore it for the next consumer.
///
/// Returns the captured text and a body that reads exactly like the original. Capture
/// never fails: stream errors and invalid UTF-8 degrade the captured text, and the
/// restored body reproduces the original stream, errors included.
///
/// # Examples
///
/// ```rust
/// use axum::{body::Body, http::HeaderMap};
/// use http_body_util::BodyExt;
/// use tapline::{body::capture_request_body, CaptureConfig, CapturedBody};
///
/// # async fn example() {
/// let (captured, restored) =
///     capture_request_body(Body::from("Hello, World!"), &HeaderMap::new(), &CaptureConfig::default())
///         .await;
///
/// assert_eq!(captured, CapturedBody::Complete("Hello, World!".to_owned()));
/// let bytes = restored.collect().await.unwrap().to_bytes();
/// assert_eq!(bytes, "Hello, World!");
/// # }
/// ```
pub async fn capture_request_body(
    body: Body,
    headers: &HeaderMap,
    config: &CaptureConfig,
) -> (CapturedBody, Body) {
    if !config.capture_request_body {
        return (CapturedBody::NotCaptured, body);
    }
    if let Some(content_type) = uncaptured_content_type(headers) {
        debug!(content_type = %content_type, "Skipping capture of request body");
        return (CapturedBody::Skipped(content_type), body);
    }

    let drained = drain(body, config.max_body_bytes).await;
    let captured = drained.captured_body();
    (captured, drained.into_replay().into_body())
}

/// The media type from `Content-Type` when the body must not be buffered: non-textual
/// content, and event streams that stay open indefinitely.
///
/// Missing or unparsable content types are treated as text and decoded on a best-effort
/// basis.
pub(crate) fn uncaptured_content_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let media: mime::Mime = value.parse().ok()?;
    if is_textual(&media) && media.essence_str() != mime::TEXT_EVENT_STREAM.essence_str() {
        None
    } else {
        Some(media.essence_str().to_owned())
    }
}

fn is_textual(media: &mime::Mime) -> bool {
    if media.type_() == mime::TEXT {
        return true;
    }
    if media.type_() != mime::APPLICATION {
        return false;
    }
    if matches!(media.suffix().map(|s| s.as_str()), Some("json" | "xml")) {
        return true;
    }
    matches!(
        media.subtype().as_str(),
        "json"
            | "xml"
            | "javascript"
            | "ecmascript"
            | "x-www-form-urlencoded"
            | "graphql"
            | "x-ndjson"
            | "x-yaml"
            | "yaml"
    )
}
