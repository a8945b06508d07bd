//! # Tapline
//!
//! An Axum middleware that records every request and its response, and replays both to
//! their destinations unchanged.
//!
//! The layer sits between the transport and your routes. For each request it
//!
//! 1. drains the request body, keeps a text copy, and hands the inner service a body that
//!    reads exactly like the original;
//! 2. runs the inner service;
//! 3. swaps the response body out into an in-memory capture, then replays it into the
//!    response, byte for byte;
//! 4. once the replay has finished, hands a [`LogRecord`] to your [`RecordSink`] on a
//!    background task.
//!
//! Nothing the layer does internally can change what the client sees. Capture problems
//! degrade the record, sink failures go to the `tracing` diagnostic channel, and handler
//! failures pass through untouched.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{extract::Path, routing::get, Json, Router};
//! use serde_json::{json, Value};
//! use tapline::{CaptureConfig, RequestCaptureLayer, TracingSink};
//!
//! async fn employee(Path(id): Path<u32>) -> Json<Value> {
//!     Json(json!({ "ID": id, "Name": "Ada Lovelace" }))
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .route("/api/employee/{id}", get(employee))
//!         .layer(RequestCaptureLayer::new(CaptureConfig::default(), TracingSink));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Custom Sinks
//!
//! Implement the [`RecordSink`] trait to send records somewhere else:
//!
//! ```rust
//! use tapline::{LogRecord, RecordSink, SinkError};
//!
//! #[derive(Debug)]
//! struct StdoutSink;
//!
//! impl RecordSink for StdoutSink {
//!     async fn emit(&self, record: LogRecord) -> Result<(), SinkError> {
//!         println!("{}", serde_json::to_string(&record)?);
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Handler failures
//!
//! If the inner service returns an error, or panics, the error or panic is passed on
//! unchanged and a record is still emitted with [`CaptureConfig::failure_status`]. To
//! capture the error page your framework renders for a panic, install the panic handler
//! *inside* the capture layer, e.g. `tower_http::catch_panic::CatchPanicLayer`.

use axum::{extract::Request, http::Method, response::Response};
use futures::FutureExt;
use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::{Instant, SystemTime},
};
use tokio::sync::mpsc;
use tower::{Layer, Service};
use tracing::{debug, error, instrument};

pub mod body;
pub mod capture;
pub mod config;
pub mod error;
pub mod format;
pub mod logging_sink;
pub mod multi_sink;
mod replay;
pub mod types;

pub use capture::ResponseCapture;
pub use config::CaptureConfig;
pub use error::SinkError;
pub use logging_sink::TracingSink;
pub use multi_sink::MultiSink;
pub use types::{
    CapturedBody, CorrelationId, LogRecord, ReplayOutcome, RequestSnapshot, ResponseSnapshot,
};

use body::capture_request_body;
use capture::has_body;
use replay::RecordDispatch;

/// Global atomic counter for correlation IDs and process start timestamp
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);
static PROCESS_START_TIME: std::sync::OnceLock<u64> = std::sync::OnceLock::new();

/// Generate a unique correlation ID combining process start time and counter
fn generate_correlation_id() -> CorrelationId {
    let start_time = *PROCESS_START_TIME.get_or_init(|| {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    });

    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);

    // High 32 bits: process start timestamp, Low 32 bits: counter
    CorrelationId((start_time << 32) | (counter & 0xFFFF_FFFF))
}

/// Destination for finished records.
///
/// Called once per intercepted request, from a background task, after the response has
/// been replayed to the client. Errors are reported with `tracing::error!` and otherwise
/// ignored; retrying is up to the sink.
///
/// Records are handed over one at a time through a queue of
/// [`CaptureConfig::record_queue_capacity`] entries. While a slow sink keeps the queue
/// full, new records are dropped with an `error!` rather than buffered.
///
/// # Examples
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use tapline::{LogRecord, RecordSink, SinkError};
///
/// #[derive(Debug, Default, Clone)]
/// struct MemorySink {
///     records: Arc<Mutex<Vec<LogRecord>>>,
/// }
///
/// impl RecordSink for MemorySink {
///     async fn emit(&self, record: LogRecord) -> Result<(), SinkError> {
///         self.records
///             .lock()
///             .map_err(|_| SinkError::Unavailable("poisoned".to_owned()))?
///             .push(record);
///         Ok(())
///     }
/// }
/// ```
pub trait RecordSink: Send + Sync + 'static {
    /// Accept one finished record.
    fn emit(&self, record: LogRecord) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Tower layer for the capture middleware.
///
/// This is the main entry point. It implements the Tower [`Layer`] trait and can be used
/// with Axum's layering system. Creating the layer spawns the background task that feeds
/// records to the sink, so it must be created inside a Tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use axum::{routing::get, Router};
/// use tapline::{CaptureConfig, RequestCaptureLayer, TracingSink};
///
/// # async fn hello() -> &'static str { "Hello" }
/// # #[tokio::main]
/// # async fn main() {
/// let layer = RequestCaptureLayer::new(CaptureConfig::from_env(), TracingSink);
///
/// let app: Router = Router::new()
///     .route("/hello", get(hello))
///     .layer(layer);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RequestCaptureLayer {
    config: Arc<CaptureConfig>,
    tx: mpsc::Sender<LogRecord>,
}

impl RequestCaptureLayer {
    /// Create a new capture layer with the given configuration and sink.
    ///
    /// Spawns the background task that hands records to `sink`. The task ends once every
    /// layer and service clone has been dropped and the queue is empty.
    pub fn new<K: RecordSink>(config: CaptureConfig, sink: K) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogRecord>(config.record_queue_capacity.max(1));
        let sink = Arc::new(sink);

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let correlation_id = record.correlation_id;
                if let Err(e) = sink.emit(record).await {
                    error!(correlation_id = %correlation_id, error = %e, "Failed to emit record");
                }
            }
            debug!("Record emitter stopped");
        });

        Self {
            config: Arc::new(config),
            tx,
        }
    }
}

impl<S> Layer<S> for RequestCaptureLayer {
    type Service = RequestCaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestCaptureService {
            inner,
            config: Arc::clone(&self.config),
            tx: self.tx.clone(),
        }
    }
}

/// Tower service implementation of the capture middleware.
///
/// Holds no per-request state: everything a request needs is created when it arrives and
/// dropped when its response has been delivered.
///
/// Users typically don't interact with this type directly - it's created by
/// [`RequestCaptureLayer`].
#[derive(Clone, Debug)]
pub struct RequestCaptureService<S> {
    inner: S,
    config: Arc<CaptureConfig>,
    tx: mpsc::Sender<LogRecord>,
}

impl<S> Service<Request> for RequestCaptureService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display + Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, request: Request) -> Self::Future {
        let correlation_id = generate_correlation_id();
        let timestamp = SystemTime::now();
        let start = Instant::now();

        // The readied service goes into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let config = Arc::clone(&self.config);
        let tx = self.tx.clone();
        let method = request.method().clone();

        debug!(correlation_id = %correlation_id, method = %request.method(), uri = %request.uri(), "Starting request processing");

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();
            let (request_body, restored) = capture_request_body(body, &parts.headers, &config).await;
            let snapshot = RequestSnapshot::from_parts(&parts, request_body, &config);
            parts.extensions.insert(correlation_id);
            let request = Request::from_parts(parts, restored);
            debug!(correlation_id = %correlation_id, stage = "request_captured", "Request body captured");

            debug!(correlation_id = %correlation_id, stage = "handler_running", "Calling inner service");
            let outcome = AssertUnwindSafe(inner.call(request)).catch_unwind().await;

            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!(correlation_id = %correlation_id, error = %e, "Inner service failed");
                    failed_dispatch(tx, correlation_id, timestamp, start, snapshot, &config)
                        .finish(ReplayOutcome::HandlerFailed);
                    return Err(e);
                }
                Err(panic) => {
                    error!(correlation_id = %correlation_id, "Inner service panicked");
                    failed_dispatch(tx, correlation_id, timestamp, start, snapshot, &config)
                        .finish(ReplayOutcome::HandlerFailed);
                    std::panic::resume_unwind(panic);
                }
            };

            let capture = if method == Method::HEAD {
                ResponseCapture::unbuffered(response)
            } else {
                ResponseCapture::swap(response, &config).await
            };
            debug!(correlation_id = %correlation_id, stage = "response_captured", status = %capture.status(), "Response body captured");

            let record = LogRecord {
                correlation_id,
                timestamp,
                duration: start.elapsed(),
                request: snapshot,
                response: capture.snapshot(&config),
                replay: ReplayOutcome::Delivered,
            };
            let dispatch = RecordDispatch::new(tx, record);
            // The transport may discard a body it must not send without polling it
            let response = if has_body(&method, capture.status()) {
                capture.replay(dispatch)
            } else {
                capture.replay_bodiless(dispatch)
            };
            debug!(correlation_id = %correlation_id, stage = "response_replayed", "Response handed back to transport");

            Ok(response)
        })
    }
}

fn failed_dispatch(
    tx: mpsc::Sender<LogRecord>,
    correlation_id: CorrelationId,
    timestamp: SystemTime,
    start: Instant,
    request: RequestSnapshot,
    config: &CaptureConfig,
) -> RecordDispatch {
    let record = LogRecord {
        correlation_id,
        timestamp,
        duration: start.elapsed(),
        request,
        response: ResponseSnapshot::failed(config.failure_status),
        replay: ReplayOutcome::HandlerFailed,
    };
    RecordDispatch::new(tx, record)
}
