//! Composite sink for fanning records out to several sinks.
//!
//! This module provides [`MultiSink`], a sink that composes an arbitrary number of
//! [`RecordSink`] implementations. Every record goes to all of them concurrently.
//!
//! # Example
//!
//! ```rust
//! use tapline::{MultiSink, TracingSink};
//!
//! // Create a composite sink
//! let sink = MultiSink::new()
//!     .with(TracingSink);
//!
//! // Use with RequestCaptureLayer
//! // let layer = RequestCaptureLayer::new(config, sink);
//! ```

use crate::{LogRecord, RecordSink, SinkError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Type alias for boxed futures used in the dyn-compatible wrapper.
type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Internal trait that is dyn-compatible for type erasure.
/// This wraps RecordSink implementations to allow storing them as trait objects.
trait DynSink: Send + Sync + 'static {
    fn emit_boxed(&self, record: LogRecord) -> BoxFuture<'_>;
}

/// Wrapper that implements DynSink for any RecordSink.
struct SinkWrapper<K: RecordSink> {
    inner: K,
}

impl<K: RecordSink> DynSink for SinkWrapper<K> {
    fn emit_boxed(&self, record: LogRecord) -> BoxFuture<'_> {
        Box::pin(self.inner.emit(record))
    }
}

/// A sink that delegates to multiple inner sinks.
///
/// Sinks run concurrently, so a slow sink does not hold up the others. If any of them
/// fails, the failures are logged individually and the composite returns
/// [`SinkError::Fanout`].
///
/// # Thread Safety
///
/// `MultiSink` is `Send + Sync` and can be safely shared across threads.
/// Each inner sink is wrapped in an `Arc` for efficient cloning.
#[derive(Clone)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn DynSink>>,
}

impl std::fmt::Debug for MultiSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl MultiSink {
    /// Create a new empty MultiSink.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Add a sink to the set. Returns self for builder pattern.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tapline::{MultiSink, TracingSink};
    ///
    /// let sink = MultiSink::new()
    ///     .with(TracingSink);
    /// ```
    pub fn with<K: RecordSink>(mut self, sink: K) -> Self {
        self.sinks.push(Arc::new(SinkWrapper { inner: sink }));
        self
    }

    /// Returns true if no sinks have been added.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Returns the number of sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

impl Default for MultiSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSink for MultiSink {
    async fn emit(&self, record: LogRecord) -> Result<(), SinkError> {
        let correlation_id = record.correlation_id;
        let futures: Vec<_> = self
            .sinks
            .iter()
            .map(|s| {
                let record = record.clone();
                let sink = s.clone();
                async move { sink.emit_boxed(record).await }
            })
            .collect();

        let results = futures::future::join_all(futures).await;
        let total = results.len();
        let mut failed = 0;
        for e in results.into_iter().filter_map(Result::err) {
            warn!(correlation_id = %correlation_id, error = %e, "Sink failed");
            failed += 1;
        }

        if failed == 0 {
            Ok(())
        } else {
            Err(SinkError::Fanout { failed, total })
        }
    }
}
