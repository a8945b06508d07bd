//! Sink that writes records to the `tracing` log.
//!
//! [`TracingSink`] is the simplest useful [`RecordSink`]: every record becomes one
//! `INFO` event carrying the formatted request and response lines plus structured
//! fields. It also serves as an example of how to implement the trait.

use tracing::info;

use crate::{LogRecord, RecordSink, SinkError};

/// [`RecordSink`] that logs each record with `tracing::info!`.
///
/// The event includes:
/// - Correlation ID
/// - The request line (method, URL and body)
/// - The response line (status code and body)
/// - Duration and replay outcome
///
/// # Examples
///
/// ```rust,no_run
/// use tapline::{CaptureConfig, RequestCaptureLayer, TracingSink};
///
/// # #[tokio::main]
/// # async fn main() {
/// let layer = RequestCaptureLayer::new(CaptureConfig::default(), TracingSink);
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    async fn emit(&self, record: LogRecord) -> Result<(), SinkError> {
        info!(
            target: "tapline",
            correlation_id = %record.correlation_id,
            request = %record.request_text(),
            response = %record.response_text(),
            status = record.response.status,
            duration_ms = record.duration.as_millis() as u64,
            replay = ?record.replay,
            "Request captured"
        );
        Ok(())
    }
}
