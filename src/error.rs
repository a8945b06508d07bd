//! Error types surfaced by record sinks.
//!
//! Nothing in here ever reaches an HTTP client. Sink failures are reported on the
//! `tracing` diagnostic channel by the background emitter and then dropped.

/// Error returned by a [`RecordSink`](crate::RecordSink) that failed to accept a record.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The destination is not reachable right now.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    /// Writing the record failed.
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The record could not be serialized for the destination.
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Some members of a [`MultiSink`](crate::MultiSink) failed.
    #[error("{failed} of {total} sinks failed")]
    Fanout {
        /// Number of sinks that returned an error
        failed: usize,
        /// Number of sinks the record was sent to
        total: usize,
    },
}
