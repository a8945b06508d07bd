//! Replaying captured bodies and dispatching records once the replay is over.
//!
//! [`ReplayBody`] yields a sequence of buffered frames, byte for byte and in their original
//! order, and then carries on with whatever was left of the original stream. It restores
//! drained request bodies for the inner service, and replays captured responses to the
//! client.
//!
//! A response replay carries a [`RecordDispatch`]. The record is only handed to the sink
//! once the last frame has gone out, so emission can never hold up delivery. If the
//! replay body is dropped early, e.g. because the client disconnected, the guard still
//! dispatches the record, marked as interrupted.

use axum::body::Body;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::types::{LogRecord, ReplayOutcome};

/// What follows the buffered frames of a [`ReplayBody`].
pub(crate) enum Rest {
    /// The remainder of the original body, streamed live.
    Stream(Body),
    /// The original body failed at this point; the error is handed on unchanged.
    Failed(axum::Error),
    /// Nothing; the buffered frames are the whole body.
    Done,
}

/// Body that replays buffered frames followed by the unread rest of the original body.
pub struct ReplayBody {
    frames: VecDeque<Frame<Bytes>>,
    rest: Rest,
    length_known: bool,
    dispatch: Option<RecordDispatch>,
}

impl ReplayBody {
    pub(crate) fn new(frames: Vec<Frame<Bytes>>, rest: Rest) -> Self {
        Self {
            frames: frames.into(),
            rest,
            length_known: true,
            dispatch: None,
        }
    }

    /// Do not report an exact length even when everything is buffered, so the transport
    /// frames the replay the way it framed the original stream.
    pub(crate) fn unknown_length(mut self) -> Self {
        self.length_known = false;
        self
    }

    /// Dispatch `dispatch` once this body has been fully replayed.
    ///
    /// A body with nothing left to replay dispatches immediately; the transport may never
    /// poll it.
    pub(crate) fn with_dispatch(mut self, dispatch: RecordDispatch) -> Self {
        if self.is_end_stream() {
            dispatch.finish(ReplayOutcome::Delivered);
        } else {
            self.dispatch = Some(dispatch);
        }
        self
    }

    pub(crate) fn into_body(self) -> Body {
        Body::new(self)
    }

    fn finish(&mut self, outcome: ReplayOutcome) {
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.finish(outcome);
        }
    }

    fn buffered_len(&self) -> u64 {
        self.frames
            .iter()
            .filter_map(Frame::data_ref)
            .map(|data| data.len() as u64)
            .sum()
    }
}

impl HttpBody for ReplayBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if let Some(frame) = this.frames.pop_front() {
            if this.is_end_stream() {
                this.finish(ReplayOutcome::Delivered);
            }
            return Poll::Ready(Some(Ok(frame)));
        }

        match std::mem::replace(&mut this.rest, Rest::Done) {
            Rest::Done => {
                this.finish(ReplayOutcome::Delivered);
                Poll::Ready(None)
            }
            Rest::Failed(err) => {
                this.finish(ReplayOutcome::Interrupted);
                Poll::Ready(Some(Err(err)))
            }
            Rest::Stream(mut body) => match Pin::new(&mut body).poll_frame(cx) {
                Poll::Pending => {
                    this.rest = Rest::Stream(body);
                    Poll::Pending
                }
                Poll::Ready(None) => {
                    this.finish(ReplayOutcome::Delivered);
                    Poll::Ready(None)
                }
                Poll::Ready(Some(Ok(frame))) => {
                    if body.is_end_stream() {
                        this.finish(ReplayOutcome::Delivered);
                    } else {
                        this.rest = Rest::Stream(body);
                    }
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finish(ReplayOutcome::Interrupted);
                    Poll::Ready(Some(Err(err)))
                }
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty()
            && match &self.rest {
                Rest::Done => true,
                Rest::Stream(body) => body.is_end_stream(),
                Rest::Failed(_) => false,
            }
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.buffered_len();
        match &self.rest {
            Rest::Done if self.length_known => SizeHint::with_exact(buffered),
            Rest::Done | Rest::Failed(_) => {
                let mut hint = SizeHint::new();
                hint.set_lower(buffered);
                hint
            }
            Rest::Stream(body) => {
                let inner = body.size_hint();
                let mut hint = SizeHint::new();
                hint.set_lower(inner.lower() + buffered);
                if let Some(upper) = inner.upper() {
                    hint.set_upper(upper + buffered);
                }
                hint
            }
        }
    }
}

/// Sends a finished record to the background emitter exactly once.
///
/// Dropping an unfinished dispatch sends the record as [`ReplayOutcome::Interrupted`].
/// When the emitter queue is full the record is dropped and the loss is logged.
pub(crate) struct RecordDispatch {
    tx: mpsc::Sender<LogRecord>,
    record: Option<LogRecord>,
}

impl RecordDispatch {
    pub(crate) fn new(tx: mpsc::Sender<LogRecord>, record: LogRecord) -> Self {
        Self {
            tx,
            record: Some(record),
        }
    }

    pub(crate) fn finish(mut self, outcome: ReplayOutcome) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: ReplayOutcome) {
        let Some(mut record) = self.record.take() else {
            return;
        };
        record.replay = outcome;
        let correlation_id = record.correlation_id;

        if outcome == ReplayOutcome::Interrupted {
            warn!(correlation_id = %correlation_id, "Response replay did not complete");
        }
        match self.tx.try_send(record) {
            Ok(()) => {
                debug!(correlation_id = %correlation_id, stage = "record_emitted", outcome = ?outcome, "Record dispatched");
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                error!(correlation_id = %correlation_id, "Record queue full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(correlation_id = %correlation_id, "Failed to send record to background task");
            }
        }
    }
}

impl Drop for RecordDispatch {
    fn drop(&mut self) {
        self.send(ReplayOutcome::Interrupted);
    }
}
