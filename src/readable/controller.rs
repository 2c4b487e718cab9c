//! The controller handle handed to an underlying source.
//!
//! A [`ReadableController`] is the only way data enters a stream. It
//! holds a weak reference to the stream state, so a source that keeps
//! its controller alive does not keep the stream alive.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::readable::state::{drive, ReadableState, Status};
use crate::strategy::valid_size;

/// Feeds chunks, close, and error signals into a readable stream.
pub struct ReadableController<C: Send + 'static> {
    shared: Weak<Mutex<ReadableState<C>>>,
}

impl<C: Send + 'static> Clone for ReadableController<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<C: Send + 'static> std::fmt::Debug for ReadableController<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadableController").finish_non_exhaustive()
    }
}

impl<C: Send + 'static> ReadableController<C> {
    pub(crate) fn new(shared: Weak<Mutex<ReadableState<C>>>) -> Self {
        Self { shared }
    }

    fn upgrade(&self) -> Result<Arc<Mutex<ReadableState<C>>>, StreamError> {
        self.shared
            .upgrade()
            .ok_or(StreamError::InvalidState("stream was dropped"))
    }

    /// Delivers one chunk.
    ///
    /// If a read is already waiting, the chunk bypasses the queue and
    /// settles that read directly; otherwise it is buffered. Fails with
    /// [`ErrorKind::InvalidState`](crate::ErrorKind::InvalidState) if the
    /// stream is closed, errored, or close has been requested.
    ///
    /// A strategy that sizes the chunk as negative, NaN, or infinite
    /// errors the whole stream and returns that same
    /// [`StreamError::Strategy`].
    pub fn enqueue(&self, chunk: C) -> Result<(), StreamError> {
        let shared = self.upgrade()?;
        {
            let mut state = shared.lock();
            match &state.status {
                Status::Closed => return Err(StreamError::InvalidState("stream is closed")),
                Status::Errored(_) => return Err(StreamError::InvalidState("stream is errored")),
                Status::Readable => {}
            }
            if state.close_requested {
                return Err(StreamError::InvalidState("close already requested"));
            }

            let waiting = state.reader.as_mut().and_then(|r| r.requests.pop_front());
            if let Some(request) = waiting {
                request.resolve_chunk(chunk);
            } else {
                let size = state.strategy.size(&chunk);
                if !valid_size(size) {
                    let reason = StreamError::Strategy(size);
                    state.error(reason.clone());
                    return Err(reason);
                }
                state.queue.push(chunk, size);
            }
            #[cfg(feature = "tracing-integration")]
            tracing::trace!(
                buffered = state.queue.len(),
                desired = state.desired_size(),
                "chunk enqueued"
            );
            state.request_pull();
        }
        drive(&shared, None);
        Ok(())
    }

    /// Requests close. The stream finalizes to `Closed` once every
    /// buffered chunk has been read; reads already waiting settle as
    /// done immediately.
    pub fn close(&self) -> Result<(), StreamError> {
        let shared = self.upgrade()?;
        let mut state = shared.lock();
        match &state.status {
            Status::Closed => return Err(StreamError::InvalidState("stream is closed")),
            Status::Errored(_) => return Err(StreamError::InvalidState("stream is errored")),
            Status::Readable => {}
        }
        if state.close_requested {
            return Err(StreamError::InvalidState("close already requested"));
        }
        state.close_requested = true;
        #[cfg(feature = "tracing-integration")]
        tracing::debug!(buffered = state.queue.len(), "close requested");
        if state.queue.is_empty() {
            state.finalize_close();
        }
        Ok(())
    }

    /// Errors the stream with `reason`.
    ///
    /// Buffered chunks are discarded, every pending read and the
    /// reader's closed signal reject with the same reason. Always
    /// succeeds; a no-op in terminal states.
    pub fn error(&self, reason: StreamError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.lock().error(reason);
        }
    }

    /// `high_water_mark - total buffered size`, the backpressure signal.
    ///
    /// `None` when the stream is errored, `Some(0.0)` once closed.
    #[must_use]
    pub fn desired_size(&self) -> Option<f64> {
        let shared = self.shared.upgrade()?;
        let state = shared.lock();
        match &state.status {
            Status::Errored(_) => None,
            Status::Closed => Some(0.0),
            Status::Readable => Some(state.desired_size()),
        }
    }
}
