//! The underlying-sink seam.
//!
//! An [`UnderlyingSink`] is where a writable stream drains to. `write`
//! and `close` return boxed futures settled by the sink's own
//! completion signal; `abort` is fire-and-forget cleanup whose result
//! the protocol never observes.

use std::future::Future;
use std::pin::Pin;

use crate::error::StreamError;
use crate::writable::WritableController;

/// Boxed future returned by sink callbacks.
pub type SinkFuture = Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send>>;

/// An already-completed successful [`SinkFuture`].
#[must_use]
pub fn sink_ready_ok() -> SinkFuture {
    Box::pin(std::future::ready(Ok(())))
}

/// Consumer-side callbacks for a writable stream.
///
/// The protocol serializes sink operations: at most one `write` or
/// `close` future is in flight at a time, and chunks arrive in the
/// order they were written.
pub trait UnderlyingSink<C: Send + 'static>: Send {
    /// Called once at stream construction.
    fn start(&mut self, controller: WritableController<C>) -> SinkFuture {
        let _ = controller;
        sink_ready_ok()
    }

    /// Writes one chunk; the returned future settles when the sink has
    /// accepted it.
    fn write(&mut self, chunk: C) -> SinkFuture;

    /// Flushes and closes the sink after the final queued write.
    fn close(&mut self) -> SinkFuture {
        sink_ready_ok()
    }

    /// Tears the sink down after an abort. No result is observed.
    fn abort(&mut self, reason: Option<String>) {
        let _ = reason;
    }
}
