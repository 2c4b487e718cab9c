//! The underlying-source seam.
//!
//! An [`UnderlyingSource`] supplies data to a readable stream through
//! the controller it is handed. All three callbacks return boxed
//! futures; a synchronous source simply returns an already-ready one
//! (see [`ready_ok`]). The protocol guarantees at most one `pull` future
//! exists at a time, and that `cancel` is called at most once, after
//! which no callback runs again.

use std::future::Future;
use std::pin::Pin;

use crate::error::StreamError;
use crate::readable::controller::ReadableController;

/// Boxed future returned by source callbacks.
pub type SourceFuture = Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send>>;

/// An already-completed successful [`SourceFuture`].
#[must_use]
pub fn ready_ok() -> SourceFuture {
    Box::pin(std::future::ready(Ok(())))
}

/// An already-failed [`SourceFuture`].
#[must_use]
pub fn ready_err(reason: StreamError) -> SourceFuture {
    Box::pin(std::future::ready(Err(reason)))
}

/// Producer-side callbacks for a readable stream.
///
/// `start` runs once at construction; until its future completes no
/// `pull` is dispatched. `pull` is invoked when the consumer side wants
/// more data and no pull is in flight. `cancel` is the teardown hook;
/// its outcome is discarded by the protocol.
pub trait UnderlyingSource<C: Send + 'static>: Send {
    /// Called once at stream construction with the stream's controller.
    fn start(&mut self, controller: ReadableController<C>) -> SourceFuture {
        let _ = controller;
        ready_ok()
    }

    /// Called when the stream wants more data. At most one returned
    /// future is in flight at a time.
    fn pull(&mut self, controller: ReadableController<C>) -> SourceFuture {
        let _ = controller;
        ready_ok()
    }

    /// Called when the consumer cancels the stream. No other callback
    /// runs afterwards.
    fn cancel(&mut self, reason: Option<String>) -> SourceFuture {
        let _ = reason;
        ready_ok()
    }
}

/// Pull-based source over any iterator: one chunk per pull, closing the
/// stream when the iterator is exhausted.
#[derive(Debug)]
pub struct IterSource<I> {
    iter: I,
}

impl<I: Iterator> IterSource<I> {
    /// Wraps an iterator as an underlying source.
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
        }
    }
}

impl<I, C> UnderlyingSource<C> for IterSource<I>
where
    I: Iterator<Item = C> + Send,
    C: Send + 'static,
{
    fn pull(&mut self, controller: ReadableController<C>) -> SourceFuture {
        let item = self.iter.next();
        Box::pin(async move {
            match item {
                Some(chunk) => controller.enqueue(chunk),
                None => controller.close(),
            }
        })
    }
}
