//! The exclusive reader: the consumer-side capability over a stream.
//!
//! A [`Reader`] is a checked-out handle. While it exists (and has not
//! been released) the stream is locked and no second reader can be
//! created. Releasing the lock is explicit via
//! [`Reader::release_lock`]; the stream closing or erroring settles the
//! reader's `closed()` signal but does **not** release the lock.
//!
//! # Closed-signal generations
//!
//! Each lock tenure owns one settlement cell. `closed()` always returns
//! a future over the *current* cell. `release_lock()` rejects the
//! tenure's cell if it is still pending and installs a fresh,
//! pre-rejected cell, so futures obtained before and after release
//! settle independently — the before-future reports how the stream
//! ended, the after-future reports the revoked lock.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::readable::state::{cancel_stream, drive, ReadRequest, Shared, Status};
use crate::readable::ReadOutcome;
use crate::settlement::{Closed, Settlement};
use crate::readable::source::SourceFuture;

pub(crate) const LOCK_RELEASED: &str = "reader lock was released";

/// Exclusive reading capability over a [`ReadableStream`](crate::ReadableStream).
pub struct Reader<C: Send + 'static> {
    shared: Shared<C>,
    /// Cell backing `closed()`; replaced on release.
    closed_cell: Mutex<Arc<Settlement>>,
    released: AtomicBool,
}

impl<C: Send + 'static> std::fmt::Debug for Reader<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> Reader<C> {
    pub(crate) fn new(shared: Shared<C>, closed: Arc<Settlement>) -> Self {
        Self {
            shared,
            closed_cell: Mutex::new(closed),
            released: AtomicBool::new(false),
        }
    }

    /// Reads the next chunk.
    ///
    /// Settles with [`ReadOutcome::Chunk`] when data is available,
    /// [`ReadOutcome::Done`] once the stream has closed and drained, or
    /// the stream's error. Concurrent `read()` calls settle in call
    /// order: the Nth pending read gets the Nth chunk enqueued after it.
    ///
    /// Fails with [`ErrorKind::Lock`](crate::ErrorKind::Lock) if the
    /// lock has been released, including for futures still pending at
    /// release time.
    pub fn read(&self) -> Read<C> {
        if self.released.load(Ordering::SeqCst) {
            return Read::immediate(Err(StreamError::Lock(LOCK_RELEASED)));
        }

        // Dequeue / terminal answer / request registration must happen in
        // one critical section: an enqueue slipping in between would put a
        // chunk in the queue behind a freshly registered request and break
        // FIFO settlement.
        let registered = {
            let mut state = self.shared.lock();
            if let Some(chunk) = state.queue.pop() {
                if state.close_requested && state.queue.is_empty() {
                    state.finalize_close();
                } else {
                    state.request_pull();
                }
                Err(Ok(ReadOutcome::Chunk(chunk)))
            } else {
                match &state.status {
                    Status::Closed => Err(Ok(ReadOutcome::Done)),
                    Status::Errored(reason) => Err(Err(reason.clone())),
                    Status::Readable => match state.reader.as_mut() {
                        // Lock revoked between the released check and here.
                        None => Err(Err(StreamError::Lock(LOCK_RELEASED))),
                        Some(slot) => {
                            let request = ReadRequest::new();
                            slot.requests.push_back(Arc::clone(&request));
                            state.request_pull();
                            Ok(request)
                        }
                    },
                }
            }
        };

        drive(&self.shared, None);
        match registered {
            Err(result) => Read::immediate(result),
            Ok(request) => Read {
                inner: ReadInner::Waiting {
                    shared: Arc::clone(&self.shared),
                    request,
                },
            },
        }
    }

    /// A future that settles when the stream closes (`Ok`), errors, or
    /// this lock is released (`ErrorKind::Lock`).
    ///
    /// Futures taken before a `release_lock()` keep observing the
    /// stream; futures taken afterwards observe the revocation.
    #[must_use]
    pub fn closed(&self) -> Closed {
        Closed::new(Arc::clone(&self.closed_cell.lock()))
    }

    /// Releases the exclusive lock. Idempotent.
    ///
    /// Pending reads reject with [`ErrorKind::Lock`](crate::ErrorKind::Lock);
    /// so does the current `closed()` cell if the stream has not settled.
    /// The stream itself is unaffected and can be locked again.
    pub fn release_lock(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.shared.lock();
            if let Some(mut slot) = state.reader.take() {
                for request in slot.requests.drain(..) {
                    request.reject(StreamError::Lock(LOCK_RELEASED));
                }
                slot.closed.reject(StreamError::Lock(LOCK_RELEASED));
            }
        }
        *self.closed_cell.lock() = Settlement::rejected(StreamError::Lock(LOCK_RELEASED));
        #[cfg(feature = "tracing-integration")]
        tracing::debug!("reader lock released");
    }

    /// Cancels the stream: buffered chunks are discarded, the stream
    /// closes, and the source's teardown hook runs with its outcome
    /// swallowed.
    ///
    /// Every call returns a new future, and every one fulfills — even
    /// repeated calls, even on an errored stream, even after release
    /// (in which case the stream is not touched).
    pub fn cancel(&self, reason: Option<String>) -> Cancel {
        if self.released.load(Ordering::SeqCst) {
            return Cancel { remaining: None };
        }
        Cancel {
            remaining: cancel_stream(&self.shared, reason),
        }
    }
}

impl<C: Send + 'static> Drop for Reader<C> {
    fn drop(&mut self) {
        self.release_lock();
    }
}

/// Future returned by [`Reader::read`].
#[must_use = "futures do nothing unless polled"]
pub struct Read<C: Send + 'static> {
    inner: ReadInner<C>,
}

enum ReadInner<C: Send + 'static> {
    Immediate(Option<Result<ReadOutcome<C>, StreamError>>),
    Waiting {
        shared: Shared<C>,
        request: Arc<ReadRequest<C>>,
    },
}

impl<C: Send + 'static> Read<C> {
    fn immediate(result: Result<ReadOutcome<C>, StreamError>) -> Self {
        Self {
            inner: ReadInner::Immediate(Some(result)),
        }
    }
}

// An immediate result holds the chunk by value, but nothing in here is
// self-referential, so the future moves freely even when `C` does not.
impl<C: Send + 'static> Unpin for Read<C> {}

impl<C: Send + 'static> Future for Read<C> {
    type Output = Result<ReadOutcome<C>, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            ReadInner::Immediate(slot) => match slot.take() {
                Some(result) => Poll::Ready(result),
                None => panic!("Read polled after completion"),
            },
            ReadInner::Waiting { shared, request } => {
                // Give stored source futures a chance to make progress
                // with a real waker before parking on the request.
                drive(shared, Some(cx.waker()));
                request.poll(cx)
            }
        }
    }
}

impl<C: Send + 'static> std::fmt::Debug for Read<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Read").finish_non_exhaustive()
    }
}

/// Future returned by [`Reader::cancel`] and
/// [`ReadableStream::cancel`](crate::ReadableStream::cancel).
///
/// Always resolves to `()`. If part of the source's teardown is still
/// pending, this future drives it and discards its outcome.
#[must_use = "futures do nothing unless polled"]
pub struct Cancel {
    pub(crate) remaining: Option<SourceFuture>,
}

impl Future for Cancel {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.remaining {
            None => Poll::Ready(()),
            Some(fut) => match fut.as_mut().poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(_) => {
                    this.remaining = None;
                    Poll::Ready(())
                }
            },
        }
    }
}

impl std::fmt::Debug for Cancel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancel")
            .field("pending_teardown", &self.remaining.is_some())
            .finish()
    }
}
