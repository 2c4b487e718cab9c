//! Consumer-side streams: accept chunks and drain them to an
//! [`UnderlyingSink`].
//!
//! A [`WritableStream`] mirrors the readable side: a strategy-sized
//! internal queue, an exclusive [`Writer`] lock with the same
//! closed-signal generation rules, and a drain loop that keeps at most
//! one sink operation in flight. `desired_size` is the producer-facing
//! backpressure signal: write slower once it goes non-positive.

pub mod sink;
mod state;

pub use sink::{sink_ready_ok, SinkFuture, UnderlyingSink};

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::settlement::{Closed, Settlement};
use crate::strategy::{valid_size, CountQueuingStrategy, QueuingStrategy};
use state::{drive_writable, PendingWrite, WShared, WStatus, WritableState, WriterSlot};

const WRITER_RELEASED: &str = "writer lock was released";

/// A buffered stream draining to a sink, with at most one active writer.
pub struct WritableStream<C: Send + 'static> {
    shared: WShared<C>,
}

impl<C: Send + 'static> std::fmt::Debug for WritableStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritableStream")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> WritableStream<C> {
    /// Creates a stream over `sink` with a count strategy and a
    /// high-water mark of one chunk.
    pub fn new(sink: impl UnderlyingSink<C> + 'static) -> Self {
        Self::with_strategy(sink, CountQueuingStrategy::default())
    }

    /// Creates a stream with an explicit queuing strategy.
    pub fn with_strategy(
        sink: impl UnderlyingSink<C> + 'static,
        strategy: impl QueuingStrategy<C> + 'static,
    ) -> Self {
        let state = WritableState::new(Box::new(sink), Box::new(strategy));
        let shared = Arc::new(Mutex::new(state));

        let sink = shared.lock().sink.take();
        if let Some(mut sink) = sink {
            let controller = WritableController::new(Arc::downgrade(&shared));
            let fut = sink.start(controller);
            {
                let mut state = shared.lock();
                state.sink = Some(sink);
                state.starting = Some(fut);
            }
            drive_writable(&shared, None);
        }

        Self { shared }
    }

    /// True while a writer holds the exclusive lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.shared.lock().writer.is_some()
    }

    /// Acquires the exclusive writer. Fails with
    /// [`ErrorKind::Lock`](crate::ErrorKind::Lock) if already locked.
    pub fn get_writer(&self) -> Result<Writer<C>, StreamError> {
        let mut state = self.shared.lock();
        if state.writer.is_some() {
            return Err(StreamError::Lock("stream is already locked to a writer"));
        }
        let closed = match &state.status {
            WStatus::Writable => Settlement::pending(),
            WStatus::Closed => Settlement::fulfilled(),
            WStatus::Errored(reason) => Settlement::rejected(reason.clone()),
        };
        state.writer = Some(WriterSlot {
            closed: Arc::clone(&closed),
        });
        #[cfg(feature = "tracing-integration")]
        tracing::debug!("writer lock acquired");
        Ok(Writer {
            shared: Arc::clone(&self.shared),
            closed_cell: Mutex::new(closed),
            released: AtomicBool::new(false),
        })
    }
}

/// Exclusive writing capability over a [`WritableStream`].
pub struct Writer<C: Send + 'static> {
    shared: WShared<C>,
    closed_cell: Mutex<Arc<Settlement>>,
    released: AtomicBool,
}

impl<C: Send + 'static> std::fmt::Debug for Writer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> Writer<C> {
    /// Queues one chunk for the sink.
    ///
    /// The returned future settles when the sink has accepted the chunk
    /// (or with the stream's error). Writes drain strictly FIFO, one
    /// sink operation at a time.
    pub fn write(&self, chunk: C) -> Write<C> {
        if self.released.load(Ordering::SeqCst) {
            return Write::immediate(Err(StreamError::Lock(WRITER_RELEASED)));
        }
        let completion = {
            let mut state = self.shared.lock();
            match &state.status {
                WStatus::Errored(reason) => return Write::immediate(Err(reason.clone())),
                WStatus::Closed => {
                    return Write::immediate(Err(StreamError::InvalidState("stream is closed")))
                }
                WStatus::Writable => {}
            }
            if state.close_requested {
                return Write::immediate(Err(StreamError::InvalidState(
                    "close already requested",
                )));
            }
            let size = state.strategy.size(&chunk);
            if !valid_size(size) {
                let reason = StreamError::Strategy(size);
                state.error(reason.clone());
                return Write::immediate(Err(reason));
            }
            let completion = Settlement::pending();
            state.queue.push(
                PendingWrite {
                    chunk,
                    completion: Arc::clone(&completion),
                },
                size,
            );
            completion
        };
        drive_writable(&self.shared, None);
        Write {
            inner: WriteInner::Waiting {
                shared: Arc::clone(&self.shared),
                cell: completion,
            },
        }
    }

    /// Closes the stream: queued writes drain, then the sink's `close`
    /// runs. The returned future settles when the sink has closed.
    pub fn close(&self) -> Write<C> {
        if self.released.load(Ordering::SeqCst) {
            return Write::immediate(Err(StreamError::Lock(WRITER_RELEASED)));
        }
        let completion = {
            let mut state = self.shared.lock();
            match &state.status {
                WStatus::Errored(reason) => return Write::immediate(Err(reason.clone())),
                WStatus::Closed => {
                    return Write::immediate(Err(StreamError::InvalidState("stream is closed")))
                }
                WStatus::Writable => {}
            }
            if state.close_requested {
                return Write::immediate(Err(StreamError::InvalidState(
                    "close already requested",
                )));
            }
            state.close_requested = true;
            let completion = Settlement::pending();
            state.close_completion = Some(Arc::clone(&completion));
            completion
        };
        drive_writable(&self.shared, None);
        Write {
            inner: WriteInner::Waiting {
                shared: Arc::clone(&self.shared),
                cell: completion,
            },
        }
    }

    /// Aborts the stream: queued writes are discarded and rejected, the
    /// stream errors, and the sink's fire-and-forget `abort` runs.
    pub fn abort(&self, reason: Option<String>) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let sink = {
            let mut state = self.shared.lock();
            if !matches!(state.status, WStatus::Writable) {
                return;
            }
            let sink = state.sink.take();
            let message = reason
                .clone()
                .unwrap_or_else(|| "writable stream aborted".to_owned());
            state.error(StreamError::sink_msg(message));
            sink
        };
        if let Some(mut sink) = sink {
            sink.abort(reason);
        }
    }

    /// A future that settles when the stream closes, errors, or this
    /// lock is released. Same generation rules as the reader side.
    #[must_use]
    pub fn closed(&self) -> Closed {
        Closed::new(Arc::clone(&self.closed_cell.lock()))
    }

    /// `high_water_mark - total queued size`; `None` when errored,
    /// `Some(0.0)` once closed.
    #[must_use]
    pub fn desired_size(&self) -> Option<f64> {
        let state = self.shared.lock();
        match &state.status {
            WStatus::Errored(_) => None,
            WStatus::Closed => Some(0.0),
            WStatus::Writable => Some(state.desired_size()),
        }
    }

    /// Releases the exclusive lock. Idempotent. Queued writes keep
    /// draining; only this handle and its closed signal are revoked.
    pub fn release_lock(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.shared.lock();
            if let Some(slot) = state.writer.take() {
                slot.closed.reject(StreamError::Lock(WRITER_RELEASED));
            }
        }
        *self.closed_cell.lock() = Settlement::rejected(StreamError::Lock(WRITER_RELEASED));
        #[cfg(feature = "tracing-integration")]
        tracing::debug!("writer lock released");
    }
}

impl<C: Send + 'static> Drop for Writer<C> {
    fn drop(&mut self) {
        self.release_lock();
    }
}

/// Future returned by [`Writer::write`] and [`Writer::close`].
#[must_use = "futures do nothing unless polled"]
pub struct Write<C: Send + 'static> {
    inner: WriteInner<C>,
}

enum WriteInner<C: Send + 'static> {
    Immediate(Option<Result<(), StreamError>>),
    Waiting {
        shared: WShared<C>,
        cell: Arc<Settlement>,
    },
}

impl<C: Send + 'static> Write<C> {
    fn immediate(result: Result<(), StreamError>) -> Self {
        Self {
            inner: WriteInner::Immediate(Some(result)),
        }
    }
}

impl<C: Send + 'static> Future for Write<C> {
    type Output = Result<(), StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            WriteInner::Immediate(slot) => match slot.take() {
                Some(result) => Poll::Ready(result),
                None => panic!("Write polled after completion"),
            },
            WriteInner::Waiting { shared, cell } => {
                // The drain loop has no executor of its own; writer
                // futures are what keep it moving.
                drive_writable(shared, Some(cx.waker()));
                cell.poll_settled(cx)
            }
        }
    }
}

impl<C: Send + 'static> std::fmt::Debug for Write<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Write").finish_non_exhaustive()
    }
}

/// Handle handed to an [`UnderlyingSink`] at `start`.
pub struct WritableController<C: Send + 'static> {
    shared: Weak<Mutex<WritableState<C>>>,
}

impl<C: Send + 'static> Clone for WritableController<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<C: Send + 'static> std::fmt::Debug for WritableController<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritableController").finish_non_exhaustive()
    }
}

impl<C: Send + 'static> WritableController<C> {
    pub(crate) fn new(shared: Weak<Mutex<WritableState<C>>>) -> Self {
        Self { shared }
    }

    /// Errors the stream with `reason`; every pending completion and the
    /// writer's closed signal reject with it. No-op in terminal states.
    pub fn error(&self, reason: StreamError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.lock().error(reason);
        }
    }
}
