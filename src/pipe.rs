//! Composing streams: the transform stage and `pipe_to`.
//!
//! A [`TransformStream`] is a writable/readable pair joined by a
//! user-supplied mapping: chunks written to the writable side come out
//! of the readable side transformed. Backpressure crosses the joint —
//! when the readable side's queue is at its high-water mark, writes
//! stay pending until a reader pulls.
//!
//! [`ReadableStream::pipe_to`] drains a readable stream into a writable
//! one: chunks flow until the source is done (sink closed), the source
//! errors (sink aborted), or the sink errors (source cancelled). There
//! is no executor in this crate; the returned future does the work of
//! both halves as it is polled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::StreamError;
use crate::readable::{
    ready_ok, ReadOutcome, ReadableController, ReadableStream, SourceFuture, UnderlyingSource,
};
use crate::writable::sink::{sink_ready_ok, SinkFuture, UnderlyingSink};
use crate::writable::WritableStream;

impl<C: Send + 'static> ReadableStream<C> {
    /// Drains this stream into `dest`.
    ///
    /// Locks both streams for the duration. On clean end the sink is
    /// closed; a source error aborts the sink, a sink error cancels the
    /// source. Resolves with the first error, or `Ok(())` after the sink
    /// has closed.
    pub async fn pipe_to(&self, dest: &WritableStream<C>) -> Result<(), StreamError> {
        let reader = self.get_reader()?;
        let writer = dest.get_writer()?;
        loop {
            match reader.read().await {
                Ok(ReadOutcome::Chunk(chunk)) => {
                    if let Err(reason) = writer.write(chunk).await {
                        reader.cancel(Some(reason.to_string())).await;
                        return Err(reason);
                    }
                }
                Ok(ReadOutcome::Done) => return writer.close().await,
                Err(reason) => {
                    writer.abort(Some(reason.to_string()));
                    return Err(reason);
                }
            }
        }
    }
}

/// A writable/readable pair joined by a chunk mapping.
pub struct TransformStream<C: Send + 'static, D: Send + 'static> {
    writable: WritableStream<C>,
    readable: ReadableStream<D>,
}

impl<C: Send + 'static, D: Send + 'static> std::fmt::Debug for TransformStream<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformStream").finish_non_exhaustive()
    }
}

impl<C: Send + 'static, D: Send + 'static> TransformStream<C, D> {
    /// Creates a transform stage around `map`.
    ///
    /// A mapping failure errors both sides with the same reason.
    pub fn new<F>(map: F) -> Self
    where
        F: FnMut(C) -> Result<D, StreamError> + Send + 'static,
    {
        let gate = Arc::new(Gate::new());
        let controller_slot: ControllerSlot<D> = Arc::new(Mutex::new(None));

        let readable = ReadableStream::new(TransformSource {
            gate: Arc::clone(&gate),
            controller_slot: Arc::clone(&controller_slot),
        });
        let writable = WritableStream::new(TransformSink {
            map,
            gate,
            controller_slot,
        });

        Self { writable, readable }
    }

    /// The side chunks are written to.
    #[must_use]
    pub fn writable(&self) -> &WritableStream<C> {
        &self.writable
    }

    /// The side transformed chunks are read from.
    #[must_use]
    pub fn readable(&self) -> &ReadableStream<D> {
        &self.readable
    }

    /// Splits the pair.
    #[must_use]
    pub fn into_parts(self) -> (WritableStream<C>, ReadableStream<D>) {
        (self.writable, self.readable)
    }
}

type ControllerSlot<D> = Arc<Mutex<Option<ReadableController<D>>>>;

/// Reopenable gate used to park writes while the readable side is full.
struct Gate {
    state: Mutex<GateState>,
}

struct GateState {
    open: bool,
    wakers: SmallVec<[Waker; 2]>,
}

impl Gate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                open: true,
                wakers: SmallVec::new(),
            }),
        }
    }

    fn open(&self) {
        let wakers = {
            let mut state = self.state.lock();
            state.open = true;
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    fn close(&self) {
        self.state.lock().open = false;
    }

    fn poll_open(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.lock();
        if state.open {
            Poll::Ready(())
        } else {
            if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                state.wakers.push(cx.waker().clone());
            }
            Poll::Pending
        }
    }
}

struct GateOpen {
    gate: Arc<Gate>,
}

impl Future for GateOpen {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.gate.poll_open(cx)
    }
}

/// Readable half of a transform: no data of its own, it just reopens the
/// gate whenever the consumer wants more.
struct TransformSource<D: Send + 'static> {
    gate: Arc<Gate>,
    controller_slot: ControllerSlot<D>,
}

impl<D: Send + 'static> UnderlyingSource<D> for TransformSource<D> {
    fn start(&mut self, controller: ReadableController<D>) -> SourceFuture {
        *self.controller_slot.lock() = Some(controller);
        ready_ok()
    }

    fn pull(&mut self, _controller: ReadableController<D>) -> SourceFuture {
        self.gate.open();
        ready_ok()
    }

    fn cancel(&mut self, _reason: Option<String>) -> SourceFuture {
        // Unpark any write waiting on the gate; it will observe the
        // cancelled readable side on its next enqueue.
        self.controller_slot.lock().take();
        self.gate.open();
        ready_ok()
    }
}

/// Writable half of a transform: maps each chunk into the readable side
/// and waits on the gate when that side is full.
struct TransformSink<D: Send + 'static, F> {
    map: F,
    gate: Arc<Gate>,
    controller_slot: ControllerSlot<D>,
}

impl<C, D, F> UnderlyingSink<C> for TransformSink<D, F>
where
    C: Send + 'static,
    D: Send + 'static,
    F: FnMut(C) -> Result<D, StreamError> + Send + 'static,
{
    fn write(&mut self, chunk: C) -> SinkFuture {
        let mapped = (self.map)(chunk);
        let gate = Arc::clone(&self.gate);
        let slot = Arc::clone(&self.controller_slot);
        Box::pin(async move {
            let out = match mapped {
                Ok(out) => out,
                Err(reason) => {
                    if let Some(controller) = &*slot.lock() {
                        controller.error(reason.clone());
                    }
                    return Err(reason);
                }
            };
            let controller = slot
                .lock()
                .clone()
                .ok_or(StreamError::InvalidState("readable side was cancelled"))?;
            controller.enqueue(out)?;
            if controller.desired_size().is_some_and(|d| d <= 0.0) {
                gate.close();
                GateOpen { gate }.await;
            }
            Ok(())
        })
    }

    fn close(&mut self) -> SinkFuture {
        if let Some(controller) = &*self.controller_slot.lock() {
            // The readable side may already be cancelled; closing is
            // best-effort from this direction.
            let _ = controller.close();
        }
        sink_ready_ok()
    }

    fn abort(&mut self, reason: Option<String>) {
        if let Some(controller) = &*self.controller_slot.lock() {
            let message = reason.unwrap_or_else(|| "transform writable side aborted".to_owned());
            controller.error(StreamError::source_msg(message));
        }
    }
}
