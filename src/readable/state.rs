//! The readable-side state record and its transition functions.
//!
//! One [`ReadableState`] per stream, behind a single `parking_lot::Mutex`
//! shared by the stream handle, the controller, and the reader. Every
//! queue or lock mutation happens under that mutex, so the queue is never
//! observed partially updated and no two controller mutations interleave.
//!
//! Source callbacks (`start`/`pull`) return boxed futures that are stored
//! in the state record and driven by [`drive`]. The dispatcher takes an
//! in-flight future *out* of the record and polls it with the mutex
//! released, so a source future may re-enter the controller (enqueue,
//! close, error) without deadlocking.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::queue::ChunkQueue;
use crate::readable::controller::ReadableController;
use crate::readable::source::{SourceFuture, UnderlyingSource};
use crate::readable::ReadOutcome;
use crate::settlement::Settlement;
use crate::strategy::QueuingStrategy;

/// Shared handle to a stream's state record.
pub(crate) type Shared<C> = Arc<Mutex<ReadableState<C>>>;

/// Stream lifecycle. Both `Closed` and `Errored` are terminal.
#[derive(Debug)]
pub(crate) enum Status {
    Readable,
    Closed,
    Errored(StreamError),
}

/// Per-lock-tenure reader bookkeeping. Present iff the stream is locked.
pub(crate) struct ReaderSlot<C> {
    /// Pending read requests, satisfied strictly FIFO.
    pub(crate) requests: VecDeque<Arc<ReadRequest<C>>>,
    /// Settlement cell behind the reader's `closed()` future for this
    /// lock tenure.
    pub(crate) closed: Arc<Settlement>,
}

pub(crate) struct ReadableState<C> {
    pub(crate) status: Status,
    pub(crate) queue: ChunkQueue<C>,
    pub(crate) strategy: Box<dyn QueuingStrategy<C>>,
    pub(crate) source: Option<Box<dyn UnderlyingSource<C>>>,
    /// Source `start` has completed; `pull` is withheld until then.
    pub(crate) started: bool,
    /// In-flight `start` future, if still running.
    pub(crate) starting: Option<SourceFuture>,
    /// A `pull` future is in flight. Guards against double dispatch.
    pub(crate) pulling: bool,
    /// A pull was requested while one was in flight; re-issue exactly
    /// one more on completion.
    pub(crate) pull_again: bool,
    /// A pull should be dispatched at the next [`drive`].
    pub(crate) pull_needed: bool,
    /// In-flight `pull` future.
    pub(crate) pull_in_flight: Option<SourceFuture>,
    /// `close()` was accepted; the stream finalizes once the queue drains.
    pub(crate) close_requested: bool,
    pub(crate) reader: Option<ReaderSlot<C>>,
}

impl<C: Send + 'static> ReadableState<C> {
    pub(crate) fn new(
        source: Box<dyn UnderlyingSource<C>>,
        strategy: Box<dyn QueuingStrategy<C>>,
    ) -> Self {
        Self {
            status: Status::Readable,
            queue: ChunkQueue::new(),
            strategy,
            source: Some(source),
            started: false,
            starting: None,
            pulling: false,
            pull_again: false,
            pull_needed: false,
            pull_in_flight: None,
            close_requested: false,
            reader: None,
        }
    }

    pub(crate) fn desired_size(&self) -> f64 {
        self.strategy.high_water_mark() - self.queue.total_size()
    }

    fn has_pending_requests(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.requests.is_empty())
    }

    /// Whether the source should be asked for more data right now.
    fn should_pull(&self) -> bool {
        if !matches!(self.status, Status::Readable) || self.close_requested || !self.started {
            return false;
        }
        self.has_pending_requests() || self.desired_size() > 0.0
    }

    /// Records that a pull is wanted. Coalesces while one is in flight:
    /// at most one extra pull is remembered, never a backlog.
    pub(crate) fn request_pull(&mut self) {
        if !self.should_pull() {
            return;
        }
        if self.pulling {
            self.pull_again = true;
            #[cfg(feature = "tracing-integration")]
            tracing::trace!("pull coalesced while one is in flight");
        } else {
            self.pull_needed = true;
        }
    }

    /// Transitions to `Closed` and settles everything that must observe
    /// it: pending reads resolve done, the closed cell fulfills.
    pub(crate) fn finalize_close(&mut self) {
        self.status = Status::Closed;
        self.starting = None;
        self.pull_in_flight = None;
        self.pulling = false;
        self.pull_again = false;
        self.pull_needed = false;
        if let Some(reader) = &mut self.reader {
            for request in reader.requests.drain(..) {
                request.resolve_done();
            }
            reader.closed.fulfill();
        }
        #[cfg(feature = "tracing-integration")]
        tracing::debug!("stream closed");
    }

    /// Transitions to `Errored`, discarding buffered chunks and rejecting
    /// every pending read and the closed cell with the same reason.
    /// No-op in terminal states.
    pub(crate) fn error(&mut self, reason: StreamError) {
        if !matches!(self.status, Status::Readable) {
            return;
        }
        self.queue.clear();
        self.starting = None;
        self.pull_in_flight = None;
        self.pulling = false;
        self.pull_again = false;
        self.pull_needed = false;
        if let Some(reader) = &mut self.reader {
            for request in reader.requests.drain(..) {
                request.reject(reason.clone());
            }
            reader.closed.reject(reason.clone());
        }
        #[cfg(feature = "tracing-integration")]
        tracing::debug!(%reason, "stream errored");
        self.status = Status::Errored(reason);
    }
}

/// A single pending `read()` call, settled by `enqueue`, `close`,
/// `error`, or lock release.
pub(crate) struct ReadRequest<C> {
    state: Mutex<RequestState<C>>,
}

enum RequestState<C> {
    Waiting(Option<Waker>),
    Chunk(Option<C>),
    Done,
    Failed(StreamError),
}

impl<C> ReadRequest<C> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RequestState::Waiting(None)),
        })
    }

    pub(crate) fn resolve_chunk(&self, chunk: C) {
        let waker = {
            let mut state = self.state.lock();
            match &mut *state {
                RequestState::Waiting(waker) => {
                    let waker = waker.take();
                    *state = RequestState::Chunk(Some(chunk));
                    waker
                }
                _ => return,
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn resolve_done(&self) {
        let waker = {
            let mut state = self.state.lock();
            match &mut *state {
                RequestState::Waiting(waker) => {
                    let waker = waker.take();
                    *state = RequestState::Done;
                    waker
                }
                _ => return,
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn reject(&self, reason: StreamError) {
        let waker = {
            let mut state = self.state.lock();
            match &mut *state {
                RequestState::Waiting(waker) => {
                    let waker = waker.take();
                    *state = RequestState::Failed(reason);
                    waker
                }
                _ => return,
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn poll(&self, cx: &mut Context<'_>) -> Poll<Result<ReadOutcome<C>, StreamError>> {
        let mut state = self.state.lock();
        match &mut *state {
            RequestState::Waiting(waker) => {
                *waker = Some(cx.waker().clone());
                Poll::Pending
            }
            RequestState::Chunk(chunk) => match chunk.take() {
                Some(chunk) => Poll::Ready(Ok(ReadOutcome::Chunk(chunk))),
                // Already consumed; a completed read is terminal.
                None => Poll::Ready(Ok(ReadOutcome::Done)),
            },
            RequestState::Done => Poll::Ready(Ok(ReadOutcome::Done)),
            RequestState::Failed(reason) => Poll::Ready(Err(reason.clone())),
        }
    }
}

/// One unit of dispatcher work, extracted under the lock and executed
/// with the lock released.
enum Job<C> {
    Start(SourceFuture),
    Pull(SourceFuture),
    DispatchPull(Box<dyn UnderlyingSource<C>>),
}

/// Drives in-flight source work: polls a pending `start`, dispatches and
/// polls `pull` futures, and re-issues a coalesced pull on completion.
///
/// Safe to call re-entrantly (a source future that calls back into the
/// controller will trigger a nested `drive`); the `pulling`/`starting`
/// slots guarantee the nested call finds nothing to do.
pub(crate) fn drive<C: Send + 'static>(shared: &Shared<C>, waker: Option<&Waker>) {
    loop {
        let job = {
            let mut state = shared.lock();
            if let Some(fut) = state.starting.take() {
                Some(Job::Start(fut))
            } else if let Some(fut) = state.pull_in_flight.take() {
                Some(Job::Pull(fut))
            } else if state.started && !state.pulling && state.pull_needed && state.should_pull()
            {
                state.pull_needed = false;
                match state.source.take() {
                    Some(source) => {
                        state.pulling = true;
                        Some(Job::DispatchPull(source))
                    }
                    None => None,
                }
            } else {
                if !state.should_pull() {
                    state.pull_needed = false;
                }
                None
            }
        };

        let Some(job) = job else { break };
        let noop = Waker::noop();
        let poll_waker = waker.unwrap_or(noop);
        let mut cx = Context::from_waker(poll_waker);

        match job {
            Job::Start(mut fut) => match fut.as_mut().poll(&mut cx) {
                Poll::Pending => {
                    shared.lock().starting = Some(fut);
                    break;
                }
                Poll::Ready(Ok(())) => {
                    let mut state = shared.lock();
                    state.started = true;
                    state.request_pull();
                }
                Poll::Ready(Err(reason)) => {
                    shared.lock().error(reason);
                    break;
                }
            },
            Job::Pull(mut fut) => match fut.as_mut().poll(&mut cx) {
                Poll::Pending => {
                    shared.lock().pull_in_flight = Some(fut);
                    break;
                }
                Poll::Ready(Ok(())) => {
                    let mut state = shared.lock();
                    state.pulling = false;
                    if state.pull_again {
                        state.pull_again = false;
                        state.pull_needed = true;
                    }
                }
                Poll::Ready(Err(reason)) => {
                    let mut state = shared.lock();
                    state.pulling = false;
                    state.error(reason);
                    break;
                }
            },
            Job::DispatchPull(mut source) => {
                #[cfg(feature = "tracing-integration")]
                tracing::trace!("dispatching pull to underlying source");
                let controller = ReadableController::new(Arc::downgrade(shared));
                let fut = source.pull(controller);
                let mut state = shared.lock();
                state.source = Some(source);
                state.pull_in_flight = Some(fut);
            }
        }
    }
}

/// Cancel path shared by the stream- and reader-level `cancel`.
///
/// Discards buffered chunks, finalizes the stream to `Closed`, and runs
/// the synchronous part of the source's `cancel` callback immediately.
/// Returns the still-pending remainder of that callback, if any; its
/// outcome is discarded by the caller-facing future.
pub(crate) fn cancel_stream<C: Send + 'static>(
    shared: &Shared<C>,
    reason: Option<String>,
) -> Option<SourceFuture> {
    let source = {
        let mut state = shared.lock();
        if !matches!(state.status, Status::Readable) {
            return None;
        }
        #[cfg(feature = "tracing-integration")]
        tracing::debug!(reason = reason.as_deref(), "stream cancelled");
        state.queue.clear();
        state.finalize_close();
        state.source.take()
    };

    let mut source = source?;
    let mut fut = source.cancel(reason);
    let mut cx = Context::from_waker(Waker::noop());
    match fut.as_mut().poll(&mut cx) {
        // Cancellation outcomes are swallowed either way.
        Poll::Ready(_) => None,
        Poll::Pending => Some(fut),
    }
}
