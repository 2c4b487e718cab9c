//! Writable-side state record and drain loop.
//!
//! Mirrors the readable dispatcher: sink futures are taken out of the
//! record and polled with the mutex released, so a sink may call back
//! into its controller. The drain loop keeps at most one sink operation
//! in flight and feeds it queued writes strictly FIFO.

use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::queue::ChunkQueue;
use crate::settlement::Settlement;
use crate::strategy::QueuingStrategy;
use crate::writable::sink::{SinkFuture, UnderlyingSink};

pub(crate) type WShared<C> = Arc<Mutex<WritableState<C>>>;

#[derive(Debug)]
pub(crate) enum WStatus {
    Writable,
    Closed,
    Errored(StreamError),
}

/// A queued chunk plus the cell its `write()` future settles through.
pub(crate) struct PendingWrite<C> {
    pub(crate) chunk: C,
    pub(crate) completion: Arc<Settlement>,
}

/// The single sink operation currently running.
struct InFlight {
    fut: SinkFuture,
    completion: Arc<Settlement>,
    /// This operation is the final `close`, not a write.
    closing: bool,
}

pub(crate) struct WriterSlot {
    pub(crate) closed: Arc<Settlement>,
}

pub(crate) struct WritableState<C> {
    pub(crate) status: WStatus,
    pub(crate) queue: ChunkQueue<PendingWrite<C>>,
    pub(crate) strategy: Box<dyn QueuingStrategy<C>>,
    pub(crate) sink: Option<Box<dyn UnderlyingSink<C>>>,
    pub(crate) started: bool,
    pub(crate) starting: Option<SinkFuture>,
    in_flight: Option<InFlight>,
    pub(crate) close_requested: bool,
    close_dispatched: bool,
    pub(crate) close_completion: Option<Arc<Settlement>>,
    pub(crate) writer: Option<WriterSlot>,
}

impl<C: Send + 'static> WritableState<C> {
    pub(crate) fn new(
        sink: Box<dyn UnderlyingSink<C>>,
        strategy: Box<dyn QueuingStrategy<C>>,
    ) -> Self {
        Self {
            status: WStatus::Writable,
            queue: ChunkQueue::new(),
            strategy,
            sink: Some(sink),
            started: false,
            starting: None,
            in_flight: None,
            close_requested: false,
            close_dispatched: false,
            close_completion: None,
            writer: None,
        }
    }

    pub(crate) fn desired_size(&self) -> f64 {
        self.strategy.high_water_mark() - self.queue.total_size()
    }

    /// Errors the stream: rejects every queued and in-flight completion,
    /// the close completion, and the writer's closed signal, all with
    /// the same reason. No-op in terminal states.
    pub(crate) fn error(&mut self, reason: StreamError) {
        if !matches!(self.status, WStatus::Writable) {
            return;
        }
        while let Some(write) = self.queue.pop() {
            write.completion.reject(reason.clone());
        }
        if let Some(completion) = self.close_completion.take() {
            completion.reject(reason.clone());
        }
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.completion.reject(reason.clone());
        }
        self.starting = None;
        if let Some(writer) = &self.writer {
            writer.closed.reject(reason.clone());
        }
        #[cfg(feature = "tracing-integration")]
        tracing::debug!(%reason, "writable stream errored");
        self.status = WStatus::Errored(reason);
    }

    fn finalize_close(&mut self) {
        self.status = WStatus::Closed;
        self.close_completion = None;
        if let Some(writer) = &self.writer {
            writer.closed.fulfill();
        }
        #[cfg(feature = "tracing-integration")]
        tracing::debug!("writable stream closed");
    }
}

enum Job<C> {
    Start(SinkFuture),
    Op(InFlight),
    DispatchWrite(Box<dyn UnderlyingSink<C>>, PendingWrite<C>),
    DispatchClose(Box<dyn UnderlyingSink<C>>, Arc<Settlement>),
}

/// Drains the write queue through the sink, one operation at a time.
///
/// Called from every writable-side future's poll and after every state
/// mutation. Re-entrant calls find the in-flight slot empty and back off.
pub(crate) fn drive_writable<C: Send + 'static>(shared: &WShared<C>, waker: Option<&Waker>) {
    loop {
        let job = {
            let mut state = shared.lock();
            if let Some(fut) = state.starting.take() {
                Some(Job::Start(fut))
            } else if let Some(in_flight) = state.in_flight.take() {
                Some(Job::Op(in_flight))
            } else if state.started
                && matches!(state.status, WStatus::Writable)
                && state.sink.is_some()
            {
                if state.queue.is_empty() {
                    if state.close_requested && !state.close_dispatched {
                        state.close_dispatched = true;
                        let completion = state
                            .close_completion
                            .clone()
                            .unwrap_or_else(Settlement::pending);
                        state.sink.take().map(|sink| Job::DispatchClose(sink, completion))
                    } else {
                        None
                    }
                } else {
                    match (state.queue.pop(), state.sink.take()) {
                        (Some(write), Some(sink)) => Some(Job::DispatchWrite(sink, write)),
                        _ => None,
                    }
                }
            } else {
                None
            }
        };

        let Some(job) = job else { break };
        let poll_waker = waker.unwrap_or(Waker::noop());
        let mut cx = Context::from_waker(poll_waker);

        match job {
            Job::Start(mut fut) => match fut.as_mut().poll(&mut cx) {
                Poll::Pending => {
                    shared.lock().starting = Some(fut);
                    break;
                }
                Poll::Ready(Ok(())) => {
                    shared.lock().started = true;
                }
                Poll::Ready(Err(reason)) => {
                    shared.lock().error(reason);
                    break;
                }
            },
            Job::Op(mut in_flight) => match in_flight.fut.as_mut().poll(&mut cx) {
                Poll::Pending => {
                    shared.lock().in_flight = Some(in_flight);
                    break;
                }
                Poll::Ready(Ok(())) => {
                    let mut state = shared.lock();
                    in_flight.completion.fulfill();
                    if in_flight.closing {
                        state.finalize_close();
                    }
                }
                Poll::Ready(Err(reason)) => {
                    let mut state = shared.lock();
                    in_flight.completion.reject(reason.clone());
                    state.error(reason);
                    break;
                }
            },
            Job::DispatchWrite(mut sink, write) => {
                let fut = sink.write(write.chunk);
                let mut state = shared.lock();
                state.sink = Some(sink);
                state.in_flight = Some(InFlight {
                    fut,
                    completion: write.completion,
                    closing: false,
                });
            }
            Job::DispatchClose(mut sink, completion) => {
                #[cfg(feature = "tracing-integration")]
                tracing::trace!("dispatching close to underlying sink");
                let fut = sink.close();
                let mut state = shared.lock();
                state.sink = Some(sink);
                state.in_flight = Some(InFlight {
                    fut,
                    completion,
                    closing: true,
                });
            }
        }
    }
}
