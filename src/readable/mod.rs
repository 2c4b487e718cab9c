//! Producer-side streams: buffered chunks, one exclusive reader, and a
//! pull-driven backpressure loop.
//!
//! A [`ReadableStream`] owns a controller-managed internal queue fed by
//! an [`UnderlyingSource`]. Consumers acquire the single [`Reader`] via
//! [`ReadableStream::get_reader`]; while it is held the stream is
//! locked. Reads drain the queue FIFO, and whenever the buffered total
//! drops below the strategy's high-water mark the source is asked to
//! `pull` — with at most one pull in flight, extras coalesced.
//!
//! ```ignore
//! use sluice::{ReadableStream, ReadOutcome};
//!
//! let stream = ReadableStream::from_iter(["a", "b"]);
//! let reader = stream.get_reader()?;
//! assert!(matches!(reader.read().await?, ReadOutcome::Chunk("a")));
//! ```

mod controller;
pub mod push;
mod reader;
mod source;
mod state;

pub use controller::ReadableController;
pub use reader::{Cancel, Read, Reader};
pub use source::{ready_err, ready_ok, IterSource, SourceFuture, UnderlyingSource};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::strategy::{CountQueuingStrategy, QueuingStrategy};
use state::{cancel_stream, drive, ReadableState, ReaderSlot, Shared, Status};

use crate::settlement::Settlement;

/// Result of one read: a chunk, or the end of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome<C> {
    /// One chunk of data; more may follow.
    Chunk(C),
    /// The stream is closed and fully drained; every further read also
    /// resolves `Done`.
    Done,
}

impl<C> ReadOutcome<C> {
    /// The chunk, if any.
    pub fn into_chunk(self) -> Option<C> {
        match self {
            Self::Chunk(chunk) => Some(chunk),
            Self::Done => None,
        }
    }

    /// True for [`ReadOutcome::Done`].
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// A buffered, backpressure-aware stream of chunks with at most one
/// active reader.
pub struct ReadableStream<C: Send + 'static> {
    shared: Shared<C>,
}

impl<C: Send + 'static> std::fmt::Debug for ReadableStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadableStream")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> ReadableStream<C> {
    /// Creates a stream over `source` with a count strategy and a
    /// high-water mark of one chunk.
    pub fn new(source: impl UnderlyingSource<C> + 'static) -> Self {
        Self::with_strategy(source, CountQueuingStrategy::default())
    }

    /// Creates a stream with an explicit queuing strategy. The strategy
    /// is fixed for the stream's lifetime.
    ///
    /// The source's `start` runs before this returns; if it completes
    /// synchronously the first `pull` is dispatched as well (until the
    /// high-water mark is reached). A `start` failure leaves the stream
    /// errored with that reason.
    pub fn with_strategy(
        source: impl UnderlyingSource<C> + 'static,
        strategy: impl QueuingStrategy<C> + 'static,
    ) -> Self {
        let state = ReadableState::new(Box::new(source), Box::new(strategy));
        let shared = Arc::new(Mutex::new(state));

        // Invoke start with the lock free: it may call straight back
        // into the controller.
        let source = shared.lock().source.take();
        if let Some(mut source) = source {
            let controller = ReadableController::new(Arc::downgrade(&shared));
            let fut = source.start(controller);
            {
                let mut state = shared.lock();
                state.source = Some(source);
                state.starting = Some(fut);
            }
            drive(&shared, None);
        }

        Self { shared }
    }

    /// Stream over an iterator: one chunk per pull, closed at the end.
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = C>,
        I::IntoIter: Send + 'static,
    {
        Self::new(IterSource::new(iter))
    }

    /// True while a reader holds the exclusive lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.shared.lock().reader.is_some()
    }

    /// Acquires the exclusive reader.
    ///
    /// Fails with [`ErrorKind::Lock`](crate::ErrorKind::Lock) if a
    /// reader already holds the lock. Succeeds on closed or errored
    /// streams; the reader then observes the terminal state.
    pub fn get_reader(&self) -> Result<Reader<C>, StreamError> {
        let mut state = self.shared.lock();
        if state.reader.is_some() {
            return Err(StreamError::Lock("stream is already locked to a reader"));
        }
        let closed = match &state.status {
            Status::Readable => Settlement::pending(),
            Status::Closed => Settlement::fulfilled(),
            Status::Errored(reason) => Settlement::rejected(reason.clone()),
        };
        state.reader = Some(ReaderSlot {
            requests: std::collections::VecDeque::new(),
            closed: Arc::clone(&closed),
        });
        #[cfg(feature = "tracing-integration")]
        tracing::debug!("reader lock acquired");
        Ok(Reader::new(Arc::clone(&self.shared), closed))
    }

    /// Cancels the stream without a reader.
    ///
    /// Fails with [`ErrorKind::Lock`](crate::ErrorKind::Lock) while the
    /// stream is locked — cancellation then belongs to the reader. The
    /// returned future always resolves `()`; source teardown failures
    /// are swallowed.
    pub fn cancel(&self, reason: Option<String>) -> Result<Cancel, StreamError> {
        if self.is_locked() {
            return Err(StreamError::Lock("stream is locked to a reader"));
        }
        Ok(Cancel {
            remaining: cancel_stream(&self.shared, reason),
        })
    }

    pub(crate) fn shared(&self) -> &Shared<C> {
        &self.shared
    }
}
