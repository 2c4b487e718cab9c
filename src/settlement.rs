//! One-shot settlement cells.
//!
//! A [`Settlement`] is a future-backing cell that settles exactly once:
//! fulfilled with `()` or rejected with a [`StreamError`]. The first
//! settlement wins; later attempts are ignored. Cells back the reader's
//! `closed` signal, writable completions, and similar one-shot promises.
//!
//! Promise-identity semantics from the protocol (a reader's `closed`
//! promise is replaced on lock release) are rendered as cell generations:
//! each lock tenure gets a fresh cell, and releasing the lock installs a
//! new, pre-rejected cell. Old cells keep whatever settlement they had.

use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::StreamError;

#[derive(Debug)]
enum State {
    Pending(SmallVec<[Waker; 2]>),
    Fulfilled,
    Rejected(StreamError),
}

/// A cell that settles exactly once and wakes everyone polling it.
#[derive(Debug)]
pub(crate) struct Settlement {
    state: Mutex<State>,
}

impl Settlement {
    /// New pending cell.
    pub(crate) fn pending() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Pending(SmallVec::new())),
        })
    }

    /// New cell born fulfilled.
    pub(crate) fn fulfilled() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Fulfilled),
        })
    }

    /// New cell born rejected.
    pub(crate) fn rejected(err: StreamError) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Rejected(err)),
        })
    }

    /// Fulfills the cell if still pending.
    pub(crate) fn fulfill(&self) {
        let wakers = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending(wakers) => {
                    let wakers = std::mem::take(wakers);
                    *state = State::Fulfilled;
                    wakers
                }
                _ => return,
            }
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Rejects the cell if still pending.
    pub(crate) fn reject(&self, err: StreamError) {
        let wakers = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending(wakers) => {
                    let wakers = std::mem::take(wakers);
                    *state = State::Rejected(err);
                    wakers
                }
                _ => return,
            }
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// True until the first settlement.
    pub(crate) fn is_pending(&self) -> bool {
        matches!(&*self.state.lock(), State::Pending(_))
    }

    /// Polls the cell, registering the caller's waker while pending.
    pub(crate) fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Pending(wakers) => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            State::Fulfilled => Poll::Ready(Ok(())),
            State::Rejected(err) => Poll::Ready(Err(err.clone())),
        }
    }
}

/// Future over a closed-signal cell.
///
/// Returned by [`Reader::closed`](crate::Reader::closed) and
/// [`Writer::closed`](crate::Writer::closed). Resolves `Ok(())` when the
/// stream closed cleanly, or the stream's error; resolves
/// [`ErrorKind::Lock`](crate::ErrorKind::Lock) if taken after the lock
/// was released.
#[must_use = "futures do nothing unless polled"]
pub struct Closed {
    cell: Arc<Settlement>,
}

impl Closed {
    pub(crate) fn new(cell: Arc<Settlement>) -> Self {
        Self { cell }
    }

    /// True if the underlying signal has not settled yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.cell.is_pending()
    }

    /// True if `other` observes the same settlement cell — i.e. both
    /// futures were taken during the same lock tenure.
    #[must_use]
    pub fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl std::future::Future for Closed {
    type Output = Result<(), StreamError>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        self.cell.poll_settled(cx)
    }
}

impl std::fmt::Debug for Closed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closed")
            .field("pending", &self.cell.is_pending())
            .finish()
    }
}
