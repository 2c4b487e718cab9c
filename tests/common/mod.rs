//! Shared helpers for integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// Polls `fut` once with a no-op waker.
pub fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
    let mut cx = Context::from_waker(Waker::noop());
    Pin::new(fut).poll(&mut cx)
}

/// Asserts that `fut` completes on its first poll and returns the output.
#[track_caller]
pub fn assert_ready<F: Future + Unpin>(mut fut: F) -> F::Output {
    match poll_once(&mut fut) {
        Poll::Ready(output) => output,
        Poll::Pending => panic!("future was expected to be ready"),
    }
}

/// Asserts that `fut` is still pending after one poll.
#[track_caller]
pub fn assert_pending<F: Future + Unpin>(fut: &mut F) {
    assert!(poll_once(fut).is_pending(), "future was expected to be pending");
}
