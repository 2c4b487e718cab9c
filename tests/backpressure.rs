//! The pull loop: desired size, the high-water mark, and coalescing.

mod common;

use common::{assert_pending, assert_ready, poll_once};
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Poll, Waker};

use sluice::readable::{ready_ok, SourceFuture};
use sluice::{
    ByteLengthQueuingStrategy, CountQueuingStrategy, ReadOutcome, ReadableController,
    ReadableStream, UnderlyingSource,
};

type ControllerCell<C> = Arc<Mutex<Option<ReadableController<C>>>>;

/// Counts pulls and hands its controller out to the test body.
struct CountingSource {
    pulls: Arc<AtomicUsize>,
    controller: ControllerCell<u32>,
}

impl UnderlyingSource<u32> for CountingSource {
    fn start(&mut self, controller: ReadableController<u32>) -> SourceFuture {
        *self.controller.lock().unwrap() = Some(controller);
        ready_ok()
    }

    fn pull(&mut self, _controller: ReadableController<u32>) -> SourceFuture {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        ready_ok()
    }
}

fn counting_stream(
    high_water_mark: f64,
) -> (ReadableStream<u32>, Arc<AtomicUsize>, ControllerCell<u32>) {
    let pulls = Arc::new(AtomicUsize::new(0));
    let controller = ControllerCell::default();
    let stream = ReadableStream::with_strategy(
        CountingSource {
            pulls: Arc::clone(&pulls),
            controller: Arc::clone(&controller),
        },
        CountQueuingStrategy::new(high_water_mark),
    );
    (stream, pulls, controller)
}

/// A one-shot latch a stored future can park on.
#[derive(Default)]
struct Latch {
    open: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl Latch {
    fn release(&self) {
        self.open.store(true, Ordering::SeqCst);
        if let Some(waker) = self.waker.lock().unwrap().take() {
            waker.wake();
        }
    }

    fn wait(self: &Arc<Self>) -> SourceFuture {
        let latch = Arc::clone(self);
        Box::pin(poll_fn(move |cx| {
            if latch.open.load(Ordering::SeqCst) {
                Poll::Ready(Ok(()))
            } else {
                *latch.waker.lock().unwrap() = Some(cx.waker().clone());
                Poll::Pending
            }
        }))
    }
}

#[test]
fn construction_pulls_once_up_to_the_high_water_mark() {
    let (_stream, pulls, _controller) = counting_stream(1.0);
    // One pull at start; it produced nothing, so no re-issue until a
    // read or an enqueue changes the picture.
    assert_eq!(pulls.load(Ordering::SeqCst), 1);
}

#[test]
fn reads_and_enqueues_drive_further_pulls() {
    let (stream, pulls, controller) = counting_stream(1.0);
    let reader = stream.get_reader().unwrap();
    let controller = controller.lock().unwrap().clone().unwrap();

    let mut read = reader.read();
    assert_pending(&mut read);
    assert_eq!(pulls.load(Ordering::SeqCst), 2);

    // The chunk bypasses the queue into the waiting read, leaving the
    // queue below the mark, so the enqueue re-requests a pull.
    controller.enqueue(7).unwrap();
    assert_eq!(assert_ready(read).unwrap(), ReadOutcome::Chunk(7));
    assert_eq!(pulls.load(Ordering::SeqCst), 3);
}

#[test]
fn pulls_stop_at_the_high_water_mark() {
    let (_stream, pulls, controller) = counting_stream(2.0);
    let controller = controller.lock().unwrap().clone().unwrap();
    let after_start = pulls.load(Ordering::SeqCst);

    controller.enqueue(1).unwrap();
    assert_eq!(controller.desired_size(), Some(1.0));
    assert_eq!(pulls.load(Ordering::SeqCst), after_start + 1);

    controller.enqueue(2).unwrap();
    assert_eq!(controller.desired_size(), Some(0.0));
    // At the mark, with no reads waiting: no further pull.
    assert_eq!(pulls.load(Ordering::SeqCst), after_start + 1);
}

#[test]
fn desired_size_follows_byte_lengths() {
    struct ByteSource {
        controller: ControllerCell<&'static [u8]>,
    }

    impl UnderlyingSource<&'static [u8]> for ByteSource {
        fn start(&mut self, controller: ReadableController<&'static [u8]>) -> SourceFuture {
            *self.controller.lock().unwrap() = Some(controller);
            ready_ok()
        }
    }

    let cell = ControllerCell::default();
    let stream = ReadableStream::with_strategy(
        ByteSource {
            controller: Arc::clone(&cell),
        },
        ByteLengthQueuingStrategy::new(10.0),
    );
    let controller = cell.lock().unwrap().clone().unwrap();

    controller.enqueue(b"abc").unwrap();
    assert_eq!(controller.desired_size(), Some(7.0));
    controller.enqueue(b"defg").unwrap();
    assert_eq!(controller.desired_size(), Some(3.0));

    let reader = stream.get_reader().unwrap();
    assert_eq!(
        assert_ready(reader.read()).unwrap(),
        ReadOutcome::Chunk(b"abc".as_slice())
    );
    assert_eq!(controller.desired_size(), Some(6.0));
}

#[test]
fn overlapping_demand_coalesces_into_one_extra_pull() {
    struct SlowSource {
        pulls: Arc<AtomicUsize>,
        latch: Arc<Latch>,
    }

    impl UnderlyingSource<u32> for SlowSource {
        fn pull(&mut self, _controller: ReadableController<u32>) -> SourceFuture {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            self.latch.wait()
        }
    }

    let pulls = Arc::new(AtomicUsize::new(0));
    let latch = Arc::new(Latch::default());
    let stream = ReadableStream::new(SlowSource {
        pulls: Arc::clone(&pulls),
        latch: Arc::clone(&latch),
    });
    let reader = stream.get_reader().unwrap();

    // The construction-time pull is parked on the latch.
    assert_eq!(pulls.load(Ordering::SeqCst), 1);

    let mut first = reader.read();
    let mut second = reader.read();
    assert_pending(&mut first);
    assert_pending(&mut second);
    assert_eq!(pulls.load(Ordering::SeqCst), 1);

    latch.release();
    assert_pending(&mut first);

    // Two reads arrived while one pull was in flight; they collapse
    // into exactly one re-issue, not a backlog.
    assert_eq!(pulls.load(Ordering::SeqCst), 2);
}

#[test]
fn no_pull_until_start_has_completed() {
    struct SlowStart {
        pulls: Arc<AtomicUsize>,
        latch: Arc<Latch>,
    }

    impl UnderlyingSource<u32> for SlowStart {
        fn start(&mut self, _controller: ReadableController<u32>) -> SourceFuture {
            self.latch.wait()
        }

        fn pull(&mut self, _controller: ReadableController<u32>) -> SourceFuture {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            ready_ok()
        }
    }

    let pulls = Arc::new(AtomicUsize::new(0));
    let latch = Arc::new(Latch::default());
    let stream = ReadableStream::new(SlowStart {
        pulls: Arc::clone(&pulls),
        latch: Arc::clone(&latch),
    });
    let reader = stream.get_reader().unwrap();

    let mut read = reader.read();
    assert_pending(&mut read);
    assert_eq!(pulls.load(Ordering::SeqCst), 0);

    latch.release();
    let _ = poll_once(&mut read);
    assert_eq!(pulls.load(Ordering::SeqCst), 1);
}
