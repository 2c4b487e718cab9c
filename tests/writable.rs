//! Writable streams: FIFO draining, close, abort, and the writer lock.

mod common;

use common::{assert_pending, assert_ready};
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Poll, Waker};

use futures_lite::future::block_on;
use sluice::writable::sink_ready_ok;
use sluice::{ErrorKind, SinkFuture, StreamError, UnderlyingSink, WritableStream};

#[derive(Default)]
struct SinkLog {
    chunks: Mutex<Vec<u32>>,
    closed: AtomicBool,
    aborted: Mutex<Option<Option<String>>>,
}

struct CollectSink {
    log: Arc<SinkLog>,
}

impl UnderlyingSink<u32> for CollectSink {
    fn write(&mut self, chunk: u32) -> SinkFuture {
        self.log.chunks.lock().unwrap().push(chunk);
        sink_ready_ok()
    }

    fn close(&mut self) -> SinkFuture {
        self.log.closed.store(true, Ordering::SeqCst);
        sink_ready_ok()
    }

    fn abort(&mut self, reason: Option<String>) {
        *self.log.aborted.lock().unwrap() = Some(reason);
    }
}

fn collect_stream() -> (WritableStream<u32>, Arc<SinkLog>) {
    let log = Arc::new(SinkLog::default());
    let stream = WritableStream::new(CollectSink {
        log: Arc::clone(&log),
    });
    (stream, log)
}

/// A sink whose write futures park on a shared latch.
struct GatedSink {
    log: Arc<SinkLog>,
    open: Arc<AtomicBool>,
    waker: Arc<Mutex<Option<Waker>>>,
}

impl UnderlyingSink<u32> for GatedSink {
    fn write(&mut self, chunk: u32) -> SinkFuture {
        let log = Arc::clone(&self.log);
        let open = Arc::clone(&self.open);
        let waker = Arc::clone(&self.waker);
        Box::pin(poll_fn(move |cx| {
            if open.load(Ordering::SeqCst) {
                log.chunks.lock().unwrap().push(chunk);
                Poll::Ready(Ok(()))
            } else {
                *waker.lock().unwrap() = Some(cx.waker().clone());
                Poll::Pending
            }
        }))
    }

    fn close(&mut self) -> SinkFuture {
        self.log.closed.store(true, Ordering::SeqCst);
        sink_ready_ok()
    }

    fn abort(&mut self, reason: Option<String>) {
        *self.log.aborted.lock().unwrap() = Some(reason);
    }
}

fn gated_stream() -> (WritableStream<u32>, Arc<SinkLog>, Arc<AtomicBool>) {
    let log = Arc::new(SinkLog::default());
    let open = Arc::new(AtomicBool::new(false));
    let stream = WritableStream::new(GatedSink {
        log: Arc::clone(&log),
        open: Arc::clone(&open),
        waker: Arc::new(Mutex::new(None)),
    });
    (stream, log, open)
}

#[test]
fn writes_drain_in_order_and_close_flushes() {
    let (stream, log) = collect_stream();
    let writer = stream.get_writer().unwrap();

    block_on(async {
        writer.write(1).await.unwrap();
        writer.write(2).await.unwrap();
        writer.close().await.unwrap();
    });

    assert_eq!(*log.chunks.lock().unwrap(), vec![1, 2]);
    assert!(log.closed.load(Ordering::SeqCst));
    assert_ready(writer.closed()).unwrap();
}

#[test]
fn operations_are_refused_once_closed() {
    let (stream, _log) = collect_stream();
    let writer = stream.get_writer().unwrap();

    assert_ready(writer.close()).unwrap();
    assert_eq!(
        assert_ready(writer.write(1)).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(
        assert_ready(writer.close()).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(writer.desired_size(), Some(0.0));
}

#[test]
fn a_slow_sink_backs_writes_up_in_order() {
    let (stream, log, open) = gated_stream();
    let writer = stream.get_writer().unwrap();

    let mut first = writer.write(1);
    let mut second = writer.write(2);
    assert_pending(&mut first);
    assert_pending(&mut second);
    // One chunk in flight, one queued against a high-water mark of one.
    assert_eq!(writer.desired_size(), Some(0.0));

    open.store(true, Ordering::SeqCst);
    assert_ready(first).unwrap();
    assert_ready(second).unwrap();
    assert_eq!(*log.chunks.lock().unwrap(), vec![1, 2]);
}

#[test]
fn close_waits_for_queued_writes() {
    let (stream, log, open) = gated_stream();
    let writer = stream.get_writer().unwrap();

    let mut write = writer.write(5);
    let mut close = writer.close();
    assert_pending(&mut write);
    assert_pending(&mut close);
    assert!(!log.closed.load(Ordering::SeqCst));

    open.store(true, Ordering::SeqCst);
    assert_ready(write).unwrap();
    assert_ready(close).unwrap();
    assert!(log.closed.load(Ordering::SeqCst));
}

#[test]
fn sink_failure_errors_the_stream_with_one_reason() {
    struct FailingSink;

    impl UnderlyingSink<u32> for FailingSink {
        fn write(&mut self, _chunk: u32) -> SinkFuture {
            Box::pin(std::future::ready(Err(StreamError::sink_msg("disk full"))))
        }
    }

    let stream = WritableStream::new(FailingSink);
    let writer = stream.get_writer().unwrap();

    let first = assert_ready(writer.write(1)).unwrap_err();
    assert_eq!(first.kind(), ErrorKind::Sink);

    let second = assert_ready(writer.write(2)).unwrap_err();
    assert!(second.same_reason(&first));
    assert!(assert_ready(writer.closed()).unwrap_err().same_reason(&first));
    assert_eq!(writer.desired_size(), None);
}

#[test]
fn abort_rejects_everything_queued_and_reaches_the_sink() {
    let (stream, log, _open) = gated_stream();
    let writer = stream.get_writer().unwrap();

    let mut in_flight = writer.write(1);
    let mut queued = writer.write(2);
    assert_pending(&mut in_flight);
    assert_pending(&mut queued);

    writer.abort(Some("stop".to_owned()));

    assert_eq!(assert_ready(in_flight).unwrap_err().kind(), ErrorKind::Sink);
    assert_eq!(assert_ready(queued).unwrap_err().kind(), ErrorKind::Sink);
    assert_eq!(*log.aborted.lock().unwrap(), Some(Some("stop".to_owned())));
    assert!(log.chunks.lock().unwrap().is_empty());
}

#[test]
fn writer_lock_protocol_mirrors_the_reader() {
    let (stream, _log) = collect_stream();
    let writer = stream.get_writer().unwrap();
    assert!(stream.is_locked());
    assert_eq!(stream.get_writer().unwrap_err().kind(), ErrorKind::Lock);

    let before = writer.closed();
    writer.release_lock();
    let after = writer.closed();
    assert!(!before.same_cell(&after));
    assert_eq!(assert_ready(before).unwrap_err().kind(), ErrorKind::Lock);
    assert_eq!(assert_ready(after).unwrap_err().kind(), ErrorKind::Lock);
    assert_eq!(
        assert_ready(writer.write(1)).unwrap_err().kind(),
        ErrorKind::Lock
    );

    assert!(!stream.is_locked());
    assert!(stream.get_writer().is_ok());
}

#[test]
fn dropping_the_writer_releases_the_lock() {
    let (stream, _log) = collect_stream();
    {
        let _writer = stream.get_writer().unwrap();
        assert!(stream.is_locked());
    }
    assert!(!stream.is_locked());
}
