//! The exclusive-reader lock protocol.

mod common;

use common::{assert_pending, assert_ready};
use sluice::{ErrorKind, ReadOutcome, ReadableStream};

/// A source that never produces anything, so reads stay pending.
struct Silent;

impl sluice::UnderlyingSource<u32> for Silent {}

#[test]
fn second_reader_is_denied_while_locked() {
    let stream = ReadableStream::new(Silent);
    let _reader = stream.get_reader().unwrap();
    assert!(stream.is_locked());

    let err = stream.get_reader().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
}

#[test]
fn release_makes_the_lock_available_again() {
    let stream = ReadableStream::from_iter([1u32, 2]);

    let reader = stream.get_reader().unwrap();
    reader.release_lock();
    assert!(!stream.is_locked());

    // The stream itself is untouched; a new tenure reads normally.
    let reader = stream.get_reader().unwrap();
    assert_eq!(assert_ready(reader.read()).unwrap(), ReadOutcome::Chunk(1));
}

#[test]
fn release_is_idempotent() {
    let stream = ReadableStream::new(Silent);
    let reader = stream.get_reader().unwrap();

    reader.release_lock();
    reader.release_lock();

    let err = assert_ready(reader.read()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
    assert!(!stream.is_locked());
}

#[test]
fn dropping_the_reader_releases_the_lock() {
    let stream = ReadableStream::new(Silent);
    {
        let _reader = stream.get_reader().unwrap();
        assert!(stream.is_locked());
    }
    assert!(!stream.is_locked());
    assert!(stream.get_reader().is_ok());
}

#[test]
fn pending_reads_reject_when_the_lock_is_released() {
    let stream = ReadableStream::new(Silent);
    let reader = stream.get_reader().unwrap();

    let mut first = reader.read();
    let mut second = reader.read();
    assert_pending(&mut first);
    assert_pending(&mut second);

    reader.release_lock();

    assert_eq!(assert_ready(first).unwrap_err().kind(), ErrorKind::Lock);
    assert_eq!(assert_ready(second).unwrap_err().kind(), ErrorKind::Lock);
}

#[test]
fn closed_signal_rejects_on_release_but_only_for_that_tenure() {
    let stream = ReadableStream::new(Silent);
    let reader = stream.get_reader().unwrap();

    let tenure = reader.closed();
    assert!(tenure.is_pending());
    reader.release_lock();

    assert_eq!(assert_ready(tenure).unwrap_err().kind(), ErrorKind::Lock);

    // A fresh tenure starts with a fresh, pending signal.
    let reader = stream.get_reader().unwrap();
    assert!(reader.closed().is_pending());
}

#[test]
fn stream_level_cancel_is_refused_while_locked() {
    let stream = ReadableStream::new(Silent);
    let reader = stream.get_reader().unwrap();

    let err = stream.cancel(None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);

    reader.release_lock();
    let cancel = stream.cancel(None).unwrap();
    assert_ready(cancel);
}
