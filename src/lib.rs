//! Sluice: a backpressure-aware stream protocol with exclusive locking.
//!
//! # Overview
//!
//! Sluice implements the queuing, locking, and state-transition protocol
//! shared by a readable stream, its exclusive reader, and the controller
//! that feeds it. A producer pushes discrete chunks through a
//! [`ReadableController`]; they are buffered in an internal queue and
//! handed, strictly FIFO, to the single [`Reader`] a consumer checks
//! out. A pluggable [`QueuingStrategy`] turns buffered size into the
//! backpressure signal (`desired_size`) that throttles the producer via
//! the pull loop.
//!
//! # Core Guarantees
//!
//! - **Exclusive reader**: at most one [`Reader`] per stream; acquiring
//!   it is a checked state transition, not implicit aliasing
//! - **FIFO delivery**: the Nth pending read is satisfied by the Nth
//!   chunk; chunks are never reordered or silently dropped
//! - **Terminal states stick**: `Closed` and `Errored` are final; every
//!   buffered chunk is delivered before `Done` is observed, and an
//!   errored stream never yields another chunk
//! - **Coalesced pull**: at most one pull request is in flight per
//!   controller; extras collapse into a single re-issue
//! - **Error identity**: an error reason reaches every pending read and
//!   the closed signal unmodified
//!
//! # Module Structure
//!
//! - [`error`](mod@error): the [`StreamError`]/[`ErrorKind`] taxonomy
//! - [`strategy`]: queuing strategies (count, byte-length)
//! - [`readable`]: readable streams, the reader lock, the controller,
//!   and the push-source adapter ([`readable::push`])
//! - [`writable`]: writable streams draining to an [`UnderlyingSink`]
//! - [`pipe`]: the transform stage and [`ReadableStream::pipe_to`]
//!
//! # Execution model
//!
//! Single-threaded cooperative semantics with no bundled executor:
//! controller calls take effect synchronously under the stream's state
//! mutex, and stored source/sink futures are driven by whichever stream
//! future is polled. Everything is `Send`, so streams may also be driven
//! from an executor of the caller's choosing.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod error;
pub mod pipe;
mod queue;
pub mod readable;
mod settlement;
pub mod strategy;
pub mod writable;

pub use error::{ErrorKind, StreamError};
pub use pipe::TransformStream;
pub use readable::{
    Cancel, IterSource, Read, ReadOutcome, ReadableController, ReadableStream, Reader,
    SourceFuture, UnderlyingSource,
};
pub use settlement::Closed;
pub use strategy::{ByteLengthQueuingStrategy, CountQueuingStrategy, QueuingStrategy};
pub use writable::{SinkFuture, UnderlyingSink, WritableController, WritableStream, Write, Writer};
