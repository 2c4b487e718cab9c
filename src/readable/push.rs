//! Adapter from a push/pause-style producer to an [`UnderlyingSource`].
//!
//! A push source (a socket wrapper, a device feed, any "data/end/error"
//! event emitter) does not wait to be pulled; it must be throttled. The
//! [`PushAdapter`] imposes the pull discipline:
//!
//! - paused immediately on attachment, resumed only by `pull`;
//! - each delivered chunk becomes exactly one `enqueue`, and the source
//!   is paused again right away — one chunk per resume cycle, which is
//!   what makes `pull` a real backpressure signal;
//! - the first terminal event wins: the delivery handle detaches and
//!   exactly one `close`/`error` reaches the controller, later events
//!   are dropped;
//! - on cancel the subscription is released *before* the underlying
//!   resource is torn down, so teardown cannot race an in-flight event
//!   back into the controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::StreamError;
use crate::readable::controller::ReadableController;
use crate::readable::source::{ready_ok, SourceFuture, UnderlyingSource};

/// One event from a push-based producer.
#[derive(Debug)]
pub enum PushEvent<C> {
    /// A chunk of data.
    Data(C),
    /// Clean end of the feed.
    End,
    /// The feed failed.
    Error(StreamError),
}

/// A throttleable, subscribable push producer.
///
/// Methods take `&self`: a push source is an externally driven object
/// with its own synchronization. Events must be delivered from the
/// source's own context, never from inside `resume()` re-entrantly
/// while the caller still holds source-internal locks.
pub trait PushSource: Send + Sync + 'static {
    /// The chunk type this source produces.
    type Chunk: Send + 'static;

    /// Stop producing events.
    fn pause(&self);

    /// Produce events again; zero or more `Data` deliveries may follow.
    fn resume(&self);

    /// Retain the delivery handle and forward future events through it.
    fn subscribe(&self, delivery: PushDelivery<Self>)
    where
        Self: Sized;

    /// Drop the delivery handle. No event is observed afterwards.
    fn unsubscribe(&self);

    /// Destroy the underlying resource. Called once, after
    /// [`PushSource::unsubscribe`].
    fn teardown(&self);
}

struct PushShared<S: PushSource> {
    source: S,
    controller: ReadableController<S::Chunk>,
    /// Set once a terminal event or cancel has happened; everything
    /// after it is ignored.
    terminated: AtomicBool,
}

impl<S: PushSource> PushShared<S> {
    fn terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::SeqCst)
    }
}

/// Handle a [`PushSource`] uses to feed events into the adapter.
pub struct PushDelivery<S: PushSource> {
    shared: Weak<PushShared<S>>,
}

impl<S: PushSource> Clone for PushDelivery<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<S: PushSource> std::fmt::Debug for PushDelivery<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushDelivery").finish_non_exhaustive()
    }
}

impl<S: PushSource> PushDelivery<S> {
    /// Forwards one event into the stream.
    ///
    /// `Data` enqueues the chunk and immediately pauses the source.
    /// `End`/`Error` detach the subscription and deliver exactly one
    /// `close`/`error`. Everything is a no-op once the adapter has seen
    /// a terminal event or a cancel.
    pub fn deliver(&self, event: PushEvent<S::Chunk>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.terminated.load(Ordering::SeqCst) {
            return;
        }
        match event {
            PushEvent::Data(chunk) => {
                if shared.controller.enqueue(chunk).is_err() {
                    // Stream is already settled; stop listening.
                    if shared.terminate() {
                        shared.source.unsubscribe();
                        shared.source.pause();
                    }
                    return;
                }
                shared.source.pause();
            }
            PushEvent::End => {
                if shared.terminate() {
                    shared.source.unsubscribe();
                    let _ = shared.controller.close();
                }
            }
            PushEvent::Error(reason) => {
                if shared.terminate() {
                    shared.source.unsubscribe();
                    shared.controller.error(reason);
                }
            }
        }
    }
}

/// [`UnderlyingSource`] wrapping a [`PushSource`].
pub struct PushAdapter<S: PushSource> {
    pending: Option<S>,
    shared: Option<Arc<PushShared<S>>>,
}

impl<S: PushSource> PushAdapter<S> {
    /// Wraps `source`; attach it to a stream via
    /// [`ReadableStream::new`](crate::ReadableStream::new).
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            pending: Some(source),
            shared: None,
        }
    }
}

impl<S: PushSource> std::fmt::Debug for PushAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushAdapter")
            .field("attached", &self.shared.is_some())
            .finish()
    }
}

impl<S: PushSource> UnderlyingSource<S::Chunk> for PushAdapter<S> {
    fn start(&mut self, controller: ReadableController<S::Chunk>) -> SourceFuture {
        if let Some(source) = self.pending.take() {
            source.pause();
            let shared = Arc::new(PushShared {
                source,
                controller,
                terminated: AtomicBool::new(false),
            });
            shared.source.subscribe(PushDelivery {
                shared: Arc::downgrade(&shared),
            });
            self.shared = Some(shared);
        }
        ready_ok()
    }

    fn pull(&mut self, _controller: ReadableController<S::Chunk>) -> SourceFuture {
        if let Some(shared) = &self.shared {
            if !shared.terminated.load(Ordering::SeqCst) {
                shared.source.resume();
            }
        }
        ready_ok()
    }

    fn cancel(&mut self, _reason: Option<String>) -> SourceFuture {
        if let Some(shared) = self.shared.take() {
            if shared.terminate() {
                shared.source.unsubscribe();
            }
            shared.source.teardown();
        }
        ready_ok()
    }
}
