//! Error types for the stream protocol.
//!
//! All protocol failures are expressed as a single [`StreamError`] enum.
//! Reasons supplied by an underlying source or sink are wrapped in an
//! `Arc` so that rejecting many pending reads with "the same" reason
//! clones a handle rather than reformatting the error — the original
//! reason survives unmodified all the way to every waiter.

use std::sync::Arc;

use thiserror::Error;

/// Coarse classification of a [`StreamError`], for matching in callers
/// and tests without destructuring payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation attempted against a stream already in a terminal or
    /// conflicting state.
    InvalidState,
    /// Reader/writer lock protocol misuse: double-locking, or using a
    /// handle whose lock was released.
    Lock,
    /// A queuing strategy produced a chunk size that is negative, NaN,
    /// or infinite.
    Strategy,
    /// Failure reported by the underlying source.
    Source,
    /// Failure reported by the underlying sink.
    Sink,
}

/// Error type shared by every stream operation.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The stream or controller is in a state that forbids the operation.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Lock protocol violation.
    #[error("lock violation: {0}")]
    Lock(&'static str),

    /// The queuing strategy returned an unusable chunk size.
    #[error("queuing strategy returned invalid chunk size {0}")]
    Strategy(f64),

    /// The underlying source failed; the original reason is preserved.
    #[error("underlying source error: {0}")]
    Source(Arc<dyn std::error::Error + Send + Sync>),

    /// The underlying sink failed; the original reason is preserved.
    #[error("underlying sink error: {0}")]
    Sink(Arc<dyn std::error::Error + Send + Sync>),
}

impl StreamError {
    /// Wraps an arbitrary error as a source failure.
    pub fn source(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Source(Arc::new(err))
    }

    /// Wraps a plain message as a source failure.
    pub fn source_msg(msg: impl Into<String>) -> Self {
        Self::Source(Arc::new(Reason(msg.into())))
    }

    /// Wraps an arbitrary error as a sink failure.
    pub fn sink(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Sink(Arc::new(err))
    }

    /// Wraps a plain message as a sink failure.
    pub fn sink_msg(msg: impl Into<String>) -> Self {
        Self::Sink(Arc::new(Reason(msg.into())))
    }

    /// The classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Lock(_) => ErrorKind::Lock,
            Self::Strategy(_) => ErrorKind::Strategy,
            Self::Source(_) => ErrorKind::Source,
            Self::Sink(_) => ErrorKind::Sink,
        }
    }

    /// True if two errors carry the identical (pointer-equal) source or
    /// sink reason. Non-reason variants compare by kind and payload.
    #[must_use]
    pub fn same_reason(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Source(a), Self::Source(b)) | (Self::Sink(a), Self::Sink(b)) => {
                Arc::ptr_eq(a, b)
            }
            (Self::InvalidState(a), Self::InvalidState(b))
            | (Self::Lock(a), Self::Lock(b)) => a == b,
            (Self::Strategy(a), Self::Strategy(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

/// Opaque message-only reason used by [`StreamError::source_msg`] and
/// [`StreamError::sink_msg`].
#[derive(Debug)]
struct Reason(String);

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Reason {}
