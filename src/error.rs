//! Crate-wide error taxonomy.
//!
//! Every failure mode named in the protocol design (application error,
//! protocol violation, disconnect, timeout) gets its own variant so callers
//! can tell "your app blew up" from "the other side broke the calling
//! convention" from "the peer went away".

/// A boxed application error, erased the same way `std::error::Error`
/// trait objects usually are in this codebase's corpus.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by either adapter direction.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The wrapped application raised/returned an error.
    #[error("application error: {0}")]
    Application(#[source] BoxError),

    /// Either side violated the calling convention (duplicate start,
    /// body before start, unknown message type, write after close, ...).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The peer disconnected mid-request.
    #[error("peer disconnected")]
    Disconnect,

    /// A bounded wait (e.g. `wait_time`) expired.
    #[error("operation timed out")]
    Timeout,

    /// Lower-level I/O failure (e.g. reading `wsgi.input`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        AdapterError::Protocol(msg.into())
    }

    pub fn application(err: impl Into<BoxError>) -> Self {
        AdapterError::Application(err.into())
    }

    /// True for errors that should cause the *other* side to observe EOF
    /// rather than be treated as a fresh application error of its own.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, AdapterError::Disconnect)
    }
}

/// Errors local to the bounded stream primitives (`streams`).
///
/// Distinct from [`AdapterError`] because "the stream ran dry" and "the
/// stream was closed with an attached application error" are different
/// enough that a consumer reliably wants to match on them, whereas
/// `AdapterError` is the thing that attaches to the `Closed` case.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The stream ended normally; no more items will ever arrive.
    #[error("end of stream")]
    Eof,

    /// The stream was closed with an error attached. Delivered to the
    /// consuming side's next read exactly once; subsequent reads see
    /// [`StreamError::Eof`].
    #[error(transparent)]
    Closed(AdapterError),

    /// A `get(timeout)` on the synchronous side expired before an item
    /// (or closure) arrived.
    #[error("timed out waiting for stream item")]
    Timeout,
}
