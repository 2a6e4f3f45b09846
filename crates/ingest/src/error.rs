//! Ingest Error Types
//!
//! Every variant below ends an upload session in the single `FAILED` state,
//! except [`Rejected`](ErrorKind::Rejected) (the session never started) and
//! [`Bind`](ErrorKind::Bind) (the listener never started).

use derive_more::{Display, Error};
use std::net::SocketAddr;

/// An ingest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for ingest operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Every worker is busy and the queue is full.
    #[display("server at capacity")]
    Rejected,
    /// The client sent something other than a well-formed upload request.
    #[display("malformed upload request: {_0}")]
    Framing(#[error(not(source))] String),
    /// Resolving a name or writing the bytes failed.
    #[display("could not store upload")]
    Storage,
    #[display("could not transcode upload")]
    Transcode,
    #[display("could not swap in transcoded file")]
    Replace,
    #[display("could not send reply")]
    Respond,
    #[display("upload session panicked")]
    Panicked,
    #[display("could not bind listener on {_0}")]
    Bind(#[error(not(source))] SocketAddr),
    /// A listener stopped with an I/O error.
    #[display("listener failed")]
    Serve,
    /// The worker pool has been shut down.
    #[display("worker pool closed")]
    Closed,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected | Self::Storage)
    }
}
