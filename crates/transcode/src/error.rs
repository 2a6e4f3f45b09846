//! Transcode Error Types
//!
//! Every variant is a reason to keep the raw upload as-is. None of them are
//! fatal to an upload session.

use derive_more::{Display, Error};
use std::path::PathBuf;
use std::time::Duration;

/// A transcode error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for transcode operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("ffmpeg not detected on your system")]
    ToolNotFound,
    #[display("transcoder did not finish within {}s", _0.as_secs())]
    Timeout(#[error(not(source))] Duration),
    /// The transcoder exited with a non-zero exit code, or was killed by a
    /// signal (reported as `-1`).
    #[display("transcoder exited with code: {_0}")]
    Failed(#[error(not(source))] i32),
    /// The transcoder reported success but wrote nothing.
    #[display("transcoder produced no output at {}", _0.display())]
    MissingOutput(#[error(not(source))] PathBuf),
    #[display("transcoder I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
