//! Storage models.

use std::path::PathBuf;
use time::OffsetDateTime;

/// A media file persisted inside the storage directory.
///
/// The name never changes once the file exists; only its content may be
/// swapped, by rename, for a transcoded replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    /// Final (collision-free) file name
    pub name: String,
    /// Absolute path inside the storage directory
    pub path: PathBuf,
    /// Bytes received from the client
    pub size: u64,
}

/// A listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
