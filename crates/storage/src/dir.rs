//! The storage directory as an explicit, shareable resource.
//!
//! A [`MediaDir`] owns the one mutable thing every upload touches: the
//! directory's namespace. Name resolution and file creation happen while
//! holding its [`DirGuard`], so two sessions can never settle on the same
//! free name.

use crate::error::{ErrorKind, Result};
use crate::models::StoredMedia;
use crate::name::candidates;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, MutexGuard};
use tracing::instrument;

/// Upper bound on `base(k)ext` attempts before giving up.
const MAX_CANDIDATES: usize = 100_000;

/// A flat directory of media files.
///
/// # Examples
///
/// ```no_run
/// use reel_storage::MediaDir;
///
/// # async fn example() -> reel_storage::error::Result<()> {
/// let dir = MediaDir::new("/srv/reel/uploaded_videos")?;
/// let guard = dir.lock().await;
/// let stored = guard.write("clip.mp4", &b"...bytes..."[..]).await?;
/// drop(guard);
/// println!("stored as {}", stored.name);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MediaDir {
    root: PathBuf,
    namespace: Mutex<()>,
}
impl MediaDir {
    /// Open (creating if needed) the storage directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if the path is not
    /// absolute or exists but is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Runs once at startup; not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        }
        Ok(Self { root, namespace: Mutex::new(()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enter the directory's critical section.
    ///
    /// Everything done through the returned guard (writing a stream, then
    /// settling on its name) is serialized against every other holder.
    pub async fn lock(&self) -> DirGuard<'_> {
        DirGuard { dir: self, _held: self.namespace.lock().await }
    }

    /// Atomically swap the content of `stored` for the file at `replacement`.
    ///
    /// Readers see either the old bytes or the new bytes, never a mix. The
    /// replacement must live in this directory; a rename across filesystems
    /// is not atomic.
    #[instrument(skip_all, fields(name = %stored.name))]
    pub async fn replace(&self, stored: &StoredMedia, replacement: impl Into<PathBuf>) -> Result<()> {
        let from = replacement.into();
        let to = stored.path.clone();
        if from.parent() != Some(self.root.as_path()) {
            exn::bail!(ErrorKind::InvalidPath(from));
        }
        blocking(move || {
            std::fs::rename(&from, &to).map_err(|e| ErrorKind::from_io(e, &from))?;
            Ok(())
        })
        .await
    }
}

/// Proof of holding a [`MediaDir`]'s critical section.
pub struct DirGuard<'a> {
    pub(crate) dir: &'a MediaDir,
    _held: MutexGuard<'a, ()>,
}

/// Move a finished staging file to the first free variant of `requested`.
///
/// The requested name is used as-is if free, otherwise `base(1)ext`,
/// `base(2)ext`, ... are tried in order. Each attempt is an exclusive
/// create, so a file dropped into the directory by someone outside this
/// process is skipped rather than overwritten.
pub(crate) fn persist_first_free(
    mut staging: NamedTempFile,
    root: &Path,
    requested: &str,
) -> Result<(String, PathBuf)> {
    for candidate in candidates(requested).take(MAX_CANDIDATES) {
        let path = root.join(&candidate);
        match staging.persist_noclobber(&path) {
            Ok(_) => return Ok((candidate, path)),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => staging = e.file,
            Err(e) => exn::bail!(ErrorKind::from_io(e.error, path)),
        }
    }
    exn::bail!(ErrorKind::AlreadyExists(root.join(requested)))
}

/// Run a blocking filesystem call off the async worker threads.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => exn::bail!(ErrorKind::Io(std::io::Error::other(e))),
    }
}
