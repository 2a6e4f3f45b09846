//! Durable, all-or-nothing writes of inbound byte streams.
//!
//! Bytes land in a hidden staging file inside the storage directory, under
//! an exclusive advisory lock. A name is only settled on once the stream has
//! been fully drained and synced to disk, and the file appears under it in a
//! single exclusive rename. Until then nothing is visible.

use crate::dir::{DirGuard, blocking, persist_first_free};
use crate::error::{ErrorKind, Result};
use crate::models::StoredMedia;
use crate::name::validate as validate_name;
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::instrument;

/// Copy granularity. Not part of any contract; the stream length is never
/// known up front.
const CHUNK_SIZE: usize = 8192;
const STAGING_PREFIX: &str = ".";
const STAGING_SUFFIX: &str = ".part";

/// Scoped exclusive lock on an open file. Released on drop, on every exit
/// path.
struct ExclusiveLock {
    file: File,
    path: PathBuf,
}
impl ExclusiveLock {
    fn try_acquire(file: &File, path: &Path) -> Result<Self> {
        // A duplicated handle shares the lock with the original descriptor.
        let file = file.try_clone().map_err(ErrorKind::Io)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Self { file, path: path.to_path_buf() }),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                exn::bail!(ErrorKind::LockUnavailable(path.to_path_buf()))
            },
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        }
    }
}
impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release file lock");
        }
    }
}

impl DirGuard<'_> {
    /// Drain `stream` into the directory under a free variant of `requested`.
    ///
    /// The requested name is used as-is if free, otherwise `base(1)ext`,
    /// `base(2)ext`, ... are tried in order. On failure nothing is left
    /// behind, and no other reader ever sees a partial file.
    ///
    /// # Errors
    ///
    /// - [`InvalidName`](ErrorKind::InvalidName) before any byte is read if
    ///   `requested` is not a usable file name.
    /// - [`LockUnavailable`](ErrorKind::LockUnavailable) if the staging file
    ///   could not be locked exclusively.
    /// - [`Io`](ErrorKind::Io) if the stream errors before end-of-stream (a
    ///   client disconnecting mid-upload, for example) or the disk fails.
    #[instrument(skip_all, fields(requested = %requested, name, size))]
    pub async fn write<R>(&self, requested: &str, mut stream: R) -> Result<StoredMedia>
    where
        R: AsyncRead + Unpin + Send,
    {
        let requested = validate_name(requested)?.to_string();
        let root = self.dir.root().to_path_buf();
        let staging_root = root.clone();
        let (staging, lock) = blocking(move || {
            let staging = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .suffix(STAGING_SUFFIX)
                .tempfile_in(&staging_root)
                .map_err(|e| ErrorKind::from_io(e, &staging_root))?;
            let lock = ExclusiveLock::try_acquire(staging.as_file(), staging.path())?;
            Ok((staging, lock))
        })
        .await?;

        let handle = staging.as_file().try_clone().map_err(ErrorKind::Io)?;
        let mut out = tokio::fs::File::from_std(handle);
        let size = copy_chunked(&mut stream, &mut out).await?;
        out.flush().await.map_err(ErrorKind::Io)?;
        out.sync_all().await.map_err(ErrorKind::Io)?;
        drop(out);
        drop(lock);

        let (name, path) = blocking(move || persist_first_free(staging, &root, &requested)).await?;
        let span = tracing::Span::current();
        span.record("name", name.as_str());
        span.record("size", size);
        tracing::debug!("Upload persisted");
        Ok(StoredMedia { name, path, size })
    }
}

async fn copy_chunked<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let read = reader.read(&mut buffer).await.map_err(ErrorKind::Io)?;
        if read == 0 {
            return Ok(total);
        }
        writer.write_all(&buffer[..read]).await.map_err(ErrorKind::Io)?;
        total += read as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Extensions, MediaDir};
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields `good` bytes then fails, like a client hanging up mid-upload.
    struct BrokenStream {
        good: Vec<u8>,
    }
    impl AsyncRead for BrokenStream {
        fn poll_read(mut self: Pin<&mut Self>, _: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            if self.good.is_empty() {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)));
            }
            let n = self.good.len().min(buf.remaining());
            buf.put_slice(&self.good[..n]);
            self.good.drain(..n);
            Poll::Ready(Ok(()))
        }
    }

    fn visible_files(root: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_write_stores_every_byte() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MediaDir::new(tmp.path()).unwrap();
        // Several chunks plus a ragged tail.
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let stored = dir.lock().await.write("clip.mp4", data.as_slice()).await.unwrap();
        assert_eq!(stored.name, "clip.mp4");
        assert_eq!(stored.size, data.len() as u64);
        assert_eq!(std::fs::read(&stored.path).unwrap(), data);
        assert_eq!(visible_files(tmp.path()), ["clip.mp4"]);
    }

    #[tokio::test]
    async fn test_write_empty_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MediaDir::new(tmp.path()).unwrap();
        let stored = dir.lock().await.write("empty.mp4", &b""[..]).await.unwrap();
        assert_eq!(stored.size, 0);
        assert!(stored.path.exists());
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MediaDir::new(tmp.path()).unwrap();
        let stream = BrokenStream { good: vec![7; CHUNK_SIZE + 5] };
        let err = dir.lock().await.write("clip.mp4", stream).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Io(e) if e.kind() == io::ErrorKind::ConnectionReset));
        assert!(visible_files(tmp.path()).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_name_is_invisible_until_complete() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Arc::new(MediaDir::new(tmp.path()).unwrap());
        let (mut client, server) = tokio::io::duplex(64);
        let writer = {
            let dir = Arc::clone(&dir);
            tokio::spawn(async move { dir.lock().await.write("clip.mp4", server).await })
        };
        client.write_all(b"partial").await.unwrap();
        // Give the writer time to stage what it has received.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(dir.list(&Extensions::default()).await.unwrap().is_empty());
        assert!(!tmp.path().join("clip.mp4").exists());

        client.write_all(b" and the rest").await.unwrap();
        drop(client);
        let stored = writer.await.unwrap().unwrap();
        let listed: Vec<_> = dir.list(&Extensions::default()).await.unwrap().into_iter().map(|f| (f.name, f.size)).collect();
        assert_eq!(listed, [("clip.mp4".to_string(), stored.size)]);
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"partial and the rest");
    }

    #[test]
    fn test_lock_contention_is_distinguishable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("locked");
        let holder = File::create(&path).unwrap();
        FileExt::try_lock_exclusive(&holder).unwrap();
        // A separate open gets its own lock, which conflicts.
        let contender = File::open(&path).unwrap();
        let err = ExclusiveLock::try_acquire(&contender, &path).err().unwrap();
        assert!(matches!(&*err, ErrorKind::LockUnavailable(p) if p == &path));
        FileExt::unlock(&holder).unwrap();
        let lock = ExclusiveLock::try_acquire(&contender, &path).unwrap();
        drop(lock);
        // Released on drop.
        FileExt::try_lock_exclusive(&holder).unwrap();
    }
}
