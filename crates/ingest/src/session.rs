//! One upload, from requested name to stored file.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::FutureExt;
use reel_storage::error::ErrorKind as StorageErrorKind;
use reel_storage::{DirHandle, StoredMedia};
use reel_transcode::TranscoderHandle;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use tokio::io::AsyncRead;
use tracing::{Instrument, instrument};

/// What every upload needs, whichever front end it arrived through.
#[derive(Clone)]
pub struct Session {
    dir: DirHandle,
    transcoder: TranscoderHandle,
}
impl Session {
    pub fn new(dir: DirHandle, transcoder: TranscoderHandle) -> Self {
        Self { dir, transcoder }
    }

    pub fn dir(&self) -> &DirHandle {
        &self.dir
    }

    /// Store `body` under a free variant of `requested`, then try to swap in
    /// a transcoded copy.
    ///
    /// Transcoding is best effort: if it fails, or its output cannot be
    /// swapped in, the raw upload stays and the session still succeeds.
    /// A panic anywhere in here is reported as [`Panicked`](ErrorKind::Panicked).
    pub async fn run<R>(&self, requested: &str, body: R) -> Result<StoredMedia>
    where
        R: AsyncRead + Unpin + Send,
    {
        let span = tracing::info_span!("session", requested = %requested);
        async move {
            match AssertUnwindSafe(self.store(requested, body)).catch_unwind().await {
                Ok(Ok(stored)) => {
                    tracing::info!(name = %stored.name, size = stored.size, "Upload stored");
                    Ok(stored)
                },
                Ok(Err(err)) => {
                    tracing::warn!(error = ?err, "Upload failed");
                    Err(err)
                },
                Err(_) => {
                    tracing::error!("Upload session panicked");
                    exn::bail!(ErrorKind::Panicked)
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn store<R>(&self, requested: &str, body: R) -> Result<StoredMedia>
    where
        R: AsyncRead + Unpin + Send,
    {
        let stored = {
            let guard = self.dir.lock().await;
            tracing::debug!("Writing raw upload");
            match guard.write(requested, body).await {
                Ok(stored) => stored,
                Err(err) if matches!(&*err, StorageErrorKind::InvalidName(_)) => {
                    return Err(err).or_raise(|| ErrorKind::Framing(format!("unusable file name {requested:?}")));
                },
                Err(err) => return Err(err).or_raise(|| ErrorKind::Storage),
            }
        };

        tracing::debug!(name = %stored.name, "Transcoding");
        match self.transcoder.transcode(&stored.path).await.or_raise(|| ErrorKind::Transcode) {
            Ok(Some(output)) => self.replace(&stored, &output).await,
            Ok(None) => {},
            Err(err) => tracing::warn!(name = %stored.name, error = ?err, "Transcoding failed; keeping raw upload"),
        }
        Ok(stored)
    }

    #[instrument(skip_all, fields(name = %stored.name))]
    async fn replace(&self, stored: &StoredMedia, output: &Path) {
        tracing::debug!("Replacing raw upload with transcoded output");
        if let Err(err) = self.dir.replace(stored, output).await.or_raise(|| ErrorKind::Replace) {
            tracing::warn!(error = ?err, "Could not replace raw upload; keeping it");
            if let Err(e) = tokio::fs::remove_file(output).await {
                tracing::warn!(output = %output.display(), error = %e, "Could not remove orphaned transcoder output");
            }
        }
    }
}
