//! Transcoder doubles and fixtures shared by this crate's tests.

use crate::session::Session;
use async_trait::async_trait;
use reel_storage::MediaDir;
use reel_transcode::error::{ErrorKind as TranscodeErrorKind, Result as TranscodeResult};
use reel_transcode::{Transcoder, scratch_path};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Always fails, like an ffmpeg that cannot decode the upload.
pub(crate) struct Failing;
#[async_trait]
impl Transcoder for Failing {
    async fn transcode(&self, _: &Path) -> TranscodeResult<Option<PathBuf>> {
        exn::bail!(TranscodeErrorKind::Failed(1))
    }
}

/// Writes fixed bytes to the usual scratch path.
pub(crate) struct Copying(pub(crate) Vec<u8>);
#[async_trait]
impl Transcoder for Copying {
    async fn transcode(&self, source: &Path) -> TranscodeResult<Option<PathBuf>> {
        let output = scratch_path(source);
        std::fs::write(&output, &self.0).unwrap();
        Ok(Some(output))
    }
}

/// Writes its output into another directory, which cannot be swapped in.
pub(crate) struct Foreign(pub(crate) PathBuf);
#[async_trait]
impl Transcoder for Foreign {
    async fn transcode(&self, source: &Path) -> TranscodeResult<Option<PathBuf>> {
        let output = self.0.join(source.file_name().unwrap());
        std::fs::write(&output, b"foreign").unwrap();
        Ok(Some(output))
    }
}

pub(crate) struct Panicking;
#[async_trait]
impl Transcoder for Panicking {
    async fn transcode(&self, _: &Path) -> TranscodeResult<Option<PathBuf>> {
        panic!("transcoder crashed")
    }
}

/// Keeps the raw file but takes its time about it.
pub(crate) struct Slow(pub(crate) Duration);
#[async_trait]
impl Transcoder for Slow {
    async fn transcode(&self, _: &Path) -> TranscodeResult<Option<PathBuf>> {
        tokio::time::sleep(self.0).await;
        Ok(None)
    }
}

pub(crate) fn session(transcoder: impl Transcoder + 'static) -> (tempfile::TempDir, Session) {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Arc::new(MediaDir::new(tmp.path()).unwrap());
    (tmp, Session::new(dir, Arc::new(transcoder)))
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
