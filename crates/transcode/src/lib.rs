mod ffmpeg;
pub mod error;

use crate::error::Result;
use async_trait::async_trait;
pub use crate::ffmpeg::Ffmpeg;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Re-encodes a stored file into a replacement.
///
/// Implementations treat `source` as read-only and write their output to a
/// distinct path in the same directory, so the caller can swap it in with a
/// single rename. `Ok(None)` means "keep the source as it is".
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, source: &Path) -> Result<Option<PathBuf>>;
}

pub type TranscoderHandle = Arc<dyn Transcoder>;

/// Never produces a replacement; for when transcoding is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

#[async_trait]
impl Transcoder for Passthrough {
    async fn transcode(&self, source: &Path) -> Result<Option<PathBuf>> {
        tracing::trace!(source = %source.display(), "Transcoding disabled; keeping upload as-is");
        Ok(None)
    }
}

/// Hidden sibling of `source` that transcoder output is written to:
/// `dir/clip.mp4` becomes `dir/.clip.transcode.mp4`.
pub fn scratch_path(source: &Path) -> PathBuf {
    let stem = source.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!(".{stem}.transcode.{}", ext.to_string_lossy()),
        None => format!(".{stem}.transcode"),
    };
    source.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/srv/videos/clip.mp4", "/srv/videos/.clip.transcode.mp4")]
    #[case("/srv/videos/clip(1).mov", "/srv/videos/.clip(1).transcode.mov")]
    #[case("/srv/videos/archive.tar.gz", "/srv/videos/.archive.tar.transcode.gz")]
    #[case("/srv/videos/README", "/srv/videos/.README.transcode")]
    fn scratch_path_is_hidden_sibling(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(scratch_path(Path::new(source)), PathBuf::from(expected));
    }

    #[tokio::test]
    async fn passthrough_keeps_source() {
        assert!(Passthrough.transcode(Path::new("/srv/videos/clip.mp4")).await.unwrap().is_none());
    }
}
