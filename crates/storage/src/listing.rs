//! Read-only view of stored media.

use crate::MediaDir;
use crate::error::{ErrorKind, Result};
use crate::models::MediaFile;
use crate::name::split;
use std::fs::Metadata;
use std::path::Path;
use tokio::fs;

/// Extensions a listing reports, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extensions(Vec<String>);
impl Extensions {
    /// Accepts extensions with or without their leading dot.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        )
    }

    pub fn matches(&self, name: &str) -> bool {
        match split(name) {
            (_, "") => false,
            (_, ext) => self.0.iter().any(|allowed| ext[1..].eq_ignore_ascii_case(allowed)),
        }
    }
}
impl Default for Extensions {
    fn default() -> Self {
        Self::new(["mp4", "avi", "mov"])
    }
}

impl MediaDir {
    /// Files in the storage directory whose extension is in `extensions`,
    /// sorted by name.
    ///
    /// Hidden files (in-flight staging files, transcoder scratch output) and
    /// anything that is not a regular file are never listed. A file removed
    /// between reading the directory and reading its metadata is skipped.
    pub async fn list(&self, extensions: &Extensions) -> Result<Vec<MediaFile>> {
        let root = self.root();
        let mut entries = fs::read_dir(root).await.map_err(|e| ErrorKind::from_io(e, root))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, root))? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !extensions.matches(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => exn::bail!(ErrorKind::from_io(e, entry.path())),
            };
            if metadata.is_file() {
                files.push(media_file(name, &entry.path(), metadata)?);
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

fn media_file(name: String, path: &Path, metadata: Metadata) -> Result<MediaFile> {
    let modified = metadata.modified().map_err(|e| ErrorKind::from_io(e, path))?.into();
    Ok(MediaFile { name, size: metadata.len(), modified })
}
