//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs`.
//!
//! Metadata is read with `symlink_metadata` so links are reported as such
//! and never followed into another part of the disk.

use std::io::ErrorKind;
use std::path::Path;

use autocloud_core::ports::local_filesystem::{FileSystemState, ILocalFileSystem, LocalEntry};
use chrono::DateTime;
use tracing::{debug, instrument};

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    /// Create a new `LocalFileSystemAdapter`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let modified = metadata.modified().ok().and_then(|st| {
            st.duration_since(std::time::UNIX_EPOCH)
                .ok()
                .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
        });

        let file_type = metadata.file_type();
        Ok(FileSystemState {
            exists: true,
            is_file: file_type.is_file(),
            is_dir: file_type.is_dir(),
            size: if file_type.is_file() { metadata.len() } else { 0 },
            modified,
        })
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<LocalEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let metadata = match tokio::fs::symlink_metadata(entry.path()).await {
                Ok(m) => m,
                // Entry vanished between listing and stat.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let file_type = metadata.file_type();
            entries.push(LocalEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
                size: if file_type.is_dir() { 0 } else { metadata.len() },
            });
        }

        debug!(count = entries.len(), "Read directory");
        Ok(entries)
    }
}
