//! Local filesystem port (driven/secondary port)
//!
//! Read-only view of the local disk used to build and refresh index trees.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - A missing path is not an error for `get_state`; it returns
//!   [`FileSystemState::not_found`].
//! - Change watching is handled separately by the sync crate's watcher,
//!   which feeds the change normalizer through a channel.

use std::path::Path;

use chrono::{DateTime, Utc};

// ============================================================================
// FileSystemState struct
// ============================================================================

/// What `stat` reports for a path, sampled once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemState {
    pub exists: bool,
    /// False for directories, symlinks and special files
    pub is_file: bool,
    /// A real directory, never a link to one
    pub is_dir: bool,
    /// Byte length, 0 unless `is_file`
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// State of a path that is not on disk
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            is_dir: false,
            size: 0,
            modified: None,
        }
    }

    /// Present and a regular file, i.e. something that can be uploaded
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    pub fn is_directory(&self) -> bool {
        self.exists && self.is_dir
    }
}

/// One entry of a local directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub name: String,
    pub is_dir: bool,
    /// Symbolic links are reported but never followed
    pub is_symlink: bool,
    pub size: u64,
}

// ============================================================================
// ILocalFileSystem trait
// ============================================================================

/// Port trait for reading the local filesystem
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Gets the current state of a file or directory
    ///
    /// Returns `FileSystemState::not_found()` if the path doesn't exist.
    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState>;

    /// Lists the direct children of a directory without following symlinks
    async fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<LocalEntry>>;
}
