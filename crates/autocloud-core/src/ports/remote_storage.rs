//! Remote storage port (driven/secondary port)
//!
//! This module defines the capability the sync engine needs from the remote
//! store: a session that can be opened and closed, plus basic file and
//! directory operations addressed by `/`-separated remote paths.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific
//!   and don't need domain-level classification.
//! - Uses `#[async_trait]` for async trait methods.
//! - Retry policy does not belong here: the connection manager in the sync
//!   crate wraps `connect` with its own loop.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ============================================================================
// Credentials
// ============================================================================

/// Parameters for opening a remote session
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// Path to a private key file used instead of a password
    pub private_key: Option<PathBuf>,
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key)
            .finish()
    }
}

// ============================================================================
// Listing DTOs
// ============================================================================

/// Kind of a remote directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Result of a remote `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub is_directory: bool,
    pub size: u64,
}

// ============================================================================
// IRemoteStorage trait
// ============================================================================

/// Port trait for the remote store
///
/// Implementations wrap a concrete transport (SFTP session, mounted share,
/// in-memory fake for tests). Every method other than `connect` may assume
/// a session is open.
#[async_trait::async_trait]
pub trait IRemoteStorage: Send + Sync {
    /// Opens a session
    async fn connect(&self, credentials: &RemoteCredentials) -> anyhow::Result<()>;

    /// Closes the session
    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Lists the direct children of a remote directory
    async fn list(&self, path: &str) -> anyhow::Result<Vec<RemoteEntry>>;

    /// Uploads a local file to `remote_path`, replacing any existing file
    async fn put(&self, local_path: &Path, remote_path: &str) -> anyhow::Result<()>;

    /// Deletes a remote file
    async fn delete(&self, remote_path: &str) -> anyhow::Result<()>;

    /// Removes a remote directory, with its contents when `recursive`
    async fn rmdir(&self, remote_path: &str, recursive: bool) -> anyhow::Result<()>;

    /// Creates a remote directory, with missing parents when `recursive`
    async fn mkdir(&self, remote_path: &str, recursive: bool) -> anyhow::Result<()>;

    /// Returns true if anything exists at `path`
    async fn exists(&self, path: &str) -> anyhow::Result<bool>;

    /// Returns metadata for `path`
    async fn stat(&self, path: &str) -> anyhow::Result<RemoteStat>;

    /// Moves `from` to `to`
    async fn rename(&self, from: &str, to: &str) -> anyhow::Result<()>;
}
