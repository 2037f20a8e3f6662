//! AutoCloud Sync - One-way mirror engine
//!
//! Provides:
//! - A connection manager with unbounded fixed-delay reconnect
//! - Local change tracking (full rescans or watcher-driven updates)
//! - Reconciliation of local trees against an optimistically maintained
//!   remote mirror, with a JSON snapshot cache
//!
//! ## Modules
//!
//! - [`connection`] - Session lifecycle and remote path helpers
//! - [`normalizer`] - Raw filesystem events to semantic change records
//! - [`watcher`] - `notify` based recursive folder watcher
//! - [`indexer`] - Depth-bounded local and remote tree walks
//! - [`tracker`] - Per-folder owner of the local index
//! - [`cache`] - Mirror snapshot persistence
//! - [`orchestrator`] - The reconciliation cycle and its timer loop
//! - [`filesystem`] - Local filesystem adapter
//! - [`remote_dir`] - Remote storage backed by a mounted directory

pub mod cache;
pub mod connection;
pub mod filesystem;
pub mod indexer;
pub mod normalizer;
pub mod orchestrator;
pub mod remote_dir;
pub mod tracker;
pub mod watcher;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A local path that was about to be uploaded no longer exists
    #[error("Local path missing: {0}")]
    LocalPathMissing(PathBuf),

    /// A path below a watched folder could not be stat'ed or listed
    #[error("Cannot read local path {path}: {cause:#}")]
    LocalRead { path: PathBuf, cause: anyhow::Error },

    /// A call through the remote storage port failed
    #[error("Remote {op} failed for {path}: {cause:#}")]
    RemoteOperation {
        op: &'static str,
        path: String,
        cause: anyhow::Error,
    },

    /// A remote operation was attempted without an open session
    #[error("Not connected to remote storage")]
    NotConnected,

    /// The connection could not be established within the cycle's budget
    #[error("Connection not established within {0:?}")]
    ConnectTimeout(Duration),

    /// The mirror cache could not be written or read
    #[error("Cache error: {0}")]
    Cache(String),

    /// A file watcher could not be created or attached
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// A domain-level error propagated from autocloud-core
    #[error("Domain error: {0}")]
    DomainError(#[from] autocloud_core::domain::errors::DomainError),
}

impl SyncError {
    pub(crate) fn remote(op: &'static str, path: impl Into<String>, cause: anyhow::Error) -> Self {
        SyncError::RemoteOperation {
            op,
            path: path.into(),
            cause,
        }
    }
}
