//! Remote session lifecycle
//!
//! [`ConnectionManager`] owns the remote storage port and guarantees:
//!
//! - `connect()` is idempotent and retries forever with a fixed delay;
//!   it returns only once a session is open and the remote root exists.
//! - Concurrent callers are serialized, so only one session is ever opened.
//! - `is_connected()` is a plain read of the current state.
//!
//! All remote operations take paths relative to the configured remote root
//! (`/Docs/a.txt`) and map port failures into [`SyncError::RemoteOperation`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use autocloud_core::ports::{IRemoteStorage, RemoteCredentials, RemoteEntry};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::SyncError;

/// Delay between failed connection attempts unless configured otherwise
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(15);

/// What a successful [`ConnectionManager::remove`] deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovedKind {
    File,
    Directory,
}

/// Idempotent connect/disconnect over an [`IRemoteStorage`]
pub struct ConnectionManager {
    storage: Arc<dyn IRemoteStorage>,
    credentials: RemoteCredentials,
    remote_root: String,
    retry_delay: Duration,
    /// Held for the duration of connect/disconnect
    session: Mutex<()>,
    connected: AtomicBool,
    attempts: AtomicU64,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("remote_root", &self.remote_root)
            .field("retry_delay", &self.retry_delay)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        storage: Arc<dyn IRemoteStorage>,
        credentials: RemoteCredentials,
        remote_root: impl Into<String>,
    ) -> Self {
        let remote_root = remote_root.into();
        let trimmed = remote_root.trim_end_matches('/');
        let remote_root = if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        };

        Self {
            storage,
            credentials,
            remote_root,
            retry_delay: DEFAULT_RETRY_DELAY,
            session: Mutex::new(()),
            connected: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
        }
    }

    /// Overrides the delay between failed connection attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// True only when a session is open and setup has completed
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Total number of connection attempts made so far
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Absolute remote path for a root-relative path
    pub fn remote_path(&self, rel: &str) -> String {
        let rel = rel.trim_matches('/');
        match (self.remote_root.as_str(), rel.is_empty()) {
            (root, true) => root.to_string(),
            ("/", false) => format!("/{rel}"),
            (root, false) => format!("{root}/{rel}"),
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Opens a session, retrying forever with a fixed delay
    ///
    /// Returns immediately if already connected.
    pub async fn connect(&self) {
        let _guard = self.session.lock().await;
        if self.is_connected() {
            return;
        }

        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.try_connect().await {
                Ok(()) => {
                    self.connected.store(true, Ordering::Release);
                    info!(attempt, root = %self.remote_root, "Connected to remote storage");
                    return;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        error = %format!("{e:#}"),
                        retry_in_secs = self.retry_delay.as_secs_f64(),
                        "Connection failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Like [`connect`](Self::connect), but gives up after `timeout`
    pub async fn connect_within(&self, timeout: Duration) -> Result<(), SyncError> {
        tokio::time::timeout(timeout, self.connect())
            .await
            .map_err(|_| SyncError::ConnectTimeout(timeout))
    }

    async fn try_connect(&self) -> anyhow::Result<()> {
        self.storage
            .connect(&self.credentials)
            .await
            .context("failed to open session")?;

        if let Err(e) = self.setup().await {
            if let Err(close_err) = self.storage.disconnect().await {
                debug!(error = %close_err, "Failed to close half-open session");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Ensures the remote root folder exists
    async fn setup(&self) -> anyhow::Result<()> {
        let exists = self
            .storage
            .exists(&self.remote_root)
            .await
            .context("failed to check remote root")?;
        if !exists {
            info!(root = %self.remote_root, "Creating remote root folder");
            self.storage
                .mkdir(&self.remote_root, true)
                .await
                .context("failed to create remote root")?;
        }
        Ok(())
    }

    /// Closes the session; a no-op when not connected
    pub async fn disconnect(&self) {
        let _guard = self.session.lock().await;
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.storage.disconnect().await {
            warn!(error = %format!("{e:#}"), "Error while closing session");
        }
        self.connected.store(false, Ordering::Release);
        debug!("Disconnected from remote storage");
    }

    // ========================================================================
    // Remote operations
    // ========================================================================

    fn ensure_connected(&self) -> Result<(), SyncError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    /// Lists a remote folder
    pub async fn list(&self, rel: &str) -> Result<Vec<RemoteEntry>, SyncError> {
        self.ensure_connected()?;
        let path = self.remote_path(rel);
        self.storage
            .list(&path)
            .await
            .map_err(|e| SyncError::remote("list", path, e))
    }

    pub async fn exists(&self, rel: &str) -> Result<bool, SyncError> {
        self.ensure_connected()?;
        let path = self.remote_path(rel);
        self.storage
            .exists(&path)
            .await
            .map_err(|e| SyncError::remote("exists", path, e))
    }

    /// Creates a remote folder and any missing parents
    pub async fn make_folder(&self, rel: &str) -> Result<(), SyncError> {
        self.ensure_connected()?;
        let path = self.remote_path(rel);
        self.storage
            .mkdir(&path, true)
            .await
            .map_err(|e| SyncError::remote("mkdir", path, e))
    }

    async fn ensure_parent(&self, remote: &str) -> Result<(), SyncError> {
        let Some((parent, _)) = remote.rsplit_once('/') else {
            return Ok(());
        };
        if parent.is_empty() {
            return Ok(());
        }
        let exists = self
            .storage
            .exists(parent)
            .await
            .map_err(|e| SyncError::remote("exists", parent, e))?;
        if !exists {
            self.storage
                .mkdir(parent, true)
                .await
                .map_err(|e| SyncError::remote("mkdir", parent, e))?;
        }
        Ok(())
    }

    /// Uploads `local` to `rel`, creating the remote parent folder if needed
    #[tracing::instrument(skip(self, local), fields(local = %local.display()))]
    pub async fn upload_file(&self, local: &Path, rel: &str) -> Result<(), SyncError> {
        self.ensure_connected()?;
        let remote = self.remote_path(rel);
        self.ensure_parent(&remote).await?;
        self.storage
            .put(local, &remote)
            .await
            .map_err(|e| SyncError::remote("put", remote, e))
    }

    /// Removes `rel`, choosing file or folder removal from a remote `stat`
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, rel: &str) -> Result<RemovedKind, SyncError> {
        self.ensure_connected()?;
        let remote = self.remote_path(rel);
        let stat = self
            .storage
            .stat(&remote)
            .await
            .map_err(|e| SyncError::remote("stat", remote.clone(), e))?;

        if stat.is_directory {
            self.storage
                .rmdir(&remote, true)
                .await
                .map_err(|e| SyncError::remote("rmdir", remote, e))?;
            Ok(RemovedKind::Directory)
        } else {
            self.storage
                .delete(&remote)
                .await
                .map_err(|e| SyncError::remote("delete", remote, e))?;
            Ok(RemovedKind::File)
        }
    }

    /// Moves `from` to `to` on the remote side
    #[tracing::instrument(skip(self))]
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), SyncError> {
        self.ensure_connected()?;
        let (from, to) = (self.remote_path(from), self.remote_path(to));
        self.ensure_parent(&to).await?;
        self.storage
            .rename(&from, &to)
            .await
            .map_err(|e| SyncError::remote("rename", from, e))
    }
}
