//! Remote storage backed by a mounted directory
//!
//! [`MountedDirectoryStorage`] implements [`IRemoteStorage`] on top of a
//! directory that is already mounted locally (an sshfs, NFS or SMB mount of
//! the remote host). Remote paths are resolved below the mount point.
//! Opening a session only checks that the mount point is reachable, so a
//! dropped mount surfaces as a connection failure and is retried by the
//! connection manager.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use autocloud_core::ports::{IRemoteStorage, RemoteCredentials, RemoteEntry, RemoteStat};
use tracing::{debug, info};

/// [`IRemoteStorage`] over a locally mounted directory
#[derive(Debug, Clone)]
pub struct MountedDirectoryStorage {
    mount_point: PathBuf,
}

impl MountedDirectoryStorage {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Maps a `/`-separated remote path to a path below the mount point
    fn resolve(&self, remote: &str) -> Result<PathBuf> {
        let rel = Path::new(remote.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("remote path escapes the mount point: {remote}");
        }
        Ok(self.mount_point.join(rel))
    }
}

#[async_trait]
impl IRemoteStorage for MountedDirectoryStorage {
    async fn connect(&self, credentials: &RemoteCredentials) -> Result<()> {
        let meta = tokio::fs::metadata(&self.mount_point)
            .await
            .with_context(|| format!("mount point {} unavailable", self.mount_point.display()))?;
        if !meta.is_dir() {
            bail!("mount point {} is not a directory", self.mount_point.display());
        }
        info!(
            mount_point = %self.mount_point.display(),
            host = %credentials.host,
            "Using mounted remote directory"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        debug!(mount_point = %self.mount_point.display(), "Released mounted remote directory");
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("cannot list {}", dir.display()))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if meta.is_dir() {
                entries.push(RemoteEntry::directory(name));
            } else {
                entries.push(RemoteEntry::file(name, meta.len()));
            }
        }
        Ok(entries)
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let target = self.resolve(remote_path)?;
        tokio::fs::copy(local_path, &target).await.with_context(|| {
            format!("cannot copy {} to {}", local_path.display(), target.display())
        })?;
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        let target = self.resolve(remote_path)?;
        tokio::fs::remove_file(&target)
            .await
            .with_context(|| format!("cannot delete {}", target.display()))
    }

    async fn rmdir(&self, remote_path: &str, recursive: bool) -> Result<()> {
        let target = self.resolve(remote_path)?;
        let result = if recursive {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_dir(&target).await
        };
        result.with_context(|| format!("cannot remove folder {}", target.display()))
    }

    async fn mkdir(&self, remote_path: &str, recursive: bool) -> Result<()> {
        let target = self.resolve(remote_path)?;
        let result = if recursive {
            tokio::fs::create_dir_all(&target).await
        } else {
            tokio::fs::create_dir(&target).await
        };
        result.with_context(|| format!("cannot create folder {}", target.display()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat> {
        let target = self.resolve(path)?;
        let meta = tokio::fs::metadata(&target)
            .await
            .with_context(|| format!("cannot stat {}", target.display()))?;
        Ok(RemoteStat {
            is_directory: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
        })
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (source, target) = (self.resolve(from)?, self.resolve(to)?);
        tokio::fs::rename(&source, &target).await.with_context(|| {
            format!("cannot move {} to {}", source.display(), target.display())
        })
    }
}
