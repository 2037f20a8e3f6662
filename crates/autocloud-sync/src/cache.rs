//! Mirror snapshot persistence
//!
//! The remote mirror is written to `<cache_dir>/remote-mirror.json` after
//! every reconciliation and read back at startup so the first cycle can skip
//! the full remote listing. Reading is best-effort: a missing or unparseable
//! file is a cache miss. Writes go to a temporary file that is then renamed
//! over the old snapshot.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use autocloud_core::domain::IndexTree;
use tracing::{debug, info, warn};

use crate::SyncError;

/// File name of the mirror snapshot inside the cache directory
pub const MIRROR_CACHE_FILE: &str = "remote-mirror.json";

/// Reads and writes the mirror snapshot
#[derive(Debug, Clone)]
pub struct MirrorCache {
    path: PathBuf,
}

impl MirrorCache {
    /// Cache stored in `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(MIRROR_CACHE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot, `None` on any failure
    pub async fn load(&self) -> Option<IndexTree> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No mirror cache");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read mirror cache");
                return None;
            }
        };

        match IndexTree::from_json(&content) {
            Ok(tree) => {
                info!(
                    path = %self.path.display(),
                    files = tree.file_count(),
                    "Loaded remote mirror from cache"
                );
                Some(tree)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable mirror cache");
                None
            }
        }
    }

    /// Overwrites the snapshot with `tree`
    pub async fn store(&self, tree: &IndexTree) -> Result<(), SyncError> {
        let json = tree.to_json()?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SyncError::Cache(format!(
                "failed to replace {}: {e}",
                self.path.display()
            )));
        }

        debug!(path = %self.path.display(), bytes = json.len(), "Stored mirror cache");
        Ok(())
    }
}
