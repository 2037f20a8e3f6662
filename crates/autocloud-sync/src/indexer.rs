//! Depth-bounded directory walks
//!
//! [`LocalIndexer`] builds the index of a watched folder from disk and
//! refreshes folders flagged `needs_update`. [`walk_remote`] builds the
//! remote mirror from directory listings.
//!
//! Local trees use the watched folder's parent as their base path, so a
//! folder `/home/u/Docs` is indexed under `/Docs`. The remote mirror uses the
//! remote root as its base path, so the same folder lives at `/Docs` in both
//! trees and can be diffed with the offset `/Docs`.
//!
//! Folders deeper than `max_depth` below the walk root are recorded as
//! depth-limited sentinels and not listed.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use autocloud_core::domain::{FolderNode, IndexNode, IndexTree, PathFilter};
use autocloud_core::ports::ILocalFileSystem;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::SyncError;

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'a>>;

/// Builds and refreshes local index trees
#[derive(Clone)]
pub struct LocalIndexer {
    fs: Arc<dyn ILocalFileSystem>,
    filter: PathFilter,
    max_depth: usize,
}

impl LocalIndexer {
    pub fn new(fs: Arc<dyn ILocalFileSystem>, filter: PathFilter, max_depth: usize) -> Self {
        Self {
            fs,
            filter,
            max_depth,
        }
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    pub fn file_system(&self) -> &Arc<dyn ILocalFileSystem> {
        &self.fs
    }

    /// Base path for the tree of `folder`: its parent directory
    pub fn base_path_for(folder: &Path) -> String {
        folder
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Walks `folder` from scratch
    ///
    /// Subfolders that cannot be listed become [`FolderNode::unreadable`]
    /// sentinels, so a diff never mistakes them for empty folders. Each such
    /// failure is pushed onto `failures`.
    ///
    /// # Errors
    /// Fails only when `folder` itself cannot be listed.
    #[tracing::instrument(skip(self, folder, failures), fields(folder = %folder.display()))]
    pub async fn build(
        &self,
        folder: &Path,
        failures: &mut Vec<SyncError>,
    ) -> Result<IndexTree, SyncError> {
        let mut tree = IndexTree::with_base_path(Self::base_path_for(folder));
        tree.add_folder(&folder.to_string_lossy());
        self.walk_directory(&mut tree, folder.to_path_buf(), 0, true, failures)
            .await?;

        info!(
            files = tree.file_count(),
            folders = tree.folder_count(),
            "Indexed local folder"
        );
        Ok(tree)
    }

    /// Re-reads every folder flagged `needs_update` in the tree of `folder`
    ///
    /// Returns the number of folders rescanned. A flagged folder that no
    /// longer exists on disk is removed from the tree. A flagged folder that
    /// cannot be read keeps its previous contents and stays flagged; the
    /// failure is pushed onto `failures`.
    ///
    /// # Errors
    /// Fails when `folder` itself is flagged and can no longer be stat'ed as
    /// a directory. The tree is left untouched in that case.
    pub async fn rescan_flagged(
        &self,
        tree: &mut IndexTree,
        folder: &Path,
        failures: &mut Vec<SyncError>,
    ) -> Result<usize, SyncError> {
        let flagged = tree.folders_needing_update();
        let root_depth = tree.segments(&folder.to_string_lossy()).len();
        let mut rescanned = 0;

        for rel in &flagged {
            let key = tree.absolute_path(rel);
            let abs = PathBuf::from(&key);
            let depth = tree.segments(&key).len().saturating_sub(root_depth);

            let state = match self.fs.get_state(&abs).await {
                Ok(state) if depth == 0 && !state.is_directory() => {
                    return Err(SyncError::LocalRead {
                        path: abs,
                        cause: anyhow::anyhow!("watched folder is no longer a directory"),
                    });
                }
                Err(cause) if depth == 0 => return Err(SyncError::LocalRead { path: abs, cause }),
                Ok(state) => state,
                Err(cause) => {
                    warn!(path = %abs.display(), error = %cause, "Cannot stat flagged folder, keeping it");
                    failures.push(SyncError::LocalRead { path: abs, cause });
                    continue;
                }
            };
            if !state.is_directory() {
                debug!(path = %abs.display(), "Flagged folder is gone");
                tree.remove_path(&key);
                continue;
            }

            let previous = tree.detach(&key);
            tree.add_folder(&key);
            let before = failures.len();
            self.walk_directory(tree, abs, depth, false, failures).await?;

            if failures.len() > before && is_unreadable(tree, &key) {
                if let Some(mut node) = previous {
                    if let Some(folder) = node.as_folder_mut() {
                        folder.needs_update = true;
                    }
                    tree.attach(&key, node)?;
                }
                continue;
            }
            rescanned += 1;
        }

        if rescanned > 0 {
            debug!(count = rescanned, "Rescanned flagged folders");
        }
        Ok(rescanned)
    }

    /// Adds the contents of `dir` (at `depth` below the watched folder) to `tree`
    fn walk_directory<'a>(
        &'a self,
        tree: &'a mut IndexTree,
        dir: PathBuf,
        depth: usize,
        is_root: bool,
        failures: &'a mut Vec<SyncError>,
    ) -> WalkFuture<'a> {
        Box::pin(async move {
            let entries = match self.fs.read_dir(&dir).await {
                Ok(entries) => entries,
                Err(cause) if is_root => {
                    return Err(SyncError::LocalRead { path: dir, cause });
                }
                Err(cause) => {
                    warn!(path = %dir.display(), error = %cause, "Cannot read folder, contents unknown");
                    tree.attach(
                        &dir.to_string_lossy(),
                        IndexNode::Folder(FolderNode::unreadable()),
                    )?;
                    failures.push(SyncError::LocalRead { path: dir, cause });
                    return Ok(());
                }
            };

            for entry in entries {
                let path = dir.join(&entry.name);
                if self.filter.is_ignored(&path) {
                    continue;
                }
                if entry.is_symlink {
                    debug!(path = %path.display(), "Skipping symbolic link");
                    continue;
                }

                let key = path.to_string_lossy().into_owned();
                if entry.is_dir {
                    if depth + 1 > self.max_depth {
                        debug!(path = %path.display(), "Depth limit reached");
                        tree.attach(&key, IndexNode::Folder(FolderNode::depth_limited()))?;
                        continue;
                    }
                    tree.add_folder(&key);
                    self.walk_directory(tree, path, depth + 1, false, failures)
                        .await?;
                } else {
                    tree.add_file(&key, entry.size);
                }
            }

            Ok(())
        })
    }
}

fn is_unreadable(tree: &IndexTree, key: &str) -> bool {
    matches!(
        tree.get_folder_from_path(key),
        Some(IndexNode::Folder(folder)) if folder.unreadable
    )
}

/// Builds the remote mirror by listing the remote root recursively
///
/// The session must already be open. Subfolders that cannot be listed are
/// logged and left empty; a failure to list the root is returned.
#[tracing::instrument(skip(connection))]
pub async fn walk_remote(
    connection: &ConnectionManager,
    max_depth: usize,
) -> Result<IndexTree, SyncError> {
    fn walk<'a>(
        connection: &'a ConnectionManager,
        tree: &'a mut IndexTree,
        rel: String,
        depth: usize,
        max_depth: usize,
    ) -> WalkFuture<'a> {
        Box::pin(async move {
            let entries = match connection.list(&rel).await {
                Ok(entries) => entries,
                Err(e) if depth == 0 => return Err(e),
                Err(e) => {
                    warn!(path = %rel, error = %e, "Cannot list remote folder, skipping");
                    return Ok(());
                }
            };

            for entry in entries {
                let child = format!("{}/{}", rel.trim_end_matches('/'), entry.name);
                let key = tree.absolute_path(&child);
                if entry.is_directory() {
                    if depth + 1 > max_depth {
                        debug!(path = %child, "Remote depth limit reached");
                        tree.attach(&key, IndexNode::Folder(FolderNode::depth_limited()))?;
                        continue;
                    }
                    tree.add_folder(&key);
                    walk(connection, tree, child, depth + 1, max_depth).await?;
                } else {
                    tree.add_file(&key, entry.size);
                }
            }
            Ok(())
        })
    }

    let mut tree = IndexTree::with_base_path(connection.remote_root());
    walk(connection, &mut tree, "/".to_string(), 0, max_depth).await?;

    info!(
        files = tree.file_count(),
        folders = tree.folder_count(),
        "Built remote mirror from listing"
    );
    Ok(tree)
}
