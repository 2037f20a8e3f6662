//! Per-folder local index ownership
//!
//! A [`LocalTracker`] owns the index of one watched folder and brings it up
//! to date at the start of every sync cycle, either by rebuilding it or by
//! applying the change records produced from queued watcher events.
//!
//! In watch mode, one refresh does the following:
//!
//! 1. Drains all queued [`RawFsEvent`]s without blocking
//! 2. Normalizes them, then flushes disappearances still waiting for a partner
//! 3. Applies each record to the tree, flagging folders whose content is unknown
//! 4. Rescans the flagged folders from disk
//!
//! Records are applied one at a time. A record that cannot be read back from
//! disk flags its parent folder instead, so the rescan in step 4 covers it
//! and the remaining records still land. A [`RawFsEvent::Rescan`] from the
//! watcher flags the whole folder.
//!
//! Read failures that were absorbed this way are kept until the orchestrator
//! collects them with [`LocalTracker::take_read_failures`].
//!
//! Renames that moved a node already in the tree are remembered as
//! [`RenameHint`]s so the orchestrator can rename on the remote instead of
//! re-uploading.

use std::path::{Path, PathBuf};

use autocloud_core::config::LocalRefreshMode;
use autocloud_core::domain::{ChangeRecord, DomainError, IndexNode, IndexTree};
use autocloud_core::ports::FileSystemState;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use crate::indexer::LocalIndexer;
use crate::normalizer::{LocalChangeNormalizer, RawFsEvent};
use crate::watcher::FolderWatcher;
use crate::SyncError;

/// A local move whose source was present in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameHint {
    /// Root-relative path before the move (`/Docs/old.txt`)
    pub from: String,
    /// Root-relative path after the move
    pub to: String,
}

/// Owner of the index of one watched folder
pub struct LocalTracker {
    folder: PathBuf,
    offset: String,
    indexer: LocalIndexer,
    tree: IndexTree,
    mode: LocalRefreshMode,
    normalizer: LocalChangeNormalizer,
    events: Option<mpsc::Receiver<RawFsEvent>>,
    _watcher: Option<FolderWatcher>,
    rename_hints: Vec<RenameHint>,
    read_failures: Vec<SyncError>,
}

impl std::fmt::Debug for LocalTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTracker")
            .field("folder", &self.folder)
            .field("mode", &self.mode)
            .field("watching", &self.events.is_some())
            .finish()
    }
}

impl LocalTracker {
    /// Indexes `folder` and, in watch mode, starts watching it
    ///
    /// The watcher is attached before the initial walk so changes made
    /// during the walk are queued rather than lost.
    pub async fn start(
        folder: impl Into<PathBuf>,
        indexer: LocalIndexer,
        mode: LocalRefreshMode,
    ) -> Result<Self, SyncError> {
        let folder = folder.into();
        let (watcher, events) = match mode {
            LocalRefreshMode::Watch => {
                let (watcher, rx) = FolderWatcher::start(&folder)
                    .map_err(|e| SyncError::Watcher(format!("{e:#}")))?;
                (Some(watcher), Some(rx))
            }
            LocalRefreshMode::FullScan => (None, None),
        };

        Self::assemble(folder, indexer, mode, events, watcher).await
    }

    /// Tracker fed from an existing event channel instead of an OS watcher
    pub async fn with_events(
        folder: impl Into<PathBuf>,
        indexer: LocalIndexer,
        events: mpsc::Receiver<RawFsEvent>,
    ) -> Result<Self, SyncError> {
        Self::assemble(
            folder.into(),
            indexer,
            LocalRefreshMode::Watch,
            Some(events),
            None,
        )
        .await
    }

    async fn assemble(
        folder: PathBuf,
        indexer: LocalIndexer,
        mode: LocalRefreshMode,
        events: Option<mpsc::Receiver<RawFsEvent>>,
        watcher: Option<FolderWatcher>,
    ) -> Result<Self, SyncError> {
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DomainError::InvalidPath(folder.display().to_string()))?;

        let mut read_failures = Vec::new();
        let tree = indexer.build(&folder, &mut read_failures).await?;
        let normalizer = LocalChangeNormalizer::new(indexer.filter().clone());

        info!(folder = %folder.display(), ?mode, "Tracking local folder");
        Ok(Self {
            folder,
            offset: format!("/{name}"),
            indexer,
            tree,
            mode,
            normalizer,
            events,
            _watcher: watcher,
            rename_hints: Vec::new(),
            read_failures,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Root-relative path of the folder in both its own tree and the mirror
    pub fn offset(&self) -> &str {
        &self.offset
    }

    pub fn tree(&self) -> &IndexTree {
        &self.tree
    }

    pub fn mode(&self) -> LocalRefreshMode {
        self.mode
    }

    /// Returns and clears the renames observed since the last call
    pub fn take_rename_hints(&mut self) -> Vec<RenameHint> {
        std::mem::take(&mut self.rename_hints)
    }

    /// Returns and clears the local read failures absorbed since the last call
    pub fn take_read_failures(&mut self) -> Vec<SyncError> {
        std::mem::take(&mut self.read_failures)
    }

    /// Brings the tree up to date with the disk
    ///
    /// Returns the number of change records applied (0 in full-scan mode).
    #[tracing::instrument(skip(self), fields(folder = %self.folder.display()))]
    pub async fn refresh(&mut self) -> Result<usize, SyncError> {
        if self.mode == LocalRefreshMode::FullScan {
            self.tree = self
                .indexer
                .build(&self.folder, &mut self.read_failures)
                .await?;
            return Ok(0);
        }

        let (rescans, raw): (Vec<_>, Vec<_>) = self
            .drain_events()
            .into_iter()
            .partition(|event| matches!(event, RawFsEvent::Rescan(_)));
        for event in &rescans {
            warn!(path = %event.path().display(), "Watcher lost events, rescanning");
            self.flag_enclosing(event.path());
        }

        let mut records = self.normalizer.process_all(raw);
        records.extend(self.normalizer.flush_pending());

        let applied = records.len();
        for record in records {
            let touched: Vec<PathBuf> = match &record {
                ChangeRecord::MoveRename { from, to } => vec![from.clone(), to.clone()],
                other => vec![other.path().to_path_buf()],
            };
            let (kind, path) = (record.kind(), record.path().to_path_buf());
            if let Err(e) = self.apply(record).await {
                warn!(kind, path = %path.display(), error = %e, "Cannot apply change, rescanning parent");
                for path in &touched {
                    let parent = path.parent().unwrap_or(self.folder.as_path()).to_path_buf();
                    self.flag_enclosing(&parent);
                }
                self.read_failures.push(e);
            }
        }
        self.indexer
            .rescan_flagged(&mut self.tree, &self.folder, &mut self.read_failures)
            .await?;

        if applied > 0 {
            debug!(records = applied, "Applied local changes");
        }
        Ok(applied)
    }

    fn drain_events(&mut self) -> Vec<RawFsEvent> {
        let mut raw = Vec::new();
        let mut closed = false;

        if let Some(rx) = self.events.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => raw.push(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        }

        if closed {
            warn!(
                folder = %self.folder.display(),
                "Change events stopped, switching to full rescans"
            );
            self.events = None;
            self.mode = LocalRefreshMode::FullScan;
            // Anything the lost events described is picked up by a rescan.
            self.tree.mark_path_for_update(&self.folder.to_string_lossy());
        }
        raw
    }

    /// Flags the closest indexed folder at or above `dir`, falling back to
    /// the tracked folder itself
    fn flag_enclosing(&mut self, dir: &Path) {
        let folder = self.folder.clone();
        let flagged = dir
            .ancestors()
            .take_while(|d| d.starts_with(&folder))
            .any(|d| self.tree.mark_path_for_update(&d.to_string_lossy()));
        if !flagged {
            self.tree.mark_path_for_update(&folder.to_string_lossy());
        }
    }

    /// Tree key for an absolute local path inside the folder
    fn key(&self, path: &Path) -> Option<String> {
        if !path.starts_with(&self.folder) {
            debug!(path = %path.display(), "Ignoring event outside tracked folder");
            return None;
        }
        Some(path.to_string_lossy().into_owned())
    }

    async fn apply(&mut self, record: ChangeRecord) -> Result<(), SyncError> {
        match record {
            ChangeRecord::Upload { path } => self.refresh_path(&path).await,
            ChangeRecord::Remove { path } => {
                if let Some(key) = self.key(&path) {
                    self.tree.remove_path(&key);
                }
                Ok(())
            }
            ChangeRecord::MoveRename { from, to } => self.apply_move(&from, &to).await,
        }
    }

    /// Re-reads a single path into the tree
    async fn refresh_path(&mut self, path: &Path) -> Result<(), SyncError> {
        let Some(key) = self.key(path) else {
            return Ok(());
        };
        let state = self.state_of(path).await?;

        if state.is_directory() {
            self.tree.add_folder(&key);
            self.tree.mark_path_for_update(&key);
        } else if state.is_regular_file() {
            self.tree.add_file(&key, state.size);
        } else {
            // Gone, or a symlink or special file: never mirrored.
            self.tree.remove_path(&key);
        }
        Ok(())
    }

    async fn apply_move(&mut self, from: &Path, to: &Path) -> Result<(), SyncError> {
        let (Some(from_key), Some(to_key)) = (self.key(from), self.key(to)) else {
            // Moved across the folder boundary: treat as independent changes.
            if let Some(key) = self.key(from) {
                self.tree.remove_path(&key);
            }
            return self.refresh_path(to).await;
        };

        let node = self.tree.detach(&from_key);
        let moved = node.is_some();
        let state = self.state_of(to).await?;

        if !state.is_directory() && !state.is_regular_file() {
            debug!(to = %to.display(), "Move target vanished or is not indexable");
            return Ok(());
        }
        if state.is_directory() {
            match node {
                Some(folder @ IndexNode::Folder(_)) => self.tree.attach(&to_key, folder)?,
                _ => {
                    self.tree.add_folder(&to_key);
                }
            }
            self.tree.mark_path_for_update(&to_key);
        } else {
            self.tree.add_file(&to_key, state.size);
        }

        if moved {
            self.rename_hints.push(RenameHint {
                from: self.tree.relative_path(&from_key),
                to: self.tree.relative_path(&to_key),
            });
        }
        Ok(())
    }

    async fn state_of(&self, path: &Path) -> Result<FileSystemState, SyncError> {
        self.indexer
            .file_system()
            .get_state(path)
            .await
            .map_err(|cause| SyncError::LocalRead {
                path: path.to_path_buf(),
                cause,
            })
    }
}
