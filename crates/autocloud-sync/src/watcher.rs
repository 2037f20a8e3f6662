//! Recursive folder watching
//!
//! Wraps the `notify` crate and reduces OS events to the two signals the
//! [`LocalChangeNormalizer`](crate::normalizer::LocalChangeNormalizer)
//! understands, delivered over a tokio channel.
//!
//! When the OS reports dropped events (a `Rescan` flag) or the watcher
//! itself errors, a [`RawFsEvent::Rescan`] for the watched folder is sent
//! instead so the tracker re-reads it.
//!
//! ```text
//! inotify / FSEvents / kqueue
//!       │
//!       ▼
//!  FolderWatcher  ──→  mpsc::channel<RawFsEvent>  ──→  LocalTracker
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::normalizer::RawFsEvent;

/// Capacity of the event channel between the OS callback and the tracker
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Watches one folder recursively for changes
///
/// Dropping the watcher stops the OS watch and closes the channel.
pub struct FolderWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl std::fmt::Debug for FolderWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderWatcher")
            .field("path", &self.path)
            .finish()
    }
}

impl FolderWatcher {
    /// Starts a recursive watch on `path`
    ///
    /// Returns the watcher and a receiver that yields [`RawFsEvent`]s.
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created or the path
    /// cannot be watched (missing, permissions, inotify limit).
    pub fn start(path: &Path) -> Result<(Self, mpsc::Receiver<RawFsEvent>)> {
        let (tx, rx) = mpsc::channel::<RawFsEvent>(EVENT_CHANNEL_CAPACITY);
        let root = path.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                let raws = match res {
                    Ok(event) => map_notify_event(&event, &root, |p| p.exists()),
                    Err(err) => vec![map_notify_error(&err, &root)],
                };
                for raw in raws {
                    if let Err(e) = tx.blocking_send(raw) {
                        warn!(error = %e, "Failed to send change event (receiver dropped)");
                    }
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(path, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", path.display()))?;

        info!(path = %path.display(), "Started recursive watch");

        Ok((
            Self {
                _watcher: watcher,
                path: path.to_path_buf(),
            },
            rx,
        ))
    }

    /// The watched folder
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Converts a `notify::Event` into raw change signals
///
/// Maps the notify event kinds as follows:
/// - `Modify(Data(*))` and other content-level `Modify(*)` -> `ContentChanged`
/// - `Create(*)`, `Remove(*)`, `Modify(Name(*))` -> `NameChanged` for each path,
///   with `exists` taken from the `exists` callback
/// - `Modify(Metadata(*))`, `Access(*)` and unknown kinds are ignored
///
/// A `Modify(Name(Both))` event carrying two paths yields one signal per
/// path, old path first, so the normalizer sees a disappearance followed by
/// an appearance.
///
/// Any event flagged `Rescan` yields a single `Rescan(root)`.
fn map_notify_event<F>(event: &notify::Event, root: &Path, exists: F) -> Vec<RawFsEvent>
where
    F: Fn(&Path) -> bool,
{
    if event.need_rescan() {
        warn!(root = %root.display(), "Watcher dropped events, requesting rescan");
        return vec![RawFsEvent::Rescan(root.to_path_buf())];
    }

    let name_changed = |path: &PathBuf| RawFsEvent::NameChanged {
        path: path.clone(),
        exists: exists(path),
    };

    match &event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
                debug!(paths = ?event.paths, "Mapped rename event");
            }
            event.paths.iter().map(name_changed).collect()
        }

        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),

        EventKind::Modify(_) => {
            let Some(path) = event.paths.first() else {
                return Vec::new();
            };
            debug!(path = %path.display(), "Mapped content change");
            vec![RawFsEvent::ContentChanged(path.clone())]
        }

        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    }
}

/// A watcher error means events may have been lost under `root`
fn map_notify_error(err: &notify::Error, root: &Path) -> RawFsEvent {
    error!(error = %err, paths = ?err.paths, "File watcher error, requesting rescan");
    RawFsEvent::Rescan(root.to_path_buf())
}
