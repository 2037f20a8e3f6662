//! Raw filesystem events to semantic change records
//!
//! OS watchers report two kinds of signal: "the content of P changed" and
//! "the name or existence of P changed". The second is ambiguous: it fires
//! for creations, deletions and both halves of a rename. The
//! [`LocalChangeNormalizer`] resolves it with a pending-removal stack:
//!
//! - a disappearance is pushed onto the stack, since it may be the first
//!   half of a rename;
//! - an appearance pops the most recent disappearance and pairs the two as a
//!   [`ChangeRecord::MoveRename`] when they look related (same parent folder,
//!   or same file name), otherwise it is an [`ChangeRecord::Upload`];
//! - whatever is left on the stack after an appearance is flushed as
//!   [`ChangeRecord::Remove`].
//!
//! Pairing is last-in-first-out. Bursts of simultaneous renames can be
//! mis-paired; the reconciler still converges because a wrong pairing only
//! changes which remote calls are used, not the target state.
//!
//! The relatedness check is a deliberate departure from plain
//! pop-and-pair: a popped disappearance whose parent folder and file name
//! both differ from the appearance is not treated as a rename. The
//! appearance becomes an upload and the disappearance a removal, which costs
//! a transfer but never renames an unrelated remote file.
//!
//! [`RawFsEvent::Rescan`] carries no change of its own and yields no
//! records; the tracker acts on it before normalizing.

use std::path::{Path, PathBuf};

use autocloud_core::domain::{ChangeRecord, PathFilter};
use tracing::{debug, trace};

/// An unprocessed notification from the OS watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFsEvent {
    /// File content was written
    ContentChanged(PathBuf),
    /// The path was created, removed or renamed. `exists` is sampled when
    /// the event is observed.
    NameChanged { path: PathBuf, exists: bool },
    /// Events under the path were lost (queue overflow, watcher error) and
    /// its contents must be re-read
    Rescan(PathBuf),
}

impl RawFsEvent {
    pub fn path(&self) -> &Path {
        match self {
            RawFsEvent::ContentChanged(path)
            | RawFsEvent::NameChanged { path, .. }
            | RawFsEvent::Rescan(path) => path,
        }
    }
}

/// Per-folder normalizer holding the pending-removal stack
#[derive(Debug, Default)]
pub struct LocalChangeNormalizer {
    filter: PathFilter,
    pending_removals: Vec<PathBuf>,
}

impl LocalChangeNormalizer {
    pub fn new(filter: PathFilter) -> Self {
        Self {
            filter,
            pending_removals: Vec::new(),
        }
    }

    /// Number of disappearances waiting for a partner
    pub fn pending_count(&self) -> usize {
        self.pending_removals.len()
    }

    /// Feeds one raw event and returns the records it resolves
    pub fn process(&mut self, event: RawFsEvent) -> Vec<ChangeRecord> {
        if self.filter.is_ignored(event.path()) {
            trace!(path = %event.path().display(), "Ignoring filtered path");
            return Vec::new();
        }

        match event {
            RawFsEvent::ContentChanged(path) => vec![ChangeRecord::Upload { path }],
            RawFsEvent::NameChanged {
                path,
                exists: false,
            } => {
                debug!(path = %path.display(), "Path disappeared, holding for rename pairing");
                self.pending_removals.push(path);
                Vec::new()
            }
            RawFsEvent::NameChanged { path, exists: true } => self.resolve_appearance(path),
            RawFsEvent::Rescan(path) => {
                trace!(path = %path.display(), "Rescan signal has no change record");
                Vec::new()
            }
        }
    }

    /// Feeds a batch of events in order
    pub fn process_all<I>(&mut self, events: I) -> Vec<ChangeRecord>
    where
        I: IntoIterator<Item = RawFsEvent>,
    {
        events
            .into_iter()
            .flat_map(|event| self.process(event))
            .collect()
    }

    /// Turns every unpaired disappearance into a removal and clears the stack
    pub fn flush_pending(&mut self) -> Vec<ChangeRecord> {
        self.pending_removals
            .drain(..)
            .map(|path| ChangeRecord::Remove { path })
            .collect()
    }

    fn resolve_appearance(&mut self, path: PathBuf) -> Vec<ChangeRecord> {
        let mut records = Vec::new();

        match self.pending_removals.pop() {
            Some(from) if is_rename_pair(&from, &path) => {
                debug!(from = %from.display(), to = %path.display(), "Paired rename");
                records.push(ChangeRecord::MoveRename { from, to: path });
            }
            Some(unrelated) => {
                records.push(ChangeRecord::Upload { path });
                self.pending_removals.push(unrelated);
            }
            None => records.push(ChangeRecord::Upload { path }),
        }

        records.extend(self.flush_pending());
        records
    }
}

fn is_rename_pair(from: &Path, to: &Path) -> bool {
    from.parent() == to.parent() || from.file_name() == to.file_name()
}
