//! Reconciliation cycle
//!
//! The [`SyncOrchestrator`] mirrors every watched folder onto the remote
//! store. It never re-lists the remote during normal operation: the mirror is
//! a local [`IndexTree`] that is mutated after every successful remote
//! operation and persisted to the [`MirrorCache`].
//!
//! ## Cycle
//!
//! 1. **Refresh** every tracker (concurrently)
//! 2. **Diff** each local tree against the mirror at the folder's offset
//! 3. If nothing differs, stop without connecting
//! 4. **Connect**, bounded by the configured timeout if any
//! 5. **Reconcile** all folders and all paths concurrently
//! 6. **Persist** the mirror snapshot
//! 7. **Verify** with a second diff, reporting residual differences
//! 8. **Disconnect**
//!
//! Every `remote_relist_cycles` cycles the mirror is rebuilt from a full
//! remote listing before diffing.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use autocloud_core::config::SyncConfig;
use autocloud_core::domain::{diff, FolderNode, IndexNode, IndexTree, TreeDiff, DEFAULT_MAX_DEPTH};
use autocloud_core::ports::ILocalFileSystem;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::MirrorCache;
use crate::connection::ConnectionManager;
use crate::indexer::walk_remote;
use crate::tracker::{LocalTracker, RenameHint};
use crate::SyncError;

type TallyFuture<'a> = Pin<Box<dyn Future<Output = Tally> + Send + 'a>>;

// ============================================================================
// Options and report
// ============================================================================

/// Tunables of the sync loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub update_frequency: Duration,
    pub max_depth: usize,
    /// `None` lets a cycle wait for the connection indefinitely
    pub connect_timeout: Option<Duration>,
    /// Rebuild the mirror from the remote every N cycles (0 never)
    pub remote_relist_cycles: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            update_frequency: Duration::from_secs(60),
            max_depth: DEFAULT_MAX_DEPTH,
            connect_timeout: None,
            remote_relist_cycles: 0,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            update_frequency: Duration::from_secs(config.update_frequency),
            max_depth: config.max_depth,
            connect_timeout: (config.connect_timeout > 0)
                .then(|| Duration::from_secs(config.connect_timeout)),
            remote_relist_cycles: config.remote_relist_cycles,
        }
    }
}

/// Summary of one reconciliation cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// Files uploaded
    pub uploaded: usize,
    /// Remote files or folders removed
    pub removed: usize,
    /// Remote renames issued in place of remove + upload
    pub renamed: usize,
    /// Paths skipped because the local source had vanished
    pub skipped: usize,
    /// Non-fatal errors, one per failed path or phase
    pub errors: Vec<String>,
    /// Differences left after reconciliation, one entry per unfinished folder
    pub residual: Vec<TreeDiff>,
    pub duration_ms: u64,
    /// Whether a remote session was opened during the cycle
    pub connected: bool,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            uploaded: 0,
            removed: 0,
            renamed: 0,
            skipped: 0,
            errors: Vec::new(),
            residual: Vec::new(),
            duration_ms: 0,
            connected: false,
        }
    }

    /// Number of remote operations performed
    pub fn operations(&self) -> usize {
        self.uploaded + self.removed + self.renamed
    }

    /// True when the cycle had no errors and left nothing behind
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.residual.is_empty()
    }

    fn absorb(&mut self, tally: Tally) {
        self.uploaded += tally.uploaded;
        self.removed += tally.removed;
        self.renamed += tally.renamed;
        self.skipped += tally.skipped;
        self.errors.extend(tally.errors);
    }
}

/// Outcome of one or more path operations
#[derive(Debug, Default)]
struct Tally {
    uploaded: usize,
    removed: usize,
    renamed: usize,
    skipped: usize,
    errors: Vec<String>,
}

impl Tally {
    fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            errors: vec![error.to_string()],
            ..Self::default()
        }
    }

    fn merge(&mut self, other: Tally) {
        self.uploaded += other.uploaded;
        self.removed += other.removed;
        self.renamed += other.renamed;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}

/// Work found for one folder in a cycle
struct FolderPlan {
    index: usize,
    diff: TreeDiff,
    hints: Vec<RenameHint>,
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Drives reconciliation cycles for a set of watched folders
pub struct SyncOrchestrator {
    trackers: Vec<LocalTracker>,
    connection: Arc<ConnectionManager>,
    fs: Arc<dyn ILocalFileSystem>,
    /// Locked per mutation, never across an await
    mirror: Mutex<IndexTree>,
    cache: MirrorCache,
    options: SyncOptions,
    initialized: bool,
    cycles: u64,
}

impl SyncOrchestrator {
    pub fn new(
        trackers: Vec<LocalTracker>,
        connection: Arc<ConnectionManager>,
        fs: Arc<dyn ILocalFileSystem>,
        cache: MirrorCache,
        options: SyncOptions,
    ) -> Self {
        let mirror = IndexTree::with_base_path(connection.remote_root());
        Self {
            trackers,
            connection,
            fs,
            mirror: Mutex::new(mirror),
            cache,
            options,
            initialized: false,
            cycles: 0,
        }
    }

    /// Copy of the current mirror
    pub fn mirror(&self) -> IndexTree {
        self.lock_mirror().clone()
    }

    pub fn trackers(&self) -> &[LocalTracker] {
        &self.trackers
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn lock_mirror(&self) -> MutexGuard<'_, IndexTree> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_mirror<R>(&self, f: impl FnOnce(&mut IndexTree) -> R) -> R {
        f(&mut self.lock_mirror())
    }

    async fn open_session(&self) -> Result<(), SyncError> {
        match self.options.connect_timeout {
            Some(timeout) => self.connection.connect_within(timeout).await,
            None => {
                self.connection.connect().await;
                Ok(())
            }
        }
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Loads the mirror from the cache, or builds it from a remote listing
    ///
    /// A cached snapshot taken for a different remote root is ignored.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&mut self) -> Result<(), SyncError> {
        if let Some(cached) = self.cache.load().await {
            if cached.base_path() == Some(self.connection.remote_root()) {
                *self.lock_mirror() = cached;
                self.initialized = true;
                return Ok(());
            }
            warn!(
                cached_root = ?cached.base_path(),
                remote_root = %self.connection.remote_root(),
                "Mirror cache belongs to another remote root, ignoring it"
            );
        }

        self.open_session().await?;
        let listed = self.relist().await;
        self.connection.disconnect().await;
        listed?;

        self.initialized = true;
        Ok(())
    }

    /// Replaces the mirror with a full remote listing and persists it
    async fn relist(&self) -> Result<(), SyncError> {
        let tree = walk_remote(&self.connection, self.options.max_depth + 1).await?;
        *self.lock_mirror() = tree;
        self.persist().await;
        Ok(())
    }

    async fn persist(&self) {
        let snapshot = self.mirror();
        if let Err(e) = self.cache.store(&snapshot).await {
            warn!(error = %e, "Failed to persist mirror cache, keeping it in memory");
        }
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    /// Runs one full reconciliation cycle
    pub async fn run_cycle(&mut self) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::new();
        self.cycles += 1;

        if !self.initialized {
            if let Err(e) = self.initialize().await {
                error!(error = %e, "Cannot build remote mirror, cycle skipped");
                report.errors.push(format!("initialize: {e}"));
                return self.finish(report, start);
            }
        }

        // Refresh
        let refreshed = join_all(self.trackers.iter_mut().enumerate().map(|(index, tracker)| {
            async move {
                let result = tracker.refresh().await;
                // Hints of a failed refresh stay queued for the next one.
                let hints = match result {
                    Ok(_) => tracker.take_rename_hints(),
                    Err(_) => Vec::new(),
                };
                (index, result, hints, tracker.take_read_failures())
            }
        }))
        .await;

        let mut active = Vec::new();
        for (index, result, hints, failures) in refreshed {
            let folder = self.trackers[index].folder().display().to_string();
            for e in failures {
                warn!(folder = %folder, error = %e, "Part of the folder could not be read");
                report.errors.push(format!("refresh {folder}: {e}"));
            }
            match result {
                Ok(_) => active.push((index, hints)),
                Err(e) => {
                    warn!(folder = %folder, error = %e, "Local refresh failed, folder skipped");
                    report.errors.push(format!("refresh {folder}: {e}"));
                }
            }
        }

        // Periodic relist
        let relist_due = self.options.remote_relist_cycles > 0
            && self.cycles % u64::from(self.options.remote_relist_cycles) == 0;
        if relist_due {
            info!(cycle = self.cycles, "Rebuilding mirror from remote listing");
            if let Err(e) = self.open_session().await {
                return self.abort(report, start, e).await;
            }
            report.connected = true;
            if let Err(e) = self.relist().await {
                warn!(error = %e, "Remote relist failed, keeping current mirror");
                report.errors.push(format!("relist: {e}"));
            }
        }

        // Diff
        let plans: Vec<FolderPlan> = active
            .into_iter()
            .filter_map(|(index, hints)| {
                let tracker = &self.trackers[index];
                let diff = diff(tracker.tree(), &self.lock_mirror(), Some(tracker.offset()));
                if diff.is_empty() {
                    debug!(folder = %tracker.offset(), "Folder is up to date");
                    None
                } else {
                    info!(
                        folder = %tracker.offset(),
                        missing = diff.missing_paths.len(),
                        extra = diff.extra_paths.len(),
                        "Folder differs from mirror"
                    );
                    Some(FolderPlan { index, diff, hints })
                }
            })
            .collect();

        if plans.is_empty() {
            if report.connected {
                self.connection.disconnect().await;
            }
            return self.finish(report, start);
        }

        // Connect
        if let Err(e) = self.open_session().await {
            return self.abort(report, start, e).await;
        }
        report.connected = true;

        // Reconcile
        let tallies = join_all(plans.iter().map(|plan| {
            self.reconcile_folder(&self.trackers[plan.index], &plan.diff, &plan.hints)
        }))
        .await;
        for tally in tallies {
            report.absorb(tally);
        }

        self.persist().await;

        // Verify
        for plan in &plans {
            let tracker = &self.trackers[plan.index];
            let residual = diff(tracker.tree(), &self.lock_mirror(), Some(tracker.offset()));
            if !residual.is_empty() {
                error!(
                    folder = %tracker.offset(),
                    detail = %residual,
                    "Sync incomplete"
                );
                report.residual.push(residual);
            }
        }

        self.connection.disconnect().await;
        self.finish(report, start)
    }

    async fn abort(&self, mut report: CycleReport, start: Instant, e: SyncError) -> CycleReport {
        warn!(error = %e, "Remote unavailable, cycle aborted");
        report.errors.push(format!("connect: {e}"));
        self.connection.disconnect().await;
        self.finish(report, start)
    }

    fn finish(&self, mut report: CycleReport, start: Instant) -> CycleReport {
        report.duration_ms = start.elapsed().as_millis() as u64;
        if report.connected {
            info!(
                uploaded = report.uploaded,
                removed = report.removed,
                renamed = report.renamed,
                skipped = report.skipped,
                errors = report.errors.len(),
                residual = report.residual.len(),
                duration_ms = report.duration_ms,
                "Sync cycle complete"
            );
        } else {
            debug!(duration_ms = report.duration_ms, "Sync cycle complete, nothing to do");
        }
        report
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Applies one folder's diff to the remote, all paths concurrently
    async fn reconcile_folder(
        &self,
        tracker: &LocalTracker,
        diff: &TreeDiff,
        hints: &[RenameHint],
    ) -> Tally {
        let tree = tracker.tree();
        let replaced: HashSet<&str> = diff.replaced_paths().into_iter().collect();

        let renames: Vec<&RenameHint> = hints
            .iter()
            .filter(|hint| {
                !replaced.contains(hint.from.as_str())
                    && !replaced.contains(hint.to.as_str())
                    && diff.extra_paths.contains(&hint.from)
                    && diff.missing_paths.contains(&hint.to)
                    && self.rename_matches(tree, hint)
            })
            .collect();
        let renamed_from: HashSet<&str> = renames.iter().map(|h| h.from.as_str()).collect();
        let renamed_to: HashSet<&str> = renames.iter().map(|h| h.to.as_str()).collect();

        let uploads = diff
            .missing_paths
            .iter()
            .map(String::as_str)
            .filter(|p| !replaced.contains(p) && !renamed_to.contains(p));
        let removals = diff
            .extra_paths
            .iter()
            .map(String::as_str)
            .filter(|p| !replaced.contains(p) && !renamed_from.contains(p));

        let (renamed, replacements, uploaded, removed) = tokio::join!(
            join_all(renames.iter().map(|hint| self.rename_remote(tree, hint))),
            join_all(replaced.iter().map(|rel| self.replace_remote(tree, rel))),
            join_all(uploads.map(|rel| self.upload_path(tree, rel))),
            join_all(removals.map(|rel| self.remove_remote(rel))),
        );

        let mut tally = Tally::default();
        for outcome in renamed
            .into_iter()
            .chain(replacements)
            .chain(uploaded)
            .chain(removed)
        {
            tally.merge(outcome);
        }
        tally
    }

    /// True when the mirror node at `from` equals the local node at `to`
    fn rename_matches(&self, tree: &IndexTree, hint: &RenameHint) -> bool {
        let local = tree.get_folder_from_path(&tree.absolute_path(&hint.to));
        let mirror = self.lock_mirror();
        let remote = mirror.get_folder_from_path(&mirror.absolute_path(&hint.from));
        matches!((local, remote), (Some(l), Some(r)) if l == r)
    }

    async fn rename_remote(&self, tree: &IndexTree, hint: &RenameHint) -> Tally {
        match self.connection.rename(&hint.from, &hint.to).await {
            Ok(()) => {
                self.with_mirror(|m| -> Result<(), SyncError> {
                    let from = m.absolute_path(&hint.from);
                    if let Some(node) = m.detach(&from) {
                        let to = m.absolute_path(&hint.to);
                        m.attach(&to, node)?;
                    }
                    Ok(())
                })
                .map_or_else(Tally::failed, |()| Tally {
                    renamed: 1,
                    ..Tally::default()
                })
            }
            Err(e) => {
                warn!(from = %hint.from, to = %hint.to, error = %e, "Remote rename failed, re-uploading");
                let mut tally = self.remove_remote(&hint.from).await;
                tally.merge(self.upload_path(tree, &hint.to).await);
                tally
            }
        }
    }

    /// Replaces a remote entry of the wrong kind: remove first, then upload
    async fn replace_remote(&self, tree: &IndexTree, rel: &str) -> Tally {
        let mut tally = self.remove_remote(rel).await;
        if !tally.errors.is_empty() {
            return tally;
        }
        tally.merge(self.upload_path(tree, rel).await);
        tally
    }

    async fn remove_remote(&self, rel: &str) -> Tally {
        match self.connection.remove(rel).await {
            Ok(kind) => {
                debug!(path = %rel, ?kind, "Removed remote entry");
            }
            Err(e) => match self.connection.exists(rel).await {
                Ok(false) => debug!(path = %rel, "Remote entry already absent"),
                _ => {
                    warn!(path = %rel, error = %e, "Remote removal failed");
                    return Tally::failed(e);
                }
            },
        }

        self.with_mirror(|m| {
            let key = m.absolute_path(rel);
            m.remove_path(&key)
        });
        Tally {
            removed: 1,
            ..Tally::default()
        }
    }

    /// Uploads the local node at `rel`, recursing into folders
    fn upload_path<'a>(&'a self, tree: &'a IndexTree, rel: &'a str) -> TallyFuture<'a> {
        Box::pin(async move {
            let key = tree.absolute_path(rel);
            match tree.get_folder_from_path(&key) {
                Some(IndexNode::File(_)) => self.upload_file(PathBuf::from(&key), rel).await,
                Some(IndexNode::Folder(folder)) => self.upload_folder(tree, rel, folder).await,
                None => {
                    warn!(path = %rel, "Path left the local index before upload, skipped");
                    Tally {
                        skipped: 1,
                        ..Tally::default()
                    }
                }
            }
        })
    }

    async fn upload_file(&self, local: PathBuf, rel: &str) -> Tally {
        let state = match self.fs.get_state(&local).await {
            Ok(state) if state.is_regular_file() => state,
            Ok(_) => {
                let e = SyncError::LocalPathMissing(local);
                warn!(path = %rel, error = %e, "Upload skipped");
                return Tally {
                    skipped: 1,
                    ..Tally::default()
                };
            }
            Err(cause) => {
                return Tally::failed(SyncError::LocalRead { path: local, cause });
            }
        };

        if let Err(e) = self.connection.upload_file(&local, rel).await {
            warn!(path = %rel, error = %e, "Upload failed");
            return Tally::failed(e);
        }

        self.with_mirror(|m| {
            let key = m.absolute_path(rel);
            m.add_file(&key, state.size);
        });
        debug!(path = %rel, size = state.size, "Uploaded file");
        Tally {
            uploaded: 1,
            ..Tally::default()
        }
    }

    async fn upload_folder(&self, tree: &IndexTree, rel: &str, folder: &FolderNode) -> Tally {
        if let Err(e) = self.connection.make_folder(rel).await {
            warn!(path = %rel, error = %e, "Cannot create remote folder");
            return Tally::failed(e);
        }

        let mut tally = Tally::default();
        if folder.max_depth_reached {
            let attached = self.with_mirror(|m| {
                let key = m.absolute_path(rel);
                m.attach(&key, IndexNode::Folder(FolderNode::depth_limited()))
            });
            if let Err(e) = attached {
                tally.errors.push(e.to_string());
            }
            return tally;
        }

        self.with_mirror(|m| {
            let key = m.absolute_path(rel);
            m.add_folder(&key);
        });

        for name in folder.children.keys() {
            let child = format!("{}/{}", rel.trim_end_matches('/'), name);
            tally.merge(self.upload_path(tree, &child).await);
        }
        tally
    }

    // ========================================================================
    // Loop
    // ========================================================================

    /// Runs cycles every `update_frequency` until `shutdown` is cancelled
    ///
    /// Cancellation interrupts a cycle in progress; the cache keeps the
    /// mirror as of the last persisted cycle.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            folders = self.trackers.len(),
            every_secs = self.options.update_frequency.as_secs(),
            "Sync loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                report = self.run_cycle() => {
                    if !report.is_clean() {
                        debug!(errors = ?report.errors, "Cycle finished with errors");
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.options.update_frequency) => {}
            }
        }

        self.connection.disconnect().await;
        info!("Sync loop stopped");
    }
}
