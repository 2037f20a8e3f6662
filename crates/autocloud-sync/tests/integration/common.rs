//! Shared helpers: an in-memory remote store and orchestrator fixtures

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use autocloud_core::config::LocalRefreshMode;
use autocloud_core::domain::{IndexNode, IndexTree, PathFilter};
use autocloud_core::ports::{
    FileSystemState, ILocalFileSystem, IRemoteStorage, LocalEntry, RemoteCredentials,
    RemoteEntry, RemoteStat,
};
use autocloud_sync::cache::MirrorCache;
use autocloud_sync::connection::ConnectionManager;
use autocloud_sync::filesystem::LocalFileSystemAdapter;
use autocloud_sync::indexer::LocalIndexer;
use autocloud_sync::normalizer::RawFsEvent;
use autocloud_sync::orchestrator::{SyncOptions, SyncOrchestrator};
use autocloud_sync::tracker::LocalTracker;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const REMOTE_ROOT: &str = "/AutoCloud";

// ============================================================================
// MemoryRemote
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    File(u64),
    Dir,
}

#[derive(Default)]
struct RemoteState {
    entries: BTreeMap<String, Entry>,
    calls: Vec<String>,
    offline: bool,
}

/// Remote store kept in memory, recording every call
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

fn is_below(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir)
        .is_some_and(|rest| rest.starts_with('/'))
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn insert_dir(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            state.entries.insert(current.clone(), Entry::Dir);
        }
    }

    pub fn insert_file(&self, path: &str, size: u64) {
        self.insert_dir(parent_of(path));
        self.state
            .lock()
            .unwrap()
            .entries
            .insert(path.to_string(), Entry::File(size));
    }

    /// Remote files and their sizes
    pub fn files(&self) -> BTreeMap<String, u64> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter_map(|(path, entry)| match entry {
                Entry::File(size) => Some((path.clone(), *size)),
                Entry::Dir => None,
            })
            .collect()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.state.lock().unwrap().entries.get(path) == Some(&Entry::Dir)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls whose operation name is `op`
    pub fn calls_of(&self, op: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, RemoteState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

#[async_trait::async_trait]
impl IRemoteStorage for MemoryRemote {
    async fn connect(&self, _credentials: &RemoteCredentials) -> anyhow::Result<()> {
        let state = self.record("connect".into());
        if state.offline {
            bail!("host unreachable");
        }
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.record("disconnect".into());
        Ok(())
    }

    async fn list(&self, path: &str) -> anyhow::Result<Vec<RemoteEntry>> {
        let state = self.record(format!("list {path}"));
        if path != "/" && state.entries.get(path) != Some(&Entry::Dir) {
            bail!("no such directory: {path}");
        }
        Ok(state
            .entries
            .iter()
            .filter(|(child, _)| parent_of(child) == path)
            .map(|(child, entry)| {
                let name = child.rsplit('/').next().unwrap_or_default();
                match entry {
                    Entry::File(size) => RemoteEntry::file(name, *size),
                    Entry::Dir => RemoteEntry::directory(name),
                }
            })
            .collect())
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> anyhow::Result<()> {
        let size = std::fs::metadata(local_path)?.len();
        let mut state = self.record(format!("put {remote_path}"));
        let parent = parent_of(remote_path);
        if parent != "/" && state.entries.get(parent) != Some(&Entry::Dir) {
            bail!("parent missing for {remote_path}");
        }
        state
            .entries
            .insert(remote_path.to_string(), Entry::File(size));
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> anyhow::Result<()> {
        let mut state = self.record(format!("delete {remote_path}"));
        match state.entries.get(remote_path) {
            Some(Entry::File(_)) => {
                state.entries.remove(remote_path);
                Ok(())
            }
            _ => Err(anyhow!("not a file: {remote_path}")),
        }
    }

    async fn rmdir(&self, remote_path: &str, recursive: bool) -> anyhow::Result<()> {
        let mut state = self.record(format!("rmdir {remote_path} {recursive}"));
        if state.entries.get(remote_path) != Some(&Entry::Dir) {
            bail!("not a directory: {remote_path}");
        }
        state
            .entries
            .retain(|path, _| path != remote_path && !is_below(path, remote_path));
        Ok(())
    }

    async fn mkdir(&self, remote_path: &str, recursive: bool) -> anyhow::Result<()> {
        drop(self.record(format!("mkdir {remote_path} {recursive}")));
        self.insert_dir(remote_path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        let state = self.record(format!("exists {path}"));
        Ok(path == "/" || state.entries.contains_key(path))
    }

    async fn stat(&self, path: &str) -> anyhow::Result<RemoteStat> {
        let state = self.record(format!("stat {path}"));
        match state.entries.get(path) {
            Some(Entry::File(size)) => Ok(RemoteStat {
                is_directory: false,
                size: *size,
            }),
            Some(Entry::Dir) => Ok(RemoteStat {
                is_directory: true,
                size: 0,
            }),
            None => Err(anyhow!("no such entry: {path}")),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> anyhow::Result<()> {
        let mut state = self.record(format!("rename {from} {to}"));
        if !state.entries.contains_key(from) {
            bail!("no such entry: {from}");
        }
        let moved: Vec<(String, Entry)> = state
            .entries
            .iter()
            .filter(|(path, _)| path.as_str() == from || is_below(path, from))
            .map(|(path, entry)| (format!("{to}{}", &path[from.len()..]), *entry))
            .collect();
        state
            .entries
            .retain(|path, _| path != from && !is_below(path, from));
        state.entries.extend(moved);
        Ok(())
    }
}

// ============================================================================
// DeniableFileSystem
// ============================================================================

/// Real local filesystem, except for paths whose access is denied
#[derive(Default)]
pub struct DeniableFileSystem {
    inner: LocalFileSystemAdapter,
    unlistable: Mutex<HashSet<PathBuf>>,
    unstatable: Mutex<HashSet<PathBuf>>,
}

impl DeniableFileSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny_listing(&self, path: &Path) {
        self.unlistable.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn deny_stat(&self, path: &Path) {
        self.unstatable.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn allow(&self, path: &Path) {
        self.unlistable.lock().unwrap().remove(path);
        self.unstatable.lock().unwrap().remove(path);
    }
}

fn denied(set: &Mutex<HashSet<PathBuf>>, path: &Path) -> anyhow::Result<()> {
    if set.lock().unwrap().contains(path) {
        bail!("permission denied (os error 13)");
    }
    Ok(())
}

#[async_trait::async_trait]
impl ILocalFileSystem for DeniableFileSystem {
    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        denied(&self.unstatable, path)?;
        self.inner.get_state(path).await
    }

    async fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<LocalEntry>> {
        denied(&self.unlistable, path)?;
        self.inner.read_dir(path).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A temp dir holding a watched folder `Docs` and a cache directory
pub struct Workspace {
    pub dir: TempDir,
    pub folder: PathBuf,
    pub cache_dir: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("Docs");
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&folder).unwrap();
        Self {
            dir,
            folder,
            cache_dir,
        }
    }

    /// Writes `len` bytes to `rel` below the watched folder
    pub fn write(&self, rel: &str, len: usize) -> PathBuf {
        self.write_in("Docs", rel, len)
    }

    /// Writes `len` bytes to `rel` below the sibling folder `name`
    pub fn write_in(&self, name: &str, rel: &str, len: usize) -> PathBuf {
        let path = self.dir.path().join(name).join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, vec![b'x'; len]).unwrap();
        path
    }

    pub fn cache(&self) -> MirrorCache {
        MirrorCache::in_dir(&self.cache_dir)
    }

    pub fn indexer(&self, max_depth: usize) -> LocalIndexer {
        self.indexer_over(Arc::new(LocalFileSystemAdapter::new()), max_depth)
    }

    pub fn indexer_over(&self, fs: Arc<dyn ILocalFileSystem>, max_depth: usize) -> LocalIndexer {
        LocalIndexer::new(fs, PathFilter::default(), max_depth)
    }

    /// Creates the sibling folder `name` and returns its path
    pub fn sibling(&self, name: &str) -> PathBuf {
        let folder = self.dir.path().join(name);
        std::fs::create_dir_all(&folder).unwrap();
        folder
    }
}

pub fn options() -> SyncOptions {
    SyncOptions {
        update_frequency: Duration::from_millis(50),
        ..SyncOptions::default()
    }
}

pub fn connection(remote: &Arc<MemoryRemote>) -> Arc<ConnectionManager> {
    Arc::new(
        ConnectionManager::new(remote.clone(), RemoteCredentials::default(), REMOTE_ROOT)
            .with_retry_delay(Duration::from_millis(20)),
    )
}

/// Orchestrator over one full-scan tracker of `ws.folder`
pub async fn orchestrator(
    ws: &Workspace,
    remote: &Arc<MemoryRemote>,
    options: SyncOptions,
) -> SyncOrchestrator {
    let folders = [ws.folder.clone()];
    orchestrator_over(ws, remote, options, &folders, Arc::new(LocalFileSystemAdapter::new())).await
}

/// Orchestrator over one full-scan tracker per folder, all reading through `fs`
pub async fn orchestrator_over(
    ws: &Workspace,
    remote: &Arc<MemoryRemote>,
    options: SyncOptions,
    folders: &[PathBuf],
    fs: Arc<dyn ILocalFileSystem>,
) -> SyncOrchestrator {
    let mut trackers = Vec::new();
    for folder in folders {
        let tracker = LocalTracker::start(
            folder,
            ws.indexer_over(fs.clone(), options.max_depth),
            LocalRefreshMode::FullScan,
        )
        .await
        .unwrap();
        trackers.push(tracker);
    }
    SyncOrchestrator::new(
        trackers,
        connection(remote),
        Arc::new(LocalFileSystemAdapter::new()),
        ws.cache(),
        options,
    )
}

/// Orchestrator whose single tracker is fed from the returned channel
pub async fn watched_orchestrator(
    ws: &Workspace,
    remote: &Arc<MemoryRemote>,
    options: SyncOptions,
) -> (SyncOrchestrator, mpsc::Sender<RawFsEvent>) {
    watched_orchestrator_over(ws, remote, options, Arc::new(LocalFileSystemAdapter::new())).await
}

/// Like [`watched_orchestrator`], with the tracker reading through `fs`
pub async fn watched_orchestrator_over(
    ws: &Workspace,
    remote: &Arc<MemoryRemote>,
    options: SyncOptions,
    fs: Arc<dyn ILocalFileSystem>,
) -> (SyncOrchestrator, mpsc::Sender<RawFsEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let tracker = LocalTracker::with_events(&ws.folder, ws.indexer_over(fs, options.max_depth), rx)
        .await
        .unwrap();
    let orchestrator = SyncOrchestrator::new(
        vec![tracker],
        connection(remote),
        Arc::new(LocalFileSystemAdapter::new()),
        ws.cache(),
        options,
    );
    (orchestrator, tx)
}

/// Size recorded in `tree` for the root-relative `rel`
pub fn size_in(tree: &IndexTree, rel: &str) -> Option<u64> {
    tree.get_folder_from_path(&tree.absolute_path(rel))
        .and_then(IndexNode::size)
}
