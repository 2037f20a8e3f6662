//! Test doubles shared by the unit tests of this crate

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::bail;
use autocloud_core::ports::{FileSystemState, ILocalFileSystem, LocalEntry};

use crate::filesystem::LocalFileSystemAdapter;

/// Real filesystem access, except for paths set to fail with EACCES
#[derive(Default)]
pub(crate) struct FlakyFileSystem {
    inner: LocalFileSystemAdapter,
    unlistable: Mutex<HashSet<PathBuf>>,
    unstatable: Mutex<HashSet<PathBuf>>,
}

impl FlakyFileSystem {
    /// `read_dir` of `path` fails
    pub(crate) fn fail_listing(&self, path: impl Into<PathBuf>) {
        self.unlistable.lock().unwrap().insert(path.into());
    }

    /// `get_state` of `path` fails
    pub(crate) fn fail_stat(&self, path: impl Into<PathBuf>) {
        self.unstatable.lock().unwrap().insert(path.into());
    }

    pub(crate) fn heal(&self, path: &Path) {
        self.unlistable.lock().unwrap().remove(path);
        self.unstatable.lock().unwrap().remove(path);
    }
}

fn check(set: &Mutex<HashSet<PathBuf>>, path: &Path) -> anyhow::Result<()> {
    if set.lock().unwrap().contains(path) {
        bail!("permission denied (os error 13)");
    }
    Ok(())
}

#[async_trait::async_trait]
impl ILocalFileSystem for FlakyFileSystem {
    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        check(&self.unstatable, path)?;
        self.inner.get_state(path).await
    }

    async fn read_dir(&self, path: &Path) -> anyhow::Result<Vec<LocalEntry>> {
        check(&self.unlistable, path)?;
        self.inner.read_dir(path).await
    }
}
