//! Path exclusion rules shared by the indexer and the change normalizer

use std::path::{Path, PathBuf};

use super::index_tree::HIDDEN_METADATA_NAME;

/// Decides which local paths are never indexed or synced.
///
/// - `hidden_names` match any single path component (`.DS_Store`, `Thumbs.db`).
/// - `excluded` entries that are absolute match as path prefixes; relative
///   entries match any component with that name (`node_modules`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    hidden_names: Vec<String>,
    excluded: Vec<PathBuf>,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            hidden_names: vec![HIDDEN_METADATA_NAME.to_string()],
            excluded: Vec::new(),
        }
    }
}

impl PathFilter {
    pub fn new(hidden_names: Vec<String>, excluded: Vec<PathBuf>) -> Self {
        let mut hidden_names = hidden_names;
        if !hidden_names.iter().any(|n| n == HIDDEN_METADATA_NAME) {
            hidden_names.push(HIDDEN_METADATA_NAME.to_string());
        }
        Self {
            hidden_names,
            excluded,
        }
    }

    /// Returns true if `path` should be skipped
    pub fn is_ignored(&self, path: &Path) -> bool {
        let hidden = path.components().any(|c| {
            let name = c.as_os_str();
            self.hidden_names.iter().any(|h| name == h.as_str())
        });
        if hidden {
            return true;
        }

        self.excluded.iter().any(|excluded| {
            if excluded.is_absolute() {
                path.starts_with(excluded)
            } else {
                path.components()
                    .any(|c| c.as_os_str() == excluded.as_os_str())
            }
        })
    }

    pub fn hidden_names(&self) -> &[String] {
        &self.hidden_names
    }
}
