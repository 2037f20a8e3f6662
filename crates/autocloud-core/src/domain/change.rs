//! Semantic local change records

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A normalized local filesystem change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeRecord {
    /// Content changed, or the path appeared with no rename partner
    Upload { path: PathBuf },
    /// The path disappeared and was not paired with an appearance
    Remove { path: PathBuf },
    /// The path disappeared from `from` and reappeared at `to`
    MoveRename { from: PathBuf, to: PathBuf },
}

impl ChangeRecord {
    /// The path whose current state the record describes
    pub fn path(&self) -> &Path {
        match self {
            ChangeRecord::Upload { path } | ChangeRecord::Remove { path } => path,
            ChangeRecord::MoveRename { to, .. } => to,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeRecord::Upload { .. } => "upload",
            ChangeRecord::Remove { .. } => "remove",
            ChangeRecord::MoveRename { .. } => "move_rename",
        }
    }
}
