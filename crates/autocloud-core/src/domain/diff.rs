//! Tree difference computation
//!
//! [`diff`] compares a source tree `a` against a target tree `b` and reports
//! what the target lacks (`missing_paths`) and what it has in excess
//! (`extra_paths`). Only presence, node kind and file size are compared.
//!
//! ## Rules
//!
//! - A key present in `a` and absent in `b` is missing; its subtree is not
//!   descended.
//! - A key whose kind differs (file vs folder) is reported in both lists, so
//!   the caller can replace the target entry as one operation.
//! - Two files with different sizes are reported as missing only.
//! - Every sibling at every level is compared; descending into one folder
//!   never cuts the loop over the remaining children short.
//! - Folders flagged `max_depth_reached` or `unreadable` on either side are
//!   not descended.

use std::fmt;

use super::index_tree::{FolderNode, IndexNode, IndexTree};

/// Result of comparing two index trees
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Paths present in the source that the target lacks or holds differently
    pub missing_paths: Vec<String>,
    /// Paths present in the target that the source lacks or holds as another kind
    pub extra_paths: Vec<String>,
}

impl TreeDiff {
    /// True when the two trees agree
    pub fn is_empty(&self) -> bool {
        self.missing_paths.is_empty() && self.extra_paths.is_empty()
    }

    /// Total number of reported paths
    pub fn len(&self) -> usize {
        self.missing_paths.len() + self.extra_paths.len()
    }

    /// Paths reported in both lists, i.e. file/folder kind mismatches
    pub fn replaced_paths(&self) -> Vec<&str> {
        self.missing_paths
            .iter()
            .filter(|p| self.extra_paths.contains(p))
            .map(String::as_str)
            .collect()
    }
}

impl fmt::Display for TreeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "missing: [{}], extra: [{}]",
            self.missing_paths.join(", "),
            self.extra_paths.join(", ")
        )
    }
}

/// Compares `a` against `b`, optionally restricted to the subtree at `offset`.
///
/// `offset` is a root-relative path resolved in each tree independently; a
/// tree that lacks it is treated as holding an empty folder there. Reported
/// paths are root-relative, include the offset, and are sorted.
pub fn diff(a: &IndexTree, b: &IndexTree, offset: Option<&str>) -> TreeDiff {
    let segments: Vec<&str> = offset
        .unwrap_or("")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let prefix = if segments.is_empty() {
        String::new()
    } else {
        format!("/{}", segments.join("/"))
    };

    let mut out = TreeDiff::default();
    let empty = FolderNode::default();

    match (resolve(a.root(), &segments), resolve(b.root(), &segments)) {
        (None, None) => {}
        (Some(IndexNode::Folder(fa)), Some(IndexNode::Folder(fb))) => {
            compare_folders(fa, fb, &prefix, &mut out)
        }
        (Some(IndexNode::Folder(fa)), None) => compare_folders(fa, &empty, &prefix, &mut out),
        (None, Some(IndexNode::Folder(fb))) => compare_folders(&empty, fb, &prefix, &mut out),
        (Some(IndexNode::File(fa)), Some(IndexNode::File(fb))) => {
            if fa.size != fb.size {
                out.missing_paths.push(prefix);
            }
        }
        (Some(IndexNode::File(_)), None) => out.missing_paths.push(prefix),
        (None, Some(IndexNode::File(_))) => out.extra_paths.push(prefix),
        (Some(_), Some(_)) => {
            out.missing_paths.push(prefix.clone());
            out.extra_paths.push(prefix);
        }
    }

    out.missing_paths.sort();
    out.extra_paths.sort();
    out
}

fn resolve<'t>(root: &'t IndexNode, segments: &[&str]) -> Option<&'t IndexNode> {
    let mut node = root;
    for segment in segments {
        node = node.as_folder()?.children.get(*segment)?;
    }
    Some(node)
}

fn compare_folders(a: &FolderNode, b: &FolderNode, prefix: &str, out: &mut TreeDiff) {
    if a.max_depth_reached || b.max_depth_reached || a.unreadable || b.unreadable {
        return;
    }

    for (name, a_child) in &a.children {
        let path = format!("{prefix}/{name}");
        match (a_child, b.children.get(name)) {
            (_, None) => out.missing_paths.push(path),
            (IndexNode::Folder(fa), Some(IndexNode::Folder(fb))) => {
                compare_folders(fa, fb, &path, out);
            }
            (IndexNode::File(fa), Some(IndexNode::File(fb))) => {
                if fa.size != fb.size {
                    out.missing_paths.push(path);
                }
            }
            (_, Some(_)) => out.missing_paths.push(path),
        }
    }

    for (name, b_child) in &b.children {
        match a.children.get(name) {
            None => out.extra_paths.push(format!("{prefix}/{name}")),
            Some(a_child) if a_child.kind() != b_child.kind() => {
                out.extra_paths.push(format!("{prefix}/{name}"))
            }
            Some(_) => {}
        }
    }
}
