//! Hierarchical directory index
//!
//! An [`IndexTree`] is an in-memory snapshot of a directory: folders hold a
//! name-keyed map of children, files hold only their size. The same type
//! models a watched local folder and the remote mirror.
//!
//! ## Design Notes
//!
//! - Paths are `/`-separated strings. A tree's `base_path` is stripped from
//!   absolute paths before resolution, and empty segments are discarded, so
//!   `/base//a/b/` and `a/b` address the same node.
//! - Children live in a `BTreeMap`, which keeps snapshots and diff output in
//!   a stable order.
//! - The node enum is serialized untagged: a JSON object with a `children`
//!   key is a folder, anything with only a `size` is a file.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// File name that is never recorded in an index (Finder metadata).
pub const HIDDEN_METADATA_NAME: &str = ".DS_Store";

/// Recursion limit used when walking a directory to build a tree.
pub const DEFAULT_MAX_DEPTH: usize = 30;

// ============================================================================
// Nodes
// ============================================================================

/// Kind of an index node, used when comparing two trees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
}

/// A leaf entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Size in bytes
    pub size: u64,
}

/// A directory entry with its children
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    /// Set when the folder's contents are known to be stale and must be re-read
    #[serde(rename = "needsUpdate", default)]
    pub needs_update: bool,

    /// Set when a walk stopped at this folder because of the depth limit.
    /// Such folders are never descended into when diffing.
    #[serde(
        rename = "maxDepthReached",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub max_depth_reached: bool,

    /// Set when the folder could not be listed. Its contents are unknown, so
    /// diffing never descends into it; `needs_update` stays set for a retry.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unreadable: bool,

    pub children: BTreeMap<String, IndexNode>,
}

impl FolderNode {
    /// Creates the sentinel folder that stands in for a subtree beyond the depth limit
    pub fn depth_limited() -> Self {
        Self {
            max_depth_reached: true,
            ..Self::default()
        }
    }

    /// Creates the sentinel for a folder whose listing failed
    pub fn unreadable() -> Self {
        Self {
            needs_update: true,
            unreadable: true,
            ..Self::default()
        }
    }
}

/// Either a file or a folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexNode {
    Folder(FolderNode),
    File(FileNode),
}

impl Default for IndexNode {
    fn default() -> Self {
        IndexNode::Folder(FolderNode::default())
    }
}

impl IndexNode {
    pub fn file(size: u64) -> Self {
        IndexNode::File(FileNode { size })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            IndexNode::Folder(_) => NodeKind::Folder,
            IndexNode::File(_) => NodeKind::File,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, IndexNode::File(_))
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, IndexNode::Folder(_))
    }

    /// File size, or `None` for folders
    pub fn size(&self) -> Option<u64> {
        match self {
            IndexNode::File(file) => Some(file.size),
            IndexNode::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&FolderNode> {
        match self {
            IndexNode::Folder(folder) => Some(folder),
            IndexNode::File(_) => None,
        }
    }

    pub fn as_folder_mut(&mut self) -> Option<&mut FolderNode> {
        match self {
            IndexNode::Folder(folder) => Some(folder),
            IndexNode::File(_) => None,
        }
    }

    /// Returns this node as a folder, replacing a file with an empty folder first
    fn make_folder(&mut self) -> &mut FolderNode {
        if self.is_file() {
            *self = IndexNode::Folder(FolderNode::default());
        }
        match self {
            IndexNode::Folder(folder) => folder,
            IndexNode::File(_) => unreachable!("file node was replaced above"),
        }
    }

    fn count(&self, files: &mut usize, folders: &mut usize) {
        match self {
            IndexNode::File(_) => *files += 1,
            IndexNode::Folder(folder) => {
                *folders += 1;
                for child in folder.children.values() {
                    child.count(files, folders);
                }
            }
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Plain serializable form of an [`IndexTree`], also the cache file layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub index: IndexNode,
    #[serde(rename = "basePath")]
    pub base_path: Option<String>,
}

// ============================================================================
// IndexTree
// ============================================================================

/// A rooted directory index with an optional absolute base path
///
/// `Clone` produces a deep, independent copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexTree {
    root: IndexNode,
    base_path: Option<String>,
}

impl IndexTree {
    /// Creates an empty tree with no base path
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tree whose paths are resolved relative to `base_path`
    pub fn with_base_path(base_path: impl Into<String>) -> Self {
        Self {
            root: IndexNode::default(),
            base_path: Some(base_path.into()),
        }
    }

    pub fn base_path(&self) -> Option<&str> {
        self.base_path.as_deref()
    }

    /// The root folder node
    pub fn root(&self) -> &IndexNode {
        &self.root
    }

    /// Strips the base path from `path` when it is a proper prefix
    fn strip_base<'p>(&self, path: &'p str) -> &'p str {
        let Some(base) = self.base_path.as_deref() else {
            return path;
        };
        let base = base.trim_end_matches('/');
        if base.is_empty() {
            return path;
        }
        match path.strip_prefix(base) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => path,
        }
    }

    /// Splits a path into root-relative segments
    pub fn segments<'p>(&self, path: &'p str) -> Vec<&'p str> {
        self.strip_base(path)
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect()
    }

    /// Normalizes a path to its root-relative `/a/b` form (`/` for the root)
    pub fn relative_path(&self, path: &str) -> String {
        format!("/{}", self.segments(path).join("/"))
    }

    /// Joins a root-relative path onto the base path.
    ///
    /// Resolving the result always lands on `rel`, even when the first
    /// segment of `rel` happens to equal the base path.
    pub fn absolute_path(&self, rel: &str) -> String {
        let rel = rel.trim_start_matches('/');
        match self.base_path.as_deref().map(|b| b.trim_end_matches('/')) {
            Some(base) if !base.is_empty() => format!("{base}/{rel}"),
            _ => format!("/{rel}"),
        }
    }

    /// Walks (and creates) the folder chain below `start`
    fn ensure_chain<'n>(start: &'n mut IndexNode, segments: &[&str]) -> &'n mut FolderNode {
        let mut current = start.make_folder();
        for segment in segments {
            current = current
                .children
                .entry((*segment).to_string())
                .or_default()
                .make_folder();
        }
        current
    }

    fn node_mut(&mut self, segments: &[&str]) -> Option<&mut IndexNode> {
        let mut node = &mut self.root;
        for segment in segments {
            node = node.as_folder_mut()?.children.get_mut(*segment)?;
        }
        Some(node)
    }

    /// Inserts or overwrites a file, creating missing ancestor folders.
    ///
    /// Paths that contain [`HIDDEN_METADATA_NAME`], or that resolve to the
    /// root, are ignored.
    pub fn add_file(&mut self, path: &str, size: u64) {
        let segments = self.segments(path);
        if segments.iter().any(|s| *s == HIDDEN_METADATA_NAME) {
            return;
        }
        let Some((leaf, parents)) = segments.split_last() else {
            return;
        };
        let folder = Self::ensure_chain(&mut self.root, parents);
        folder
            .children
            .insert((*leaf).to_string(), IndexNode::file(size));
    }

    /// Ensures the folder chain for `path` exists and returns the terminal folder.
    ///
    /// A file found along the chain is replaced by an empty folder.
    pub fn add_folder(&mut self, path: &str) -> &mut FolderNode {
        let segments = self.segments(path);
        Self::ensure_chain(&mut self.root, &segments)
    }

    /// Resolves `path` to a node, `None` when any segment is missing
    pub fn get_folder_from_path(&self, path: &str) -> Option<&IndexNode> {
        let mut node = &self.root;
        for segment in self.segments(path) {
            node = node.as_folder()?.children.get(segment)?;
        }
        Some(node)
    }

    /// Returns true if `path` resolves to a node
    pub fn contains(&self, path: &str) -> bool {
        self.get_folder_from_path(path).is_some()
    }

    /// Detaches and returns the node at `path`.
    ///
    /// Returns `None` for the root or when the node or an ancestor is missing.
    pub fn detach(&mut self, path: &str) -> Option<IndexNode> {
        let segments = self.segments(path);
        let (leaf, parents) = segments.split_last()?;
        let parent = self.node_mut(parents)?.as_folder_mut()?;
        parent.children.remove(*leaf)
    }

    /// Places `node` at `path`, creating ancestors and replacing whatever was there
    pub fn attach(&mut self, path: &str, node: IndexNode) -> Result<(), DomainError> {
        let segments = self.segments(path);
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(DomainError::RootOperation);
        };
        let parent = Self::ensure_chain(&mut self.root, parents);
        parent.children.insert((*leaf).to_string(), node);
        Ok(())
    }

    /// Removes the node at `path`; false if it was not present
    pub fn remove_path(&mut self, path: &str) -> bool {
        self.detach(path).is_some()
    }

    /// Flags the folder at `path` for a rescan; false if no such folder exists
    pub fn mark_path_for_update(&mut self, path: &str) -> bool {
        let segments = self.segments(path);
        match self.node_mut(&segments).and_then(IndexNode::as_folder_mut) {
            Some(folder) => {
                folder.needs_update = true;
                true
            }
            None => false,
        }
    }

    /// Root-relative paths of the outermost folders flagged `needs_update`.
    ///
    /// Folders below a flagged folder are not reported; rescanning the
    /// outer one covers them.
    pub fn folders_needing_update(&self) -> Vec<String> {
        fn collect(node: &IndexNode, path: &str, out: &mut Vec<String>) {
            let Some(folder) = node.as_folder() else {
                return;
            };
            if folder.needs_update {
                out.push(if path.is_empty() { "/".to_string() } else { path.to_string() });
                return;
            }
            for (name, child) in &folder.children {
                collect(child, &format!("{path}/{name}"), out);
            }
        }

        let mut out = Vec::new();
        collect(&self.root, "", &mut out);
        out
    }

    /// Number of file nodes in the tree
    pub fn file_count(&self) -> usize {
        let (mut files, mut folders) = (0, 0);
        self.root.count(&mut files, &mut folders);
        files
    }

    /// Number of folder nodes in the tree, excluding the root
    pub fn folder_count(&self) -> usize {
        let (mut files, mut folders) = (0, 0);
        self.root.count(&mut files, &mut folders);
        folders - 1
    }

    /// Indented listing of the tree, for debug logs
    pub fn render(&self) -> String {
        fn render_node(node: &IndexNode, depth: usize, out: &mut String) {
            let Some(folder) = node.as_folder() else {
                return;
            };
            for (name, child) in &folder.children {
                let indent = "  ".repeat(depth);
                let _ = match child {
                    IndexNode::File(file) => writeln!(out, "{indent}{name} ({} bytes)", file.size),
                    IndexNode::Folder(sub) if sub.max_depth_reached => {
                        writeln!(out, "{indent}{name}/ [depth limit]")
                    }
                    IndexNode::Folder(_) => writeln!(out, "{indent}{name}/"),
                };
                render_node(child, depth + 1, out);
            }
        }

        let mut out = String::new();
        render_node(&self.root, 0, &mut out);
        out
    }

    /// Exports a plain snapshot of the tree
    pub fn export(&self) -> IndexSnapshot {
        IndexSnapshot {
            index: self.root.clone(),
            base_path: self.base_path.clone(),
        }
    }

    /// Rebuilds a tree from a snapshot. The snapshot root must be a folder.
    pub fn import(snapshot: IndexSnapshot) -> Result<Self, DomainError> {
        if snapshot.index.is_file() {
            return Err(DomainError::InvalidSnapshot(
                "root node is a file".to_string(),
            ));
        }
        Ok(Self {
            root: snapshot.index,
            base_path: snapshot.base_path,
        })
    }

    /// Serializes the snapshot as JSON
    pub fn to_json(&self) -> Result<String, DomainError> {
        serde_json::to_string(&self.export())
            .map_err(|e| DomainError::InvalidSnapshot(e.to_string()))
    }

    /// Parses a JSON snapshot
    pub fn from_json(json: &str) -> Result<Self, DomainError> {
        let snapshot: IndexSnapshot =
            serde_json::from_str(json).map_err(|e| DomainError::InvalidSnapshot(e.to_string()))?;
        Self::import(snapshot)
    }
}
