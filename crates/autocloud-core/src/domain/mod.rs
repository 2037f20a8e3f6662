//! Domain entities and algorithms
//!
//! This module contains the core domain types for AutoCloud:
//! - Index trees modelling a local folder or the remote mirror
//! - The tree diff engine
//! - Semantic change records produced from filesystem events
//! - Path filtering rules
//! - Domain-specific error types

pub mod change;
pub mod diff;
pub mod errors;
pub mod filter;
pub mod index_tree;

// Re-export commonly used types
pub use change::ChangeRecord;
pub use diff::{diff, TreeDiff};
pub use errors::DomainError;
pub use filter::PathFilter;
pub use index_tree::{
    FileNode, FolderNode, IndexNode, IndexSnapshot, IndexTree, NodeKind, DEFAULT_MAX_DEPTH,
    HIDDEN_METADATA_NAME,
};
