//! Domain error types
//!
//! Errors raised by index tree and snapshot operations. Lookups that are
//! expected to miss (removal, marking) report a `bool` instead.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A path segment resolved to a file where a folder was required
    #[error("Not a folder: {0}")]
    NotAFolder(String),

    /// The tree root cannot be detached or replaced
    #[error("Operation not permitted on the tree root")]
    RootOperation,

    /// A snapshot could not be encoded or decoded
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
