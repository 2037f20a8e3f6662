//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are interfaces that the sync engine depends on, but whose
//! implementations live in adapter modules or in tests.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStorage`] - Remote store session and file operations
//! - [`ILocalFileSystem`] - Local stat and directory listing

pub mod local_filesystem;
pub mod remote_storage;

pub use local_filesystem::{FileSystemState, ILocalFileSystem, LocalEntry};
pub use remote_storage::{EntryKind, IRemoteStorage, RemoteCredentials, RemoteEntry, RemoteStat};
