//! AutoCloud Core - Directory index model and sync boundaries
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain model** - `IndexTree`, `IndexNode`, `ChangeRecord`, `PathFilter`
//! - **Diff engine** - symmetric difference of two index trees
//! - **Port definitions** - Traits for adapters: `IRemoteStorage`, `ILocalFileSystem`
//! - **Configuration** - YAML-backed `Config` with validation
//!
//! # Architecture
//!
//! The domain module is pure data and algorithms with no I/O.
//! Ports define trait interfaces that the sync crate implements and consumes.

pub mod config;
pub mod domain;
pub mod ports;
