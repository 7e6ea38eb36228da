//! Progress store abstraction and implementations.
//!
//! This crate provides the trait-based persistence interface the journey
//! core consumes, with in-memory and JSON-file backends.

#![warn(missing_docs)]

pub mod trait_;
pub mod locks;
pub mod memory;
#[cfg(feature = "json")]
pub mod json_storage;

pub use trait_::{prepare_write, ProgressStore, Result, StorageError};
pub use locks::{KeyGuard, KeyedLocks};
pub use memory::MemoryStore;
#[cfg(feature = "json")]
pub use json_storage::JsonStore;
