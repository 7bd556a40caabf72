//! Ports - Trait definitions for the external collaborators.

pub mod cache;
pub mod storage;
pub mod toolchain;

pub use cache::{CacheBackend, CacheError, CacheOp, CacheReply};
pub use storage::{ListPage, ObjectStore, StorageError};
pub use toolchain::{MediaToolchain, ToolchainError};
