//! Database Backend Abstractions
//!
//! `core` defines the persistence contract; `memory` is a complete in-process
//! implementation used by tests and embedding applications.

pub mod core;
pub mod memory;

// Re-export core traits and types
pub use self::core::{DatabaseBackend, JoinedRow};
pub use self::memory::{MemoryBackend, SqlHandler, TableView, WriteOp};
