//! Daybook storage layer
//!
//! This module provides the source-of-truth side of the engine:
//!
//! - **types**: Core data structures (DayKey, Record, EntityConfig)
//! - **kv**: The key-value substrate traits plus an in-memory store
//! - **sqlite**: Durable SQLite-backed store
//! - **table**: Typed tables encoding values at the storage boundary
//! - **registry**: Entity definitions
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Engine → Table<Record>  ─┐
//!          Table<Summary> ─┼→ KvTable → MemoryStore | SqliteStore
//!          Table<Meta>    ─┘
//! ```

pub mod error;
pub mod kv;
pub mod registry;
pub mod sqlite;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use kv::{KvStore, KvTable, MemoryStore, MemoryTable};
pub use registry::EntityRegistry;
pub use sqlite::{SqliteStore, SqliteTable};
pub use table::{Codec, Table};
pub use types::{
    DayKey, DayRange, EntityConfig, NewRecord, Patch, Record, RecordUpdate, ENTITY_KEY_SEPARATOR,
    MAX_INTENSITY, MIN_INTENSITY,
};
