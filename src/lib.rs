//! # Daybook
//!
//! Day-keyed incremental indexing over an embedded key-value store, for
//! personal tracking records (behaviors, moods, sleep, ...).
//!
//! ## Features
//!
//! - **Derived indexes**: day → ids, (entity, day) → ids, (entity, day) → aggregates
//! - **Fast startup**: only the recent window is indexed up front
//! - **Backfill**: older history is indexed backward in resumable chunks
//! - **Always correct**: any read the indexes cannot serve falls back to a scan
//!
//! ## Modules
//!
//! - [`storage`]: Key-value substrate, records and entities
//! - [`index`]: Index structures and their metadata
//! - [`engine`]: Mutations, query routing, bootstrap and backfill
//! - [`config`]: File and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daybook::engine::{Engine, SummaryScope};
//! use daybook::storage::{DayKey, EntityConfig, NewRecord, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::open(std::path::Path::new("./daybook_data"))?;
//!     let engine = Engine::open(&store, Default::default()).await?;
//!
//!     engine.register_entity(EntityConfig::new("walk", "Evening walk"))?;
//!
//!     let at = chrono::DateTime::parse_from_rfc3339("2024-01-01T19:30:00+01:00")?;
//!     engine
//!         .create_record(NewRecord::new("walk", at).duration(40).intensity(6))
//!         .await?;
//!
//!     let day = DayKey::parse("20240101")?;
//!     let summary = engine.get_daily_summary("walk", day).await?;
//!     println!("{} walks, {} minutes", summary.total_count, summary.total_duration);
//!
//!     let week = engine
//!         .get_daily_summary_range(SummaryScope::All, day.add_days(-6), day)
//!         .await?;
//!     println!("{} active entity-days this week", week.len());
//!
//!     // Index older history in the background
//!     let engine = std::sync::Arc::new(engine);
//!     let backfill = engine.start_background_backfill();
//!
//!     engine.shutdown();
//!     backfill.abort();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod index;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    DayKey, DayRange, EntityConfig, KvStore, MemoryStore, NewRecord, Record, RecordUpdate,
    SqliteStore, StorageError, StorageResult,
};

pub use index::{DailySummary, IndexMeta, IndexStats};

pub use engine::{
    Engine, EngineBuilder, EngineConfig, EngineStats, IntegrityReport, OptimizationStatus,
    ReadStats, SummaryScope,
};

pub use config::{Config, ConfigError, IndexingConfig, LoggingConfig};
