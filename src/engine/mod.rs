//! Daybook Engine
//!
//! The engine orchestrates the record store and its derived indexes:
//! - Write path: mutation → serializer → record store → indexes
//! - Read path: query → index coverage check → indexes | scan
//! - Maintenance: bootstrap, lazy integrity check, backward backfill
//!
//! # Coverage
//!
//! ```text
//!   oldest_data        indexed_from            today
//!       |------ scan ------|======= indexed =======|
//!                 ← backfill moves this boundary
//! ```
//!
//! Reads always return correct results; the indexes only make them cheaper.
//! Whenever the indexes cannot be trusted (not built yet, integrity mismatch,
//! mutation in flight, day outside coverage) the read scans the record store.

mod backfill;
mod bootstrap;
mod hooks;
mod mutation;
mod query;
mod serializer;

#[cfg(test)]
mod tests;

pub use bootstrap::IntegrityReport;
pub use hooks::{Clock, FixedClock, NoYield, SleepYield, SystemClock, TokioYield, YieldPoint};
pub use query::SummaryScope;
pub use serializer::{MutationGuard, MutationSerializer, ReadTicket};

use crate::index::{IndexManager, IndexMeta, IndexStats};
use crate::storage::{
    Codec, DayKey, EntityConfig, EntityRegistry, KvStore, Record, StorageError, StorageResult, Table,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

pub const RECORDS_TABLE: &str = "records";
pub const ENTITIES_TABLE: &str = "entities";

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Days (ending today) indexed by the bootstrap (default: 30)
    pub window_days: u32,
    /// Days indexed per backfill chunk (default: 30)
    pub backfill_chunk_days: u32,
    /// Records scanned between yield points (default: 350)
    pub yield_every: usize,
    /// Runaway guard for `run_backfill` (default: 2048)
    pub max_backfill_iterations: usize,
    /// Period of the background backfill task (default: 1 hour)
    pub backfill_interval: Duration,
    /// Run the bootstrap during `open` when indexes are missing (default: true)
    pub bootstrap_on_open: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            backfill_chunk_days: 30,
            yield_every: 350,
            max_backfill_iterations: 2048,
            backfill_interval: Duration::from_secs(3600),
            bootstrap_on_open: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> StorageResult<()> {
        if self.window_days == 0 {
            return Err(StorageError::InvalidChunkSize(self.window_days));
        }
        if self.backfill_chunk_days == 0 {
            return Err(StorageError::InvalidChunkSize(self.backfill_chunk_days));
        }
        Ok(())
    }
}

/// Readiness flags plus the cached metadata
#[derive(Debug)]
struct EngineState {
    meta: IndexMeta,
    /// Indexes exist and are maintained by mutations
    ready: bool,
    /// Cleared for the rest of the process when the integrity check fails
    use_indexed_reads: bool,
    /// The once-per-process integrity check has run
    integrity_checked: bool,
}

/// Snapshot of how queries are being answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizationStatus {
    pub ready: bool,
    pub using_scan_fallback: bool,
    pub backfill_complete: bool,
    pub paused: bool,
    pub rebuild_needed: bool,
    pub indexed_from_day_key: Option<DayKey>,
    pub oldest_data_day_key: Option<DayKey>,
    pub last_indexed_day_key: Option<DayKey>,
    pub pending_mutations: usize,
}

/// How reads have been answered since open
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    /// Answered entirely from indexes
    pub indexed: u64,
    /// Answered (at least partly) by scanning records
    pub scanned: u64,
    /// Indexed answers discarded because a mutation overlapped them
    pub invalidated: u64,
}

#[derive(Debug, Default)]
struct ReadCounters {
    indexed: AtomicU64,
    scanned: AtomicU64,
    invalidated: AtomicU64,
}

impl ReadCounters {
    fn snapshot(&self) -> ReadStats {
        ReadStats {
            indexed: self.indexed.load(Ordering::Relaxed),
            scanned: self.scanned.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub records: usize,
    pub entities: usize,
    pub index: IndexStats,
    pub reads: ReadStats,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Records: {}, Entities: {}, Day buckets: {}, Summary rows: {}, Reads: {} indexed / {} scanned",
            self.records,
            self.entities,
            self.index.date_buckets,
            self.index.summary_rows,
            self.reads.indexed,
            self.reads.scanned
        )
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder<'a> {
    store: &'a dyn KvStore,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    yield_point: Arc<dyn YieldPoint>,
}

impl<'a> EngineBuilder<'a> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn yield_point(mut self, yield_point: Arc<dyn YieldPoint>) -> Self {
        self.yield_point = yield_point;
        self
    }

    /// Open every table and load persisted metadata
    pub async fn open(self) -> StorageResult<Engine> {
        self.config.validate()?;

        let records = Table::new(self.store.open_table(RECORDS_TABLE)?, Codec::Bincode);
        let entities = EntityRegistry::new(Table::new(
            self.store.open_table(ENTITIES_TABLE)?,
            Codec::Bincode,
        ));
        let indexes = IndexManager::open(self.store)?;

        let (meta, ready) = match indexes.meta().load()? {
            Some(meta) if meta.is_usable() => (meta, true),
            Some(meta) => {
                tracing::info!(
                    "Persisted indexes unusable (schema {}, rebuild_needed {}), rebuild required",
                    meta.schema_version,
                    meta.rebuild_needed
                );
                (meta, false)
            }
            None => (IndexMeta::default(), false),
        };

        let bootstrap = !ready && self.config.bootstrap_on_open;
        let engine = Engine {
            config: self.config,
            records,
            entities,
            indexes,
            state: RwLock::new(EngineState {
                meta,
                ready,
                use_indexed_reads: ready,
                integrity_checked: false,
            }),
            serializer: MutationSerializer::new(),
            clock: self.clock,
            yield_point: self.yield_point,
            reads: ReadCounters::default(),
            shutdown: AtomicBool::new(false),
        };

        if bootstrap {
            engine.initialize().await?;
        }

        Ok(engine)
    }
}

/// The day-keyed record engine
pub struct Engine {
    config: EngineConfig,
    /// Source of truth
    records: Table<Record>,
    entities: EntityRegistry,
    /// Derived, rebuildable
    indexes: IndexManager,
    /// std::sync::RwLock because it is never held across an await
    state: RwLock<EngineState>,
    serializer: MutationSerializer,
    clock: Arc<dyn Clock>,
    yield_point: Arc<dyn YieldPoint>,
    reads: ReadCounters,
    shutdown: AtomicBool,
}

impl Engine {
    /// Start building an engine over `store`
    pub fn builder(store: &dyn KvStore) -> EngineBuilder<'_> {
        EngineBuilder {
            store,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            yield_point: Arc::new(TokioYield),
        }
    }

    /// Open with default clock and yield hook
    pub async fn open(store: &dyn KvStore, config: EngineConfig) -> StorageResult<Self> {
        Self::builder(store).config(config).open().await
    }

    // ==================== Entities ====================

    /// Register (or redefine) an entity
    pub fn register_entity(&self, entity: EntityConfig) -> StorageResult<EntityConfig> {
        self.entities.register(&entity)?;
        Ok(entity)
    }

    /// Hide an entity from hosts without touching its records
    pub fn deactivate_entity(&self, id: &str) -> StorageResult<EntityConfig> {
        self.entities.deactivate(id)
    }

    pub fn entity(&self, id: &str) -> StorageResult<Option<EntityConfig>> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> StorageResult<Vec<EntityConfig>> {
        self.entities.all()
    }

    // ==================== Status ====================

    /// Current coverage and fallback state
    pub fn optimization_status(&self) -> StorageResult<OptimizationStatus> {
        let state = self.state()?;
        Ok(OptimizationStatus {
            ready: state.ready,
            using_scan_fallback: !state.ready
                || !state.use_indexed_reads
                || self.serializer.is_mutating(),
            backfill_complete: state.meta.backfill_complete,
            paused: state.meta.backfill_paused,
            rebuild_needed: state.meta.rebuild_needed,
            indexed_from_day_key: state.meta.indexed_from,
            oldest_data_day_key: state.meta.oldest_data,
            last_indexed_day_key: state.meta.last_indexed,
            pending_mutations: self.serializer.pending(),
        })
    }

    /// Copy of the cached index metadata
    pub fn index_meta(&self) -> StorageResult<IndexMeta> {
        Ok(self.state()?.meta.clone())
    }

    /// Pause or resume backfill; persisted across restarts
    pub fn set_backfill_paused(&self, paused: bool) -> StorageResult<()> {
        self.update_meta(|meta| meta.backfill_paused = paused)?;
        tracing::info!("Backfill {}", if paused { "paused" } else { "resumed" });
        Ok(())
    }

    pub fn read_stats(&self) -> ReadStats {
        self.reads.snapshot()
    }

    pub fn stats(&self) -> StorageResult<EngineStats> {
        Ok(EngineStats {
            records: self.records.len()?,
            entities: self.entities.all()?.len(),
            index: self.indexes.stats()?,
            reads: self.reads.snapshot(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop background tasks; in-flight operations run to completion
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        tracing::info!("Engine shutdown requested");
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    // ==================== Internals ====================

    fn state(&self) -> StorageResult<RwLockReadGuard<'_, EngineState>> {
        self.state
            .read()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire engine state lock: {}", e)))
    }

    fn state_mut(&self) -> StorageResult<RwLockWriteGuard<'_, EngineState>> {
        self.state
            .write()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire engine state lock: {}", e)))
    }

    /// Mutate the cached metadata and persist it
    fn update_meta<F: FnOnce(&mut IndexMeta)>(&self, f: F) -> StorageResult<IndexMeta> {
        let mut state = self.state_mut()?;
        f(&mut state.meta);
        self.indexes.meta().save(&state.meta)?;
        Ok(state.meta.clone())
    }
}
