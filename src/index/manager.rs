//! Index Manager - Coordinates all daybook indexes
//!
//! Provides a unified interface to:
//! - DateIndex (day → ids)
//! - EntityDateIndex ((entity, day) → ids)
//! - SummaryTable ((entity, day) → aggregates)
//! - MetaStore (coverage boundaries and flags)
//!
//! Callers are responsible for ordering: every method here assumes it runs
//! inside the engine's mutation serializer.

use crate::index::delta::IndexDelta;
use crate::index::meta::MetaStore;
use crate::index::set_index::{DateIndex, EntityDateIndex};
use crate::index::summary::{Sign, SummaryTable};
use crate::storage::{Codec, KvStore, Record, StorageResult, Table};
use chrono::{DateTime, Utc};

pub const DATE_INDEX_TABLE: &str = "date_index";
pub const ENTITY_DATE_INDEX_TABLE: &str = "entity_date_index";
pub const SUMMARY_TABLE: &str = "daily_summary";
pub const META_TABLE: &str = "index_meta";

/// Statistics about index contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of day buckets
    pub date_buckets: usize,
    /// Number of (entity, day) buckets
    pub entity_date_buckets: usize,
    /// Number of summary rows
    pub summary_rows: usize,
}

/// Coordinates all index types
#[derive(Clone)]
pub struct IndexManager {
    dates: DateIndex,
    entity_dates: EntityDateIndex,
    summaries: SummaryTable,
    meta: MetaStore,
}

impl IndexManager {
    /// Open (or create) every index table in `store`
    pub fn open(store: &dyn KvStore) -> StorageResult<Self> {
        Ok(Self {
            dates: DateIndex::new(Table::new(store.open_table(DATE_INDEX_TABLE)?, Codec::Bincode)),
            entity_dates: EntityDateIndex::new(Table::new(
                store.open_table(ENTITY_DATE_INDEX_TABLE)?,
                Codec::Bincode,
            )),
            summaries: SummaryTable::new(Table::new(
                store.open_table(SUMMARY_TABLE)?,
                Codec::Bincode,
            )),
            meta: MetaStore::new(Table::new(store.open_table(META_TABLE)?, Codec::Json)),
        })
    }

    // ==================== Accessors ====================

    pub fn dates(&self) -> &DateIndex {
        &self.dates
    }

    pub fn entity_dates(&self) -> &EntityDateIndex {
        &self.entity_dates
    }

    pub fn summaries(&self) -> &SummaryTable {
        &self.summaries
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    // ==================== Index Update Methods ====================

    /// Add one record to all three structures
    pub fn index_record(&self, record: &Record, now: DateTime<Utc>) -> StorageResult<()> {
        self.dates.add(record.day_key, &record.id)?;
        self.entity_dates
            .add(&record.entity_id, record.day_key, &record.id)?;
        self.summaries.apply_delta(record, Sign::Plus, now)
    }

    /// Remove one record from all three structures
    pub fn unindex_record(&self, record: &Record, now: DateTime<Utc>) -> StorageResult<()> {
        self.dates.remove(record.day_key, &record.id)?;
        self.entity_dates
            .remove(&record.entity_id, record.day_key, &record.id)?;
        self.summaries.apply_delta(record, Sign::Minus, now)
    }

    /// Replace all index contents with `delta` (clear-then-write)
    pub fn replace_all(&self, delta: &IndexDelta) -> StorageResult<()> {
        self.dates.replace_all(&delta.dates)?;
        self.entity_dates.replace_all(&delta.entity_dates)?;
        self.summaries.replace_all(&delta.summaries)
    }

    /// Merge `delta` onto the existing contents
    pub fn merge(&self, delta: &IndexDelta) -> StorageResult<()> {
        if delta.is_empty() {
            return Ok(());
        }
        self.dates.merge_add(&delta.dates)?;
        self.entity_dates.merge_add(&delta.entity_dates)?;
        self.summaries.merge_add(&delta.summaries)
    }

    // ==================== Stats Methods ====================

    pub fn stats(&self) -> StorageResult<IndexStats> {
        Ok(IndexStats {
            date_buckets: self.dates.bucket_count()?,
            entity_date_buckets: self.entity_dates.bucket_count()?,
            summary_rows: self.summaries.row_count()?,
        })
    }
}
