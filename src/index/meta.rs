//! Index metadata - how much history the indexes can be trusted for

use crate::storage::{DayKey, StorageResult, Table};
use serde::{Deserialize, Serialize};

/// Bumped whenever the on-disk index layout changes; a mismatch forces a rebuild
pub const INDEX_SCHEMA_VERSION: u32 = 1;

const META_KEY: &str = "meta";

/// Coverage and lifecycle flags of the derived indexes
///
/// Every day in `[indexed_from, ∞)` is fully indexed. Days older than
/// `indexed_from` must be scanned until backfill reaches `oldest_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Oldest day whose index entries are complete
    pub indexed_from: Option<DayKey>,
    /// Oldest day with any data (may be stale-too-old after deletes)
    pub oldest_data: Option<DayKey>,
    /// Newest day the indexes have absorbed
    pub last_indexed: Option<DayKey>,
    pub backfill_complete: bool,
    pub backfill_paused: bool,
    /// Indexes must be rebuilt on next startup
    pub rebuild_needed: bool,
    pub schema_version: u32,
}

impl Default for IndexMeta {
    fn default() -> Self {
        Self {
            indexed_from: None,
            oldest_data: None,
            last_indexed: None,
            backfill_complete: false,
            backfill_paused: false,
            rebuild_needed: false,
            schema_version: INDEX_SCHEMA_VERSION,
        }
    }
}

impl IndexMeta {
    /// Whether persisted indexes can be used without a rebuild
    pub fn is_usable(&self) -> bool {
        self.schema_version == INDEX_SCHEMA_VERSION
            && !self.rebuild_needed
            && self.indexed_from.is_some()
    }

    /// Whether `day` is covered by the indexes
    pub fn covers(&self, day: DayKey) -> bool {
        self.indexed_from.is_some_and(|from| day >= from)
    }

    /// Recompute completeness from the two boundaries
    pub fn refresh_complete(&mut self) {
        self.backfill_complete = match (self.indexed_from, self.oldest_data) {
            (_, None) => true,
            (Some(from), Some(oldest)) => from <= oldest,
            (None, Some(_)) => false,
        };
    }

    /// Note a record on `day` that the indexes absorbed
    pub fn note_indexed(&mut self, day: DayKey) {
        if self.last_indexed.map_or(true, |last| day > last) {
            self.last_indexed = Some(day);
        }
        if self.oldest_data.map_or(true, |oldest| day < oldest) {
            self.oldest_data = Some(day);
        }
    }

    /// Note a record on `day` older than the indexed boundary
    pub fn note_unindexed(&mut self, day: DayKey) {
        if self.oldest_data.map_or(true, |oldest| day < oldest) {
            self.oldest_data = Some(day);
        }
        self.refresh_complete();
    }
}

/// Persists `IndexMeta` as a single JSON row
#[derive(Clone)]
pub struct MetaStore {
    table: Table<IndexMeta>,
}

impl MetaStore {
    pub fn new(table: Table<IndexMeta>) -> Self {
        Self { table }
    }

    pub fn load(&self) -> StorageResult<Option<IndexMeta>> {
        self.table.get(META_KEY)
    }

    pub fn save(&self, meta: &IndexMeta) -> StorageResult<()> {
        self.table.put(META_KEY, meta)
    }
}
