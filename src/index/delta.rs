//! In-memory accumulation of index contents during scans
//!
//! Bootstrap, backfill and the integrity check all walk the record store and
//! build the same three structures; they differ only in what they do with the
//! result (replace, merge, compare).

use crate::index::set_index::{BucketMap, DateIndex, EntityDateIndex};
use crate::index::summary::{DailySummary, Sign, SummaryKey, SummaryMap};
use crate::storage::Record;
use chrono::{DateTime, Utc};

/// Pending contents of the date index, entity-date index and summary table
#[derive(Debug, Default, Clone)]
pub struct IndexDelta {
    pub dates: BucketMap,
    pub entity_dates: BucketMap,
    pub summaries: SummaryMap,
    pub records: usize,
}

impl IndexDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one record
    pub fn add(&mut self, record: &Record, now: DateTime<Utc>) {
        self.dates
            .entry(DateIndex::key(record.day_key))
            .or_default()
            .insert(record.id.clone());
        self.entity_dates
            .entry(EntityDateIndex::key(&record.entity_id, record.day_key))
            .or_default()
            .insert(record.id.clone());
        self.summaries
            .entry(SummaryKey::of(record))
            .or_insert_with(|| DailySummary::empty(record.entity_id.clone(), record.day_key, now))
            .apply(record, Sign::Plus, now);
        self.records += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }
}
