//! Daily Summary Table - rolling aggregates per (entity, day)
//!
//! Each row is updated incrementally as records come and go, so reading a
//! day's totals never touches the records themselves.
//!
//! # Design Notes
//! - A row whose count drops to zero is deleted, not kept as zeros
//! - Reads of absent rows return a zeroed summary
//! - Counters are clamped at zero; a clamp means some earlier update was lost

use crate::storage::{DayKey, DayRange, Record, StorageResult, Table, ENTITY_KEY_SEPARATOR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction of an aggregate update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    pub fn factor(self) -> i64 {
        match self {
            Sign::Plus => 1,
            Sign::Minus => -1,
        }
    }
}

/// Identifies one summary row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SummaryKey {
    pub entity_id: String,
    pub day_key: DayKey,
}

impl SummaryKey {
    pub fn new(entity_id: impl Into<String>, day_key: DayKey) -> Self {
        Self {
            entity_id: entity_id.into(),
            day_key,
        }
    }

    pub fn of(record: &Record) -> Self {
        Self::new(record.entity_id.clone(), record.day_key)
    }

    /// Key used in the backing table
    pub fn storage_key(&self) -> String {
        format!("{}{}{}", self.entity_id, ENTITY_KEY_SEPARATOR, self.day_key)
    }
}

/// Aggregates of one entity on one day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailySummary {
    pub entity_id: String,
    pub day_key: DayKey,
    /// Number of records
    pub total_count: i64,
    /// Sum of durations (minutes)
    pub total_duration: i64,
    /// Sum of intensities over records that have one
    pub intensity_sum: i64,
    /// Number of records that have an intensity
    pub intensity_count: i64,
    pub updated_at: DateTime<Utc>,
}

impl DailySummary {
    /// A zeroed summary
    pub fn empty(entity_id: impl Into<String>, day_key: DayKey, now: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            day_key,
            total_count: 0,
            total_duration: 0,
            intensity_sum: 0,
            intensity_count: 0,
            updated_at: now,
        }
    }

    pub fn key(&self) -> SummaryKey {
        SummaryKey::new(self.entity_id.clone(), self.day_key)
    }

    /// Apply one record with `sign`; returns true if any counter had to be clamped
    pub fn apply(&mut self, record: &Record, sign: Sign, now: DateTime<Utc>) -> bool {
        let factor = sign.factor();
        let mut clamped = false;
        let mut bump = |field: &mut i64, delta: i64| {
            let next = *field + delta;
            if next < 0 {
                clamped = true;
            }
            *field = next.max(0);
        };

        bump(&mut self.total_count, factor);
        bump(&mut self.total_duration, record.secondary_metric() * factor);
        if let Some(intensity) = record.tertiary_metric() {
            bump(&mut self.intensity_sum, intensity * factor);
            bump(&mut self.intensity_count, factor);
        }
        self.updated_at = now;
        clamped
    }

    /// Add another partial aggregate of the same row
    pub fn merge(&mut self, other: &DailySummary) {
        self.total_count += other.total_count;
        self.total_duration += other.total_duration;
        self.intensity_sum += other.intensity_sum;
        self.intensity_count += other.intensity_count;
        self.updated_at = self.updated_at.max(other.updated_at);
    }

    /// Compare aggregate fields, ignoring timestamps
    pub fn same_aggregates(&self, other: &DailySummary) -> bool {
        self.total_count == other.total_count
            && self.total_duration == other.total_duration
            && self.intensity_sum == other.intensity_sum
            && self.intensity_count == other.intensity_count
    }

    pub fn is_empty(&self) -> bool {
        self.total_count <= 0
    }

    /// Mean intensity, if any record carried one
    pub fn average_intensity(&self) -> Option<f64> {
        (self.intensity_count > 0).then(|| self.intensity_sum as f64 / self.intensity_count as f64)
    }
}

/// Summary rows accumulated in memory before a bulk write
pub type SummaryMap = BTreeMap<SummaryKey, DailySummary>;

/// Persisted `(entity, day) → DailySummary`
#[derive(Clone)]
pub struct SummaryTable {
    table: Table<DailySummary>,
}

impl SummaryTable {
    pub fn new(table: Table<DailySummary>) -> Self {
        Self { table }
    }

    /// Apply one record to its row, deleting the row once empty
    pub fn apply_delta(&self, record: &Record, sign: Sign, now: DateTime<Utc>) -> StorageResult<()> {
        let key = SummaryKey::of(record);
        let storage_key = key.storage_key();
        let mut summary = self
            .table
            .get(&storage_key)?
            .unwrap_or_else(|| DailySummary::empty(key.entity_id.clone(), key.day_key, now));

        if summary.apply(record, sign, now) {
            tracing::warn!(
                "Clamped negative summary counter for {} (record {})",
                storage_key,
                record.id
            );
        }

        if summary.is_empty() {
            self.table.delete(&storage_key)?;
        } else {
            self.table.put(&storage_key, &summary)?;
        }
        Ok(())
    }

    /// Row for `(entity, day)`, zeroed if absent
    pub fn get(&self, entity_id: &str, day: DayKey, now: DateTime<Utc>) -> StorageResult<DailySummary> {
        let key = SummaryKey::new(entity_id, day);
        Ok(self
            .table
            .get(&key.storage_key())?
            .unwrap_or_else(|| DailySummary::empty(entity_id, day, now)))
    }

    /// Existing rows of one entity inside `range`
    pub fn entity_range(&self, entity_id: &str, range: &DayRange) -> StorageResult<SummaryMap> {
        let start = SummaryKey::new(entity_id, range.start).storage_key();
        let end = SummaryKey::new(entity_id, range.end).storage_key();
        Ok(self
            .table
            .range(&start, &end)?
            .into_iter()
            .map(|(_, summary)| (summary.key(), summary))
            .collect())
    }

    /// Existing rows of the given entities inside `range`
    ///
    /// One key-range read per entity, so the cost follows the days asked for
    /// rather than the size of the table.
    pub fn all_range<'a, I>(&self, entity_ids: I, range: &DayRange) -> StorageResult<SummaryMap>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut rows = SummaryMap::new();
        for entity_id in entity_ids {
            rows.extend(self.entity_range(entity_id, range)?);
        }
        Ok(rows)
    }

    /// Add rows onto existing aggregates
    pub fn merge_add(&self, rows: &SummaryMap) -> StorageResult<()> {
        let mut merged = Vec::with_capacity(rows.len());
        for (key, delta) in rows {
            let storage_key = key.storage_key();
            let summary = match self.table.get(&storage_key)? {
                Some(mut existing) => {
                    existing.merge(delta);
                    existing
                }
                None => delta.clone(),
            };
            if !summary.is_empty() {
                merged.push((storage_key, summary));
            }
        }
        self.table
            .put_all(merged.iter().map(|(key, summary)| (key.clone(), summary)))
    }

    /// Clear the table and write `rows` as its whole contents
    pub fn replace_all(&self, rows: &SummaryMap) -> StorageResult<()> {
        self.table.clear()?;
        self.table.put_all(
            rows.iter()
                .filter(|(_, summary)| !summary.is_empty())
                .map(|(key, summary)| (key.storage_key(), summary)),
        )
    }

    /// Every row
    pub fn all(&self) -> StorageResult<Vec<DailySummary>> {
        self.table.values()
    }

    pub fn row_count(&self) -> StorageResult<usize> {
        self.table.len()
    }
}
