//! Membership indexes - key → sorted set of record ids
//!
//! Two flavours share one implementation:
//! - **DateIndex**: `YYYYMMDD` → ids of records on that day
//! - **EntityDateIndex**: `entity|YYYYMMDD` → ids of that entity's records on that day
//!
//! # Design Notes
//! - Buckets are stored as sorted `Vec<String>` so reads are deterministic
//! - `add`/`remove` are idempotent
//! - Removing the last member deletes the bucket (no empty-set litter)

use crate::storage::{DayKey, DayRange, StorageResult, Table, ENTITY_KEY_SEPARATOR};
use std::collections::{BTreeMap, BTreeSet};

/// Bucket contents accumulated in memory before a bulk write
pub type BucketMap = BTreeMap<String, BTreeSet<String>>;

/// A persisted `key → sorted ids` index
#[derive(Clone)]
pub struct SetIndex {
    table: Table<Vec<String>>,
}

impl SetIndex {
    pub fn new(table: Table<Vec<String>>) -> Self {
        Self { table }
    }

    /// Add an id to a bucket; returns whether the bucket changed
    pub fn add(&self, key: &str, id: &str) -> StorageResult<bool> {
        let mut ids = self.table.get(key)?.unwrap_or_default();
        match ids.binary_search_by(|probe| probe.as_str().cmp(id)) {
            Ok(_) => Ok(false),
            Err(pos) => {
                ids.insert(pos, id.to_string());
                self.table.put(key, &ids)?;
                Ok(true)
            }
        }
    }

    /// Remove an id from a bucket; returns whether the bucket changed
    pub fn remove(&self, key: &str, id: &str) -> StorageResult<bool> {
        let Some(mut ids) = self.table.get(key)? else {
            return Ok(false);
        };
        match ids.binary_search_by(|probe| probe.as_str().cmp(id)) {
            Ok(pos) => {
                ids.remove(pos);
                if ids.is_empty() {
                    self.table.delete(key)?;
                } else {
                    self.table.put(key, &ids)?;
                }
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Sorted ids in a bucket (empty if absent)
    pub fn get_set(&self, key: &str) -> StorageResult<Vec<String>> {
        Ok(self.table.get(key)?.unwrap_or_default())
    }

    /// Union buckets into the existing contents
    pub fn merge_add(&self, buckets: &BucketMap) -> StorageResult<()> {
        let mut merged = Vec::with_capacity(buckets.len());
        for (key, ids) in buckets {
            if ids.is_empty() {
                continue;
            }
            let mut existing: BTreeSet<String> =
                self.table.get(key)?.unwrap_or_default().into_iter().collect();
            existing.extend(ids.iter().cloned());
            merged.push((key.clone(), existing.into_iter().collect::<Vec<_>>()));
        }
        self.table
            .put_all(merged.iter().map(|(key, ids)| (key.clone(), ids)))
    }

    /// Clear the index and write `buckets` as its whole contents
    pub fn replace_all(&self, buckets: &BucketMap) -> StorageResult<()> {
        self.table.clear()?;
        let rows: Vec<(String, Vec<String>)> = buckets
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(key, ids)| (key.clone(), ids.iter().cloned().collect()))
            .collect();
        self.table
            .put_all(rows.iter().map(|(key, ids)| (key.clone(), ids)))
    }

    /// Every bucket, ordered by key
    pub fn entries(&self) -> StorageResult<Vec<(String, Vec<String>)>> {
        self.table.entries()
    }

    /// Number of buckets
    pub fn bucket_count(&self) -> StorageResult<usize> {
        self.table.len()
    }
}

/// Day → record ids
#[derive(Clone)]
pub struct DateIndex {
    inner: SetIndex,
}

impl DateIndex {
    pub fn new(table: Table<Vec<String>>) -> Self {
        Self {
            inner: SetIndex::new(table),
        }
    }

    pub fn key(day: DayKey) -> String {
        day.to_string()
    }

    pub fn add(&self, day: DayKey, id: &str) -> StorageResult<bool> {
        self.inner.add(&Self::key(day), id)
    }

    pub fn remove(&self, day: DayKey, id: &str) -> StorageResult<bool> {
        self.inner.remove(&Self::key(day), id)
    }

    pub fn get_set(&self, day: DayKey) -> StorageResult<Vec<String>> {
        self.inner.get_set(&Self::key(day))
    }

    /// Ids for every day in `range`, oldest day first
    pub fn get_range(&self, range: &DayRange) -> StorageResult<Vec<String>> {
        let mut ids = Vec::new();
        for day in range.days() {
            ids.extend(self.get_set(day)?);
        }
        Ok(ids)
    }

    pub fn merge_add(&self, buckets: &BucketMap) -> StorageResult<()> {
        self.inner.merge_add(buckets)
    }

    pub fn replace_all(&self, buckets: &BucketMap) -> StorageResult<()> {
        self.inner.replace_all(buckets)
    }

    pub fn entries(&self) -> StorageResult<Vec<(String, Vec<String>)>> {
        self.inner.entries()
    }

    pub fn bucket_count(&self) -> StorageResult<usize> {
        self.inner.bucket_count()
    }
}

/// (entity, day) → record ids
#[derive(Clone)]
pub struct EntityDateIndex {
    inner: SetIndex,
}

impl EntityDateIndex {
    pub fn new(table: Table<Vec<String>>) -> Self {
        Self {
            inner: SetIndex::new(table),
        }
    }

    pub fn key(entity_id: &str, day: DayKey) -> String {
        format!("{}{}{}", entity_id, ENTITY_KEY_SEPARATOR, day)
    }

    /// Day part of a composite key
    pub fn day_of(key: &str) -> Option<DayKey> {
        key.rsplit_once(ENTITY_KEY_SEPARATOR)
            .and_then(|(_, day)| DayKey::parse(day).ok())
    }

    pub fn add(&self, entity_id: &str, day: DayKey, id: &str) -> StorageResult<bool> {
        self.inner.add(&Self::key(entity_id, day), id)
    }

    pub fn remove(&self, entity_id: &str, day: DayKey, id: &str) -> StorageResult<bool> {
        self.inner.remove(&Self::key(entity_id, day), id)
    }

    pub fn get_set(&self, entity_id: &str, day: DayKey) -> StorageResult<Vec<String>> {
        self.inner.get_set(&Self::key(entity_id, day))
    }

    /// Ids of one entity for every day in `range`, oldest day first
    pub fn get_range(&self, entity_id: &str, range: &DayRange) -> StorageResult<Vec<String>> {
        let mut ids = Vec::new();
        for day in range.days() {
            ids.extend(self.get_set(entity_id, day)?);
        }
        Ok(ids)
    }

    pub fn merge_add(&self, buckets: &BucketMap) -> StorageResult<()> {
        self.inner.merge_add(buckets)
    }

    pub fn replace_all(&self, buckets: &BucketMap) -> StorageResult<()> {
        self.inner.replace_all(buckets)
    }

    pub fn entries(&self) -> StorageResult<Vec<(String, Vec<String>)>> {
        self.inner.entries()
    }

    pub fn bucket_count(&self) -> StorageResult<usize> {
        self.inner.bucket_count()
    }
}
