//! Record mutations
//!
//! Each mutation writes the record store first and then updates the three
//! derived structures, all while holding the serializer guard. A crash in
//! between leaves the indexes behind the store, which the next integrity
//! check detects.

use crate::engine::Engine;
use crate::storage::{NewRecord, Patch, Record, RecordUpdate, StorageError, StorageResult};

impl Engine {
    /// Insert a new record
    pub async fn create_record(&self, new: NewRecord) -> StorageResult<Record> {
        self.entities.require(&new.entity_id)?;
        let record = new.into_record(self.clock.now())?;

        let _guard = self.serializer.begin().await;
        if self.records.get(&record.id)?.is_some() {
            return Err(StorageError::RecordExists(record.id));
        }
        self.records.put(&record.id, &record)?;
        self.reindex(None, Some(&record))?;

        tracing::debug!("Created record {} on {}", record.id, record.day_key);
        Ok(record)
    }

    /// Apply a partial update; a changed day or entity moves the record between buckets
    pub async fn update_record(&self, id: &str, update: RecordUpdate) -> StorageResult<Record> {
        if let Patch::Set(entity_id) = &update.entity_id {
            self.entities.require(entity_id)?;
        }

        let _guard = self.serializer.begin().await;
        let previous = self
            .records
            .get(id)?
            .ok_or_else(|| StorageError::RecordNotFound(id.to_string()))?;
        let record = update.apply(&previous, self.clock.now())?;

        self.records.put(id, &record)?;
        self.reindex(Some(&previous), Some(&record))?;

        tracing::debug!(
            "Updated record {} ({} → {})",
            id,
            previous.day_key,
            record.day_key
        );
        Ok(record)
    }

    /// Delete a record; returns false if it did not exist
    pub async fn delete_record(&self, id: &str) -> StorageResult<bool> {
        let _guard = self.serializer.begin().await;
        let Some(previous) = self.records.get(id)? else {
            return Ok(false);
        };

        self.records.delete(id)?;
        self.reindex(Some(&previous), None)?;

        tracing::debug!("Deleted record {} from {}", id, previous.day_key);
        Ok(true)
    }

    /// Replace the reasons attached to a record
    pub async fn replace_reasons(&self, id: &str, reasons: Vec<String>) -> StorageResult<Record> {
        let _guard = self.serializer.begin().await;
        let mut record = self
            .records
            .get(id)?
            .ok_or_else(|| StorageError::RecordNotFound(id.to_string()))?;

        let mut unique = Vec::with_capacity(reasons.len());
        for reason in reasons {
            if !unique.contains(&reason) {
                unique.push(reason);
            }
        }
        record.reasons = unique;
        record.updated_at = self.clock.now();
        self.records.put(id, &record)?;

        Ok(record)
    }

    /// Read a record straight from the store
    pub fn get_record(&self, id: &str) -> StorageResult<Option<Record>> {
        self.records.get(id)
    }

    /// Move `previous` out of and `next` into the indexes
    ///
    /// Must be called while holding a mutation guard. Records older than
    /// `indexed_from` stay out of the indexes; they only push `oldest_data`
    /// back and reopen backfill.
    fn reindex(&self, previous: Option<&Record>, next: Option<&Record>) -> StorageResult<()> {
        let meta = {
            let state = self.state()?;
            if !state.ready {
                // The bootstrap will pick everything up from the store
                return Ok(());
            }
            state.meta.clone()
        };
        let now = self.clock.now();

        if let Some(previous) = previous {
            if meta.covers(previous.day_key) {
                self.indexes.unindex_record(previous, now)?;
            }
        }

        if let Some(next) = next {
            let day = next.day_key;
            if meta.covers(day) {
                self.indexes.index_record(next, now)?;
                let stale = meta.last_indexed.map_or(true, |last| day > last)
                    || meta.oldest_data.map_or(true, |oldest| day < oldest);
                if stale {
                    self.update_meta(|m| {
                        m.note_indexed(day);
                        m.refresh_complete();
                    })?;
                }
            } else if meta.oldest_data.map_or(true, |oldest| day < oldest) {
                tracing::debug!(
                    "Record {} on {} is older than indexed_from {:?}; backfill reopened",
                    next.id,
                    day,
                    meta.indexed_from.map(|d| d.to_string())
                );
                self.update_meta(|m| m.note_unindexed(day))?;
            }
        }

        Ok(())
    }
}
