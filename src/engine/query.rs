//! Query router
//!
//! Every read is split against the indexed coverage `[indexed_from, today]`:
//! the covered part comes from the indexes, anything outside it is scanned.
//! Indexed results are only kept if no mutation overlapped them; otherwise the
//! whole read is redone as a scan.

use crate::engine::{Engine, ReadTicket};
use crate::index::{DailySummary, Sign, SummaryKey, SummaryMap};
use crate::storage::{DayKey, DayRange, Record, StorageResult};
use std::sync::atomic::Ordering;

/// Which entities a summary range covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryScope {
    All,
    Entity(String),
}

impl SummaryScope {
    fn matches(&self, entity_id: &str) -> bool {
        match self {
            SummaryScope::All => true,
            SummaryScope::Entity(id) => id == entity_id,
        }
    }
}

/// The indexed portion of a read plus the ticket guarding it
struct IndexedPart {
    range: DayRange,
    ticket: ReadTicket,
}

impl IndexedPart {
    fn contains(part: &Option<IndexedPart>, day: DayKey) -> bool {
        part.as_ref().is_some_and(|p| p.range.contains(day))
    }

    /// Whether nothing in `range` needs scanning
    fn covers(part: &Option<IndexedPart>, range: &DayRange) -> bool {
        part.as_ref().is_some_and(|p| p.range == *range)
    }
}

impl Engine {
    /// Records on one day, ordered by time
    pub async fn get_by_day_key(&self, day: DayKey) -> StorageResult<Vec<Record>> {
        self.get_by_date_range(day, day).await
    }

    /// Records on every day in `[start, end]`, ordered by time
    pub async fn get_by_date_range(&self, start: DayKey, end: DayKey) -> StorageResult<Vec<Record>> {
        let range = DayRange::new(start, end)?;
        self.read_records(&range, |_| true, |part| self.indexes.dates().get_range(part))
            .await
    }

    /// One entity's records on every day in `[start, end]`, ordered by time
    pub async fn get_by_entity_day_range(
        &self,
        entity_id: &str,
        start: DayKey,
        end: DayKey,
    ) -> StorageResult<Vec<Record>> {
        let range = DayRange::new(start, end)?;
        self.entities.require(entity_id)?;
        self.read_records(
            &range,
            |record| record.entity_id == entity_id,
            |part| self.indexes.entity_dates().get_range(entity_id, part),
        )
        .await
    }

    /// Aggregates of one entity on one day; zeroed if it has no records
    pub async fn get_daily_summary(&self, entity_id: &str, day: DayKey) -> StorageResult<DailySummary> {
        let rows = self
            .get_daily_summary_range(SummaryScope::Entity(entity_id.to_string()), day, day)
            .await?;
        let key = SummaryKey::new(entity_id, day);
        Ok(rows
            .get(&key)
            .cloned()
            .unwrap_or_else(|| DailySummary::empty(entity_id, day, self.clock.now())))
    }

    /// Non-empty aggregates in `[start, end]`, keyed by (entity, day)
    pub async fn get_daily_summary_range(
        &self,
        scope: SummaryScope,
        start: DayKey,
        end: DayKey,
    ) -> StorageResult<SummaryMap> {
        let range = DayRange::new(start, end)?;
        if let SummaryScope::Entity(entity_id) = &scope {
            self.entities.require(entity_id)?;
        }

        let part = self.plan(&range).await?;
        let mut rows = if IndexedPart::covers(&part, &range) {
            SummaryMap::new()
        } else {
            self.scan_summaries(&scope, |day| {
                range.contains(day) && !IndexedPart::contains(&part, day)
            })
            .await?
        };

        let Some(part) = part else {
            self.note_read(true);
            return Ok(rows);
        };

        let indexed = match &scope {
            SummaryScope::All => {
                let entities = self.entities.all()?;
                self.indexes
                    .summaries()
                    .all_range(entities.iter().map(|e| e.id.as_str()), &part.range)?
            }
            SummaryScope::Entity(entity_id) => {
                self.indexes.summaries().entity_range(entity_id, &part.range)?
            }
        };

        if !self.serializer.validate(part.ticket) {
            self.reads.invalidated.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Summary read overlapped a mutation; rescanning {}..={}", start, end);
            self.note_read(true);
            return self.scan_summaries(&scope, |day| range.contains(day)).await;
        }

        self.note_read(part.range != range);
        rows.extend(indexed);
        Ok(rows)
    }

    /// Shared routing for record reads
    async fn read_records<K, L>(&self, range: &DayRange, keep: K, lookup: L) -> StorageResult<Vec<Record>>
    where
        K: Fn(&Record) -> bool + Sync,
        L: Fn(&DayRange) -> StorageResult<Vec<String>> + Sync,
    {
        let part = self.plan(range).await?;
        let mut records = if IndexedPart::covers(&part, range) {
            Vec::new()
        } else {
            self.scan_records(|record| {
                range.contains(record.day_key)
                    && !IndexedPart::contains(&part, record.day_key)
                    && keep(record)
            })
            .await?
        };

        if let Some(part) = &part {
            let ids = lookup(&part.range)?;
            let indexed = self.load_records(ids)?;

            if !self.serializer.validate(part.ticket) {
                self.reads.invalidated.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Indexed read overlapped a mutation; rescanning {}..={}",
                    range.start,
                    range.end
                );
                records = self
                    .scan_records(|record| range.contains(record.day_key) && keep(record))
                    .await?;
                self.note_read(true);
                sort_records(&mut records);
                return Ok(records);
            }

            self.note_read(part.range != *range);
            records.extend(indexed);
        } else {
            self.note_read(true);
        }

        sort_records(&mut records);
        Ok(records)
    }

    /// Decide which part of `range` may be served from the indexes
    async fn plan(&self, range: &DayRange) -> StorageResult<Option<IndexedPart>> {
        if !self.indexed_reads_enabled().await {
            return Ok(None);
        }
        let Some(ticket) = self.serializer.read_ticket() else {
            return Ok(None);
        };

        let Some(indexed_from) = self.state()?.meta.indexed_from else {
            return Ok(None);
        };
        let today = self.clock.today();
        if indexed_from > today {
            return Ok(None);
        }

        let coverage = DayRange::new(indexed_from, today)?;
        Ok(range
            .intersect(&coverage)
            .map(|range| IndexedPart { range, ticket }))
    }

    /// Point reads for index hits; ids without a record are skipped
    fn load_records(&self, ids: Vec<String>) -> StorageResult<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.records.get(&id)? {
                Some(record) => records.push(record),
                None => tracing::warn!("Index references missing record {}", id),
            }
        }
        Ok(records)
    }

    /// Aggregate scanned records whose day passes `keep`
    async fn scan_summaries<F>(&self, scope: &SummaryScope, keep: F) -> StorageResult<SummaryMap>
    where
        F: Fn(DayKey) -> bool + Sync,
    {
        let now = self.clock.now();
        let records = self
            .scan_records(|record| keep(record.day_key) && scope.matches(&record.entity_id))
            .await?;

        let mut rows = SummaryMap::new();
        for record in &records {
            rows.entry(SummaryKey::of(record))
                .or_insert_with(|| DailySummary::empty(record.entity_id.clone(), record.day_key, now))
                .apply(record, Sign::Plus, now);
        }
        Ok(rows)
    }

    fn note_read(&self, scanned: bool) {
        let counter = if scanned {
            &self.reads.scanned
        } else {
            &self.reads.indexed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn sort_records(records: &mut [Record]) {
    records.sort_by(|a, b| {
        a.occurred_at
            .cmp(&b.occurred_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
