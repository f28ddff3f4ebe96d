//! Bootstrap and integrity verification
//!
//! - **Bootstrap**: one pass over every record; indexes the recent window
//!   and learns the oldest day with data
//! - **Integrity check**: recomputes the indexes for `[indexed_from, ∞)` from
//!   the record store and diffs them against what is persisted
//!
//! Days older than `indexed_from` are never verified; reads there always
//! scan, so there is nothing to trust.

use crate::engine::hooks::YieldCounter;
use crate::engine::Engine;
use crate::index::{EntityDateIndex, IndexDelta, SummaryKey, INDEX_SCHEMA_VERSION};
use crate::storage::{DayKey, Record, StorageResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Result of one pass over the record store
pub(crate) struct ScanOutcome {
    pub delta: IndexDelta,
    /// Oldest day across every record, kept or not
    pub oldest: Option<DayKey>,
    /// Newest day among kept records
    pub newest: Option<DayKey>,
    pub scanned: usize,
}

/// Outcome of comparing persisted indexes with a recomputation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Day from which indexes were verified
    pub verified_from: Option<DayKey>,
    /// Records inside the verified range
    pub records_checked: usize,
    pub date_mismatches: usize,
    pub entity_date_mismatches: usize,
    pub summary_mismatches: usize,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.date_mismatches == 0 && self.entity_date_mismatches == 0 && self.summary_mismatches == 0
    }
}

/// Count keys whose id sets differ between `persisted` and `expected`
fn diff_buckets(
    persisted: impl IntoIterator<Item = (String, Vec<String>)>,
    expected: &BTreeMap<String, BTreeSet<String>>,
) -> usize {
    let persisted: BTreeMap<String, BTreeSet<String>> = persisted
        .into_iter()
        .map(|(key, ids)| (key, ids.into_iter().collect()))
        .collect();

    let keys: BTreeSet<&String> = persisted.keys().chain(expected.keys()).collect();
    keys.into_iter()
        .filter(|key| persisted.get(*key) != expected.get(*key))
        .count()
}

impl Engine {
    /// Build indexes if they are not ready yet
    pub async fn initialize(&self) -> StorageResult<()> {
        let ready = self.state()?.ready;
        if ready {
            return Ok(());
        }

        let _guard = self.serializer.begin().await;
        // Someone else may have finished while we queued
        let ready = self.state()?.ready;
        if ready {
            return Ok(());
        }
        self.bootstrap_locked().await
    }

    /// Discard all derived state and rebuild the recent window
    pub async fn rebuild_indexes_from_scratch(&self) -> StorageResult<()> {
        let _guard = self.serializer.begin().await;
        tracing::info!("Rebuilding indexes from scratch");
        self.bootstrap_locked().await
    }

    /// Run the integrity check now and act on its result
    pub async fn verify_integrity(&self) -> StorageResult<IntegrityReport> {
        let _guard = self.serializer.begin().await;
        let report = self.check_integrity_locked().await?;
        self.apply_integrity_report(&report)?;
        Ok(report)
    }

    /// Must be called while holding a mutation guard
    async fn bootstrap_locked(&self) -> StorageResult<()> {
        let today = self.clock.today();
        let floor = today.add_days(-(i64::from(self.config.window_days) - 1));

        let outcome = self.scan_for_index(|day| day >= floor).await?;
        self.indexes.replace_all(&outcome.delta)?;

        let indexed_from = outcome.oldest.map_or(floor, |oldest| oldest.max(floor));
        let last_indexed = outcome.newest.map_or(today, |newest| newest.max(today));

        let meta = {
            let mut state = self.state_mut()?;
            state.meta.indexed_from = Some(indexed_from);
            state.meta.oldest_data = outcome.oldest;
            state.meta.last_indexed = Some(last_indexed);
            state.meta.rebuild_needed = false;
            state.meta.schema_version = INDEX_SCHEMA_VERSION;
            state.meta.refresh_complete();
            self.indexes.meta().save(&state.meta)?;

            state.ready = true;
            state.use_indexed_reads = true;
            // Freshly computed from source, nothing to verify
            state.integrity_checked = true;
            state.meta.clone()
        };

        tracing::info!(
            "Bootstrap indexed {} of {} records (indexed_from {}, oldest {:?}, complete {})",
            outcome.delta.records,
            outcome.scanned,
            indexed_from,
            meta.oldest_data.map(|d| d.to_string()),
            meta.backfill_complete
        );
        Ok(())
    }

    /// Must be called while holding a mutation guard
    pub(crate) async fn check_integrity_locked(&self) -> StorageResult<IntegrityReport> {
        let indexed_from = self.state()?.meta.indexed_from;

        if self.records.is_empty()? {
            return Ok(IntegrityReport {
                verified_from: indexed_from,
                ..Default::default()
            });
        }

        let Some(from) = indexed_from else {
            // Records exist but no coverage was ever recorded
            return Ok(IntegrityReport {
                date_mismatches: 1,
                ..Default::default()
            });
        };

        let outcome = self.scan_for_index(|day| day >= from).await?;
        let expected = outcome.delta;

        let persisted_dates = self
            .indexes
            .dates()
            .entries()?
            .into_iter()
            .filter(|(key, _)| DayKey::parse(key).map_or(true, |day| day >= from));
        let persisted_entity_dates = self
            .indexes
            .entity_dates()
            .entries()?
            .into_iter()
            .filter(|(key, _)| EntityDateIndex::day_of(key).map_or(true, |day| day >= from));

        let persisted_summaries: BTreeMap<SummaryKey, _> = self
            .indexes
            .summaries()
            .all()?
            .into_iter()
            .filter(|summary| summary.day_key >= from)
            .map(|summary| (summary.key(), summary))
            .collect();
        let summary_keys: BTreeSet<&SummaryKey> = persisted_summaries
            .keys()
            .chain(expected.summaries.keys())
            .collect();
        let summary_mismatches = summary_keys
            .into_iter()
            .filter(|key| {
                match (persisted_summaries.get(*key), expected.summaries.get(*key)) {
                    (Some(a), Some(b)) => !a.same_aggregates(b),
                    _ => true,
                }
            })
            .count();

        Ok(IntegrityReport {
            verified_from: Some(from),
            records_checked: expected.records,
            date_mismatches: diff_buckets(persisted_dates, &expected.dates),
            entity_date_mismatches: diff_buckets(persisted_entity_dates, &expected.entity_dates),
            summary_mismatches,
        })
    }

    /// Trust the indexes, or fall back to scans until the next rebuild
    fn apply_integrity_report(&self, report: &IntegrityReport) -> StorageResult<()> {
        let mut state = self.state_mut()?;
        state.integrity_checked = true;
        if report.is_consistent() {
            tracing::debug!(
                "Integrity check passed ({} records from {:?})",
                report.records_checked,
                report.verified_from.map(|d| d.to_string())
            );
            return Ok(());
        }

        tracing::warn!(
            "Index integrity mismatch (dates {}, entity dates {}, summaries {}); using scans until rebuild",
            report.date_mismatches,
            report.entity_date_mismatches,
            report.summary_mismatches
        );
        state.use_indexed_reads = false;
        state.meta.rebuild_needed = true;
        self.indexes.meta().save(&state.meta)
    }

    /// Whether reads may use the indexes, running the lazy integrity check once
    ///
    /// Never waits on the serializer: if a mutation holds it, this read scans
    /// and a later read performs the check.
    pub(crate) async fn indexed_reads_enabled(&self) -> bool {
        let (ready, enabled, checked) = match self.state() {
            Ok(state) => (state.ready, state.use_indexed_reads, state.integrity_checked),
            Err(_) => return false,
        };
        if !ready || !enabled {
            return false;
        }
        if checked {
            return true;
        }

        let Some(_guard) = self.serializer.try_begin() else {
            return false;
        };
        let checked = self.state().map(|s| s.integrity_checked).unwrap_or(false);
        if !checked {
            let result = self.check_integrity_locked().await;
            let applied = match result {
                Ok(report) => self.apply_integrity_report(&report),
                Err(e) => {
                    tracing::warn!("Integrity check failed to run: {}", e);
                    self.apply_integrity_report(&IntegrityReport {
                        date_mismatches: 1,
                        ..Default::default()
                    })
                }
            };
            if let Err(e) = applied {
                tracing::warn!("Failed to record integrity result: {}", e);
            }
        }

        self.state().map(|s| s.use_indexed_reads).unwrap_or(false)
    }

    /// Walk every record once, accumulating those whose day passes `keep`
    pub(crate) async fn scan_for_index<F>(&self, keep: F) -> StorageResult<ScanOutcome>
    where
        F: Fn(DayKey) -> bool + Send,
    {
        let now = self.clock.now();
        let raw = self.records.raw_values()?;
        let mut yields = YieldCounter::new(self.yield_point.as_ref(), self.config.yield_every);
        let mut outcome = ScanOutcome {
            delta: IndexDelta::new(),
            oldest: None,
            newest: None,
            scanned: 0,
        };

        for bytes in &raw {
            let record: Record = self.records.decode(bytes)?;
            let day = record.day_key;
            outcome.scanned += 1;
            if outcome.oldest.map_or(true, |oldest| day < oldest) {
                outcome.oldest = Some(day);
            }
            if keep(day) {
                if outcome.newest.map_or(true, |newest| day > newest) {
                    outcome.newest = Some(day);
                }
                outcome.delta.add(&record, now);
            }
            yields.tick().await;
        }

        Ok(outcome)
    }

    /// Walk every record once, collecting those that pass `keep`
    pub(crate) async fn scan_records<F>(&self, keep: F) -> StorageResult<Vec<Record>>
    where
        F: Fn(&Record) -> bool + Send,
    {
        let raw = self.records.raw_values()?;
        let mut yields = YieldCounter::new(self.yield_point.as_ref(), self.config.yield_every);
        let mut matched = Vec::new();

        for bytes in &raw {
            let record: Record = self.records.decode(bytes)?;
            if keep(&record) {
                matched.push(record);
            }
            yields.tick().await;
        }

        Ok(matched)
    }
}
