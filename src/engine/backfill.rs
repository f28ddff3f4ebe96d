//! Backfill scheduler
//!
//! Pushes `indexed_from` backward toward `oldest_data` one chunk of days at a
//! time. Each chunk is a single serialized mutation that scans the record
//! store once and merges its findings into the existing indexes, so progress
//! is resumable across restarts and never blocks callers for more than one
//! chunk.

use crate::engine::Engine;
use crate::storage::{DayKey, StorageError, StorageResult};
use std::sync::Arc;
use tokio::time::interval;

impl Engine {
    /// Index the next `chunk_days` days below `indexed_from`
    ///
    /// Returns whether progress was made. Returns `false` without doing any
    /// work when indexing is not ready, indexed reads are disabled, backfill is
    /// paused, or it is already complete.
    pub async fn backfill_next_chunk(&self, chunk_days: u32) -> StorageResult<bool> {
        if chunk_days == 0 {
            return Err(StorageError::InvalidChunkSize(chunk_days));
        }

        let _guard = self.serializer.begin().await;

        let (indexed_from, oldest) = {
            let state = self.state()?;
            if !state.ready || !state.use_indexed_reads {
                return Ok(false);
            }
            if state.meta.backfill_paused || state.meta.backfill_complete {
                return Ok(false);
            }
            (state.meta.indexed_from, state.meta.oldest_data)
        };

        let (Some(indexed_from), Some(oldest)) = (indexed_from, oldest) else {
            tracing::warn!("Backfill boundaries missing; marking indexes for rebuild");
            self.update_meta(|meta| meta.rebuild_needed = true)?;
            return Ok(false);
        };

        if indexed_from <= oldest {
            self.update_meta(|meta| meta.backfill_complete = true)?;
            return Ok(false);
        }

        let chunk_end = indexed_from.pred();
        let chunk_start = oldest.max(chunk_end.add_days(-(i64::from(chunk_days) - 1)));

        let outcome = self
            .scan_for_index(|day| day >= chunk_start && day <= chunk_end)
            .await?;
        self.indexes.merge(&outcome.delta)?;

        let meta = self.update_meta(|meta| {
            meta.indexed_from = Some(chunk_start);
            meta.backfill_complete = chunk_start <= oldest;
        })?;

        tracing::debug!(
            "Backfilled {}..={} ({} records, {} scanned)",
            chunk_start,
            chunk_end,
            outcome.delta.records,
            outcome.scanned
        );
        if meta.backfill_complete {
            tracing::info!("Backfill complete; indexes cover everything since {}", chunk_start);
        }

        Ok(true)
    }

    /// Call `backfill_next_chunk` until it stops making progress
    ///
    /// Bounded by `max_backfill_iterations`; returns the number of chunks done.
    pub async fn run_backfill(&self, chunk_days: u32) -> StorageResult<usize> {
        let mut chunks = 0;
        while chunks < self.config.max_backfill_iterations {
            if self.is_shutdown() || !self.backfill_next_chunk(chunk_days).await? {
                return Ok(chunks);
            }
            chunks += 1;
        }

        tracing::warn!(
            "Backfill stopped after {} chunks without completing",
            self.config.max_backfill_iterations
        );
        Ok(chunks)
    }

    /// Days still waiting for backfill, if known
    pub fn backfill_remaining_days(&self) -> StorageResult<Option<i64>> {
        let meta = self.index_meta()?;
        Ok(match (meta.oldest_data, meta.indexed_from) {
            (Some(oldest), Some(from)) => Some(oldest.days_until(from).max(0)),
            _ => None,
        })
    }

    /// Start periodic background backfill
    pub fn start_background_backfill(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = engine.config.backfill_interval;
        let chunk_days = engine.config.backfill_chunk_days;

        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                ticker.tick().await;

                // Check shutdown
                if engine.is_shutdown() {
                    break;
                }

                match engine.run_backfill(chunk_days).await {
                    Ok(0) => {}
                    Ok(chunks) => tracing::debug!("Background backfill ran {} chunks", chunks),
                    Err(e) => tracing::error!("Background backfill failed: {}", e),
                }
            }
        })
    }

    /// The day `backfill_next_chunk` would stop at next, if any
    pub fn next_backfill_range(&self, chunk_days: u32) -> StorageResult<Option<(DayKey, DayKey)>> {
        let meta = self.index_meta()?;
        if meta.backfill_complete || chunk_days == 0 {
            return Ok(None);
        }
        Ok(match (meta.indexed_from, meta.oldest_data) {
            (Some(from), Some(oldest)) if from > oldest => {
                let end = from.pred();
                Some((oldest.max(end.add_days(-(i64::from(chunk_days) - 1))), end))
            }
            _ => None,
        })
    }
}
