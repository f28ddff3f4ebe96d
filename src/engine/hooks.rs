//! Host integration hooks
//!
//! - **Clock**: what "today" is, so the recent window is testable
//! - **YieldPoint**: called every N records during long scans so a
//!   cooperative host can run other work in between

use crate::storage::DayKey;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of the current time and local calendar day
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Local calendar day
    fn today(&self) -> DayKey;
}

/// Wall clock in the host's local time zone
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> DayKey {
        // Only fails past year 9999
        DayKey::from_date(Local::now().date_naive()).unwrap_or(DayKey::MAX)
    }
}

/// A settable clock; `now` stays the real time, `today` is pinned
#[derive(Debug, Clone)]
pub struct FixedClock {
    today: Arc<Mutex<DayKey>>,
}

impl FixedClock {
    pub fn new(today: DayKey) -> Self {
        Self {
            today: Arc::new(Mutex::new(today)),
        }
    }

    /// Move the pinned day
    pub fn set_today(&self, today: DayKey) {
        if let Ok(mut current) = self.today.lock() {
            *current = today;
        }
    }

    /// Advance the pinned day
    pub fn advance_days(&self, days: i64) {
        if let Ok(mut current) = self.today.lock() {
            *current = current.add_days(days);
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> DayKey {
        self.today
            .lock()
            .map(|day| *day)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Cooperative yield invoked from scan loops
#[async_trait]
pub trait YieldPoint: Send + Sync {
    async fn yield_now(&self);
}

/// Gives the tokio scheduler a chance to run other tasks
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioYield;

#[async_trait]
impl YieldPoint for TokioYield {
    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }
}

/// Never yields (batch tools, benchmarks)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoYield;

#[async_trait]
impl YieldPoint for NoYield {
    async fn yield_now(&self) {}
}

/// Sleeps at every yield point; stretches scans out so overlap is observable
#[derive(Debug, Clone, Copy)]
pub struct SleepYield(pub Duration);

#[async_trait]
impl YieldPoint for SleepYield {
    async fn yield_now(&self) {
        tokio::time::sleep(self.0).await;
    }
}

/// Counts records and yields every `every` of them
pub(crate) struct YieldCounter<'a> {
    hook: &'a dyn YieldPoint,
    every: usize,
    seen: usize,
}

impl<'a> YieldCounter<'a> {
    pub(crate) fn new(hook: &'a dyn YieldPoint, every: usize) -> Self {
        Self {
            hook,
            every: every.max(1),
            seen: 0,
        }
    }

    pub(crate) async fn tick(&mut self) {
        self.seen += 1;
        if self.seen % self.every == 0 {
            self.hook.yield_now().await;
        }
    }
}
