//! Core data types for the daybook storage engine
//!
//! This module defines the fundamental types used throughout the storage layer:
//! - `DayKey`: A calendar day in `YYYYMMDD` form, the key of every index
//! - `DayRange`: An inclusive range of day keys for queries
//! - `Record`: A single tracked entry (one behavior occurrence)
//! - `NewRecord` / `RecordUpdate`: Creation input and partial-update patch
//! - `EntityConfig`: The category a record belongs to

use crate::storage::error::{StorageError, StorageResult};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator used by composite `(entity, day)` keys; forbidden in entity ids
pub const ENTITY_KEY_SEPARATOR: char = '|';

/// Intensities are on a 1-10 scale
pub const MIN_INTENSITY: u8 = 1;
pub const MAX_INTENSITY: u8 = 10;

/// A calendar day encoded as the integer `YYYYMMDD`
///
/// Always holds a valid calendar date. The `Display` form is the zero-padded
/// 8-digit string, which is also the key used by the index tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DayKey(u32);

impl DayKey {
    /// Last representable day
    pub const MAX: DayKey = DayKey(99_991_231);

    /// Build from a calendar date; years outside `0..=9999` have no 8-digit form
    pub fn from_date(date: NaiveDate) -> StorageResult<Self> {
        let year = u32::try_from(date.year())
            .ok()
            .filter(|year| *year <= 9999)
            .ok_or_else(|| StorageError::InvalidDayKey(date.to_string()))?;
        Ok(Self(year * 10_000 + date.month() * 100 + date.day()))
    }

    /// Day key of a timestamp, using the timestamp's own (local) offset
    pub fn from_datetime(at: &DateTime<FixedOffset>) -> StorageResult<Self> {
        Self::from_date(at.date_naive())
    }

    /// Build from year, month and day
    pub fn from_ymd(year: i32, month: u32, day: u32) -> StorageResult<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| StorageError::InvalidDayKey(format!("{:04}{:02}{:02}", year, month, day)))
            .and_then(Self::from_date)
    }

    /// Parse an 8-digit `YYYYMMDD` string
    pub fn parse(s: &str) -> StorageResult<Self> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StorageError::InvalidDayKey(s.to_string()));
        }
        let raw: u32 = s
            .parse()
            .map_err(|_| StorageError::InvalidDayKey(s.to_string()))?;
        Self::try_from(raw)
    }

    /// The calendar date this key represents
    pub fn to_date(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(
            (self.0 / 10_000) as i32,
            (self.0 / 100) % 100,
            self.0 % 100,
        )
        .unwrap_or_default()
    }

    /// Shift by a (possibly negative) number of days; stays put past year 0 or 9999
    pub fn add_days(self, days: i64) -> Self {
        self.to_date()
            .checked_add_signed(Duration::days(days))
            .and_then(|date| Self::from_date(date).ok())
            .unwrap_or(self)
    }

    /// The previous calendar day
    pub fn pred(self) -> Self {
        self.add_days(-1)
    }

    /// Signed number of days from `self` to `other`
    pub fn days_until(self, other: DayKey) -> i64 {
        (other.to_date() - self.to_date()).num_days()
    }

    /// Raw integer form
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for DayKey {
    type Error = StorageError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        let valid = NaiveDate::from_ymd_opt((raw / 10_000) as i32, (raw / 100) % 100, raw % 100)
            .is_some();
        if valid {
            Ok(Self(raw))
        } else {
            Err(StorageError::InvalidDayKey(format!("{:08}", raw)))
        }
    }
}

impl From<DayKey> for u32 {
    fn from(key: DayKey) -> Self {
        key.0
    }
}

impl FromStr for DayKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

/// Inclusive range of day keys `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub start: DayKey,
    pub end: DayKey,
}

impl DayRange {
    /// Create a range, rejecting inverted bounds
    pub fn new(start: DayKey, end: DayKey) -> StorageResult<Self> {
        if start > end {
            return Err(StorageError::InvalidDayRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// A single-day range
    pub fn single(day: DayKey) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// Check if a day falls inside the range
    pub fn contains(&self, day: DayKey) -> bool {
        day >= self.start && day <= self.end
    }

    /// Overlap of two ranges, if any
    pub fn intersect(&self, other: &DayRange) -> Option<DayRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(DayRange { start, end })
    }

    /// Iterate every day in the range, oldest first
    pub fn days(&self) -> impl Iterator<Item = DayKey> {
        let end = self.end;
        std::iter::successors(Some(self.start), move |d| {
            let next = d.add_days(1);
            (next <= end && next != *d).then_some(next)
        })
    }

    /// Number of days covered
    pub fn len_days(&self) -> i64 {
        self.start.days_until(self.end) + 1
    }
}

/// A single tracked entry
///
/// The id, entity and day key are what the indexes care about; the rest is
/// payload. `day_key` is always recomputed from `occurred_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Stable unique id
    pub id: String,
    /// Entity (behavior / category) this entry belongs to
    pub entity_id: String,
    /// When it happened, in the user's local offset
    pub occurred_at: DateTime<FixedOffset>,
    /// Denormalized local day of `occurred_at`
    pub day_key: DayKey,
    /// Duration in minutes, never negative (summed by daily summaries)
    pub duration_minutes: i64,
    /// Optional 1-10 intensity (averaged by daily summaries)
    pub intensity: Option<u8>,
    /// Free-form note
    pub note: Option<String>,
    /// Related reason ids
    pub reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Value summed into `DailySummary::total_duration`
    pub fn secondary_metric(&self) -> i64 {
        self.duration_minutes
    }

    /// Value summed into `DailySummary::intensity_sum`, when present
    pub fn tertiary_metric(&self) -> Option<i64> {
        self.intensity.map(i64::from)
    }

    /// Reject values the daily summaries cannot aggregate
    ///
    /// Summary counters only ever move by non-negative amounts, so a row's
    /// totals do not depend on the order records are applied in.
    pub fn validate(&self) -> StorageResult<()> {
        if self.duration_minutes < 0 {
            return Err(StorageError::InvalidRecord(format!(
                "duration_minutes must not be negative (got {})",
                self.duration_minutes
            )));
        }
        if let Some(intensity) = self.intensity {
            if !(MIN_INTENSITY..=MAX_INTENSITY).contains(&intensity) {
                return Err(StorageError::InvalidRecord(format!(
                    "intensity must be {}-{} (got {})",
                    MIN_INTENSITY, MAX_INTENSITY, intensity
                )));
            }
        }
        Ok(())
    }
}

/// Input for creating a record
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: Option<String>,
    pub entity_id: String,
    pub occurred_at: DateTime<FixedOffset>,
    pub duration_minutes: i64,
    pub intensity: Option<u8>,
    pub note: Option<String>,
    pub reasons: Vec<String>,
}

impl NewRecord {
    /// Create with required fields
    pub fn new(entity_id: impl Into<String>, occurred_at: DateTime<FixedOffset>) -> Self {
        Self {
            id: None,
            entity_id: entity_id.into(),
            occurred_at,
            duration_minutes: 0,
            intensity: None,
            note: None,
            reasons: Vec::new(),
        }
    }

    /// Builder: use a caller-chosen id instead of a generated one
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Builder: set duration
    pub fn duration(mut self, minutes: i64) -> Self {
        self.duration_minutes = minutes;
        self
    }

    /// Builder: set intensity
    pub fn intensity(mut self, intensity: u8) -> Self {
        self.intensity = Some(intensity);
        self
    }

    /// Builder: set note
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Builder: set reasons
    pub fn reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }

    /// Materialize into a validated record
    pub fn into_record(self, now: DateTime<Utc>) -> StorageResult<Record> {
        let record = Record {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            entity_id: self.entity_id,
            day_key: DayKey::from_datetime(&self.occurred_at)?,
            occurred_at: self.occurred_at,
            duration_minutes: self.duration_minutes,
            intensity: self.intensity,
            note: self.note,
            reasons: self.reasons,
            created_at: now,
            updated_at: now,
        };
        record.validate()?;
        Ok(record)
    }
}

/// A single field of a partial update
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Patch<T> {
    /// Leave the field untouched
    #[default]
    Keep,
    /// Replace the field
    Set(T),
}

impl<T> Patch<T> {
    /// Apply onto a field in place
    pub fn apply_to(self, field: &mut T) {
        if let Patch::Set(value) = self {
            *field = value;
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

/// Partial update of a record
///
/// Nullable fields use `Patch<Option<T>>`, so `Set(None)` clears a value while
/// `Keep` leaves it alone.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub entity_id: Patch<String>,
    pub occurred_at: Patch<DateTime<FixedOffset>>,
    pub duration_minutes: Patch<i64>,
    pub intensity: Patch<Option<u8>>,
    pub note: Patch<Option<String>>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Patch::Set(entity_id.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<FixedOffset>) -> Self {
        self.occurred_at = Patch::Set(at);
        self
    }

    pub fn duration(mut self, minutes: i64) -> Self {
        self.duration_minutes = Patch::Set(minutes);
        self
    }

    pub fn intensity(mut self, intensity: Option<u8>) -> Self {
        self.intensity = Patch::Set(intensity);
        self
    }

    pub fn note(mut self, note: Option<String>) -> Self {
        self.note = Patch::Set(note);
        self
    }

    /// Apply onto a copy of `record`, recomputing the day key and revalidating
    pub fn apply(self, record: &Record, now: DateTime<Utc>) -> StorageResult<Record> {
        let mut next = record.clone();
        self.entity_id.apply_to(&mut next.entity_id);
        self.occurred_at.apply_to(&mut next.occurred_at);
        self.duration_minutes.apply_to(&mut next.duration_minutes);
        self.intensity.apply_to(&mut next.intensity);
        self.note.apply_to(&mut next.note);
        next.day_key = DayKey::from_datetime(&next.occurred_at)?;
        next.updated_at = now;
        next.validate()?;
        Ok(next)
    }
}

/// Definition of an entity records are attached to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityConfig {
    /// Unique identifier (no `|`)
    pub id: String,
    /// Human-readable name (e.g., "meditation", "late snack")
    pub name: String,
    /// Inactive entities keep their history but are hidden by hosts
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl EntityConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Check an entity id is usable as part of a composite key
    pub fn validate_id(id: &str) -> StorageResult<()> {
        if id.is_empty() || id.contains(ENTITY_KEY_SEPARATOR) {
            return Err(StorageError::InvalidEntityId(id.to_string()));
        }
        Ok(())
    }
}
