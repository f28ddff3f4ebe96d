//! Daybook Index Structures
//!
//! Derived, rebuildable state over the record store:
//!
//! - **DateIndex**: day → record ids
//! - **EntityDateIndex**: (entity, day) → record ids
//! - **SummaryTable**: (entity, day) → rolling aggregates
//! - **MetaStore**: how far back the above can be trusted
//!
//! # Architecture
//!
//! ```text
//! Query: "walk entries, 2024-01-01 .. 2024-01-07"
//!        ↓
//! IndexMeta: is 2024-01-01 ≥ indexed_from?
//!        ↓ yes                      ↓ no
//! EntityDateIndex → ids       scan record store, filter by day
//!        ↓
//! Record store point reads → Fast!
//! ```
//!
//! Indexes only hold ids; the record store owns every record, so all of this
//! can be thrown away and rebuilt at any time.

mod delta;
mod manager;
mod meta;
mod set_index;
mod summary;

pub use delta::IndexDelta;
pub use manager::{IndexManager, IndexStats};
pub use meta::{IndexMeta, MetaStore, INDEX_SCHEMA_VERSION};
pub use set_index::{BucketMap, DateIndex, EntityDateIndex, SetIndex};
pub use summary::{DailySummary, Sign, SummaryKey, SummaryMap, SummaryTable};
