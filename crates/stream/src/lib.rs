//! Monitor Stream
//!
//! Per-unit sequence tracking with gap detection, and the gap queue that
//! drives history backfill.

#![warn(missing_docs)]

pub mod error;
pub mod gap;
pub mod topology;
pub mod tracker;

pub use error::{StreamError, StreamResult};
pub use gap::{plan_page, GapCursor, GapQueue, GapRecord, PageSpan, MAX_PAGE_SPAN};
pub use topology::{Topology, UnitState};
pub use tracker::{Acceptance, Decision, SequenceTracker, TrackerMetrics};
