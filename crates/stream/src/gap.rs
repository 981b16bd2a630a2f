//! Gap records, the LIFO gap queue and backfill page planning.
//!
//! A gap is repaired page by page from its newest end towards its oldest
//! end. A page never spans more than [`MAX_PAGE_SPAN`] indices.

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// Maximum number of indices requested by one history page
pub const MAX_PAGE_SPAN: u64 = 100;

/// Inclusive range of indices never received for one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapRecord {
    /// Group name
    pub group: String,
    /// Unit name
    pub unit: String,
    /// First missing index
    pub min_index: u64,
    /// Last missing index
    pub max_index: u64,
}

impl GapRecord {
    /// Create a gap record, rejecting inverted ranges
    pub fn new(
        group: impl Into<String>,
        unit: impl Into<String>,
        min_index: u64,
        max_index: u64,
    ) -> StreamResult<Self> {
        let group = group.into();
        let unit = unit.into();
        if min_index > max_index {
            return Err(StreamError::InvalidRange {
                group,
                unit,
                min: min_index,
                max: max_index,
            });
        }
        Ok(Self {
            group,
            unit,
            min_index,
            max_index,
        })
    }

    /// Number of missing indices, zero for an inverted range
    pub fn span(&self) -> u64 {
        self.max_index
            .checked_sub(self.min_index)
            .map_or(0, |width| width.saturating_add(1))
    }
}

/// Inclusive index span of one history request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    /// Lower bound (`i` query parameter)
    pub from: u64,
    /// Upper bound (`a` query parameter)
    pub to: u64,
}

/// Plan the newest page of the range `[min, max]`.
///
/// An inverted range yields the inverted span `min..=max` unchanged.
pub fn plan_page(min: u64, max: u64) -> PageSpan {
    let from = if max.saturating_sub(min) < MAX_PAGE_SPAN {
        min
    } else {
        max - (MAX_PAGE_SPAN - 1)
    };
    PageSpan { from, to: max }
}

/// Walks one gap record page by page, newest page first
#[derive(Debug, Clone)]
pub struct GapCursor {
    record: GapRecord,
    next_max: Option<u64>,
}

impl GapCursor {
    /// Start at the newest end of the record
    pub fn new(record: GapRecord) -> Self {
        let next_max = Some(record.max_index);
        Self { record, next_max }
    }

    /// Record being repaired
    pub fn record(&self) -> &GapRecord {
        &self.record
    }

    /// Page to fetch next, `None` once the record is fully repaired
    pub fn current_page(&self) -> Option<PageSpan> {
        self.next_max
            .map(|max| plan_page(self.record.min_index, max))
    }

    /// Move past the current page. Returns false when the record is done.
    pub fn advance(&mut self) -> bool {
        if let Some(page) = self.current_page() {
            self.next_max = if page.from == self.record.min_index {
                None
            } else {
                Some(page.from - 1)
            };
        }
        self.next_max.is_some()
    }
}

/// Stack of pending gaps plus the single-flight drain flag
#[derive(Debug, Default)]
pub struct GapQueue {
    stack: Vec<GapRecord>,
    draining: bool,
}

impl GapQueue {
    /// Create an empty, idle queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a gap for repair
    pub fn push(&mut self, gap: GapRecord) {
        self.stack.push(gap);
    }

    /// Claim the drain. Returns true only when the queue was idle and has
    /// work, in which case the caller must start exactly one drain loop.
    pub fn begin_drain(&mut self) -> bool {
        if self.draining || self.stack.is_empty() {
            return false;
        }
        self.draining = true;
        true
    }

    /// Hand the most recently detected gap to the drain loop. Returns
    /// `None` when empty and clears the drain flag.
    pub fn next_for_drain(&mut self) -> Option<GapRecord> {
        let next = self.stack.pop();
        if next.is_none() {
            self.draining = false;
        }
        next
    }

    /// Release the drain flag without emptying the queue
    pub fn abort_drain(&mut self) {
        self.draining = false;
    }

    /// Whether a drain loop currently owns the queue
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Number of queued gaps
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Whether no gaps are queued
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
