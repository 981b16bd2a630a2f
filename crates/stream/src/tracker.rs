//! Sequence Tracker with Gap Detection
//!
//! Decides, for every incoming item (live or backfilled), whether it
//! advances its unit's last-value state, opens a gap, or is stale.
//! The tracker never blocks and never drops an item: the caller forwards
//! every item to observers whatever the decision.

use monitor_core::{DataItem, GroupLayout};
use tracing::{debug, info, trace};

use crate::gap::GapRecord;
use crate::topology::{Topology, UnitState};

/// What the tracker did with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// First item of the unit, or the next index in sequence
    Advanced,
    /// Index jumped ahead; state advanced and the skipped span is a gap
    AdvancedWithGap,
    /// Index at or below the last accepted one
    Stale,
    /// Unit is not part of the session topology
    UnknownUnit,
}

/// Outcome of [`SequenceTracker::accept`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    /// Decision taken
    pub decision: Decision,
    /// Skipped span, present only for [`Decision::AdvancedWithGap`]
    pub gap: Option<GapRecord>,
}

impl Acceptance {
    /// Whether the unit state was mutated
    pub fn updated(&self) -> bool {
        matches!(
            self.decision,
            Decision::Advanced | Decision::AdvancedWithGap
        )
    }
}

/// Counters for the tracker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerMetrics {
    /// Total items seen
    pub total_items: u64,
    /// Items that advanced unit state
    pub advanced: u64,
    /// Gaps opened
    pub gaps_detected: u64,
    /// Indices reported missing across all gaps
    pub missing_indices: u64,
    /// Stale or duplicate items
    pub stale: u64,
    /// Items for units outside the topology
    pub unknown_units: u64,
}

/// Holds last known state per unit and classifies incoming items
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    topology: Topology,
    metrics: TrackerMetrics,
}

impl SequenceTracker {
    /// Create a tracker over the session topology
    pub fn new(layout: &GroupLayout) -> Self {
        Self {
            topology: Topology::from_layout(layout),
            metrics: TrackerMetrics::default(),
        }
    }

    /// Current topology with last values
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// State of one unit
    pub fn unit(&self, group: &str, unit: &str) -> Option<&UnitState> {
        self.topology.unit(group, unit)
    }

    /// Get metrics
    pub fn metrics(&self) -> &TrackerMetrics {
        &self.metrics
    }

    /// Classify an item and update the unit state when it is accepted
    pub fn accept(&mut self, item: &DataItem) -> Acceptance {
        self.metrics.total_items += 1;

        let Some(state) = self.topology.unit_mut(&item.group, &item.unit) else {
            self.metrics.unknown_units += 1;
            debug!(
                group = %item.group,
                unit = %item.unit,
                index = item.index,
                "Item for unit outside topology"
            );
            return Acceptance {
                decision: Decision::UnknownUnit,
                gap: None,
            };
        };

        let expected = match state.last_index {
            None => None,
            Some(last) => match last.checked_add(1) {
                Some(next) => Some(next),
                // Nothing can follow u64::MAX
                None => {
                    self.metrics.stale += 1;
                    return Acceptance {
                        decision: Decision::Stale,
                        gap: None,
                    };
                }
            },
        };

        match expected {
            None => {
                state.apply(item);
                self.metrics.advanced += 1;
                trace!(group = %item.group, unit = %item.unit, index = item.index, "First item for unit");
                Acceptance {
                    decision: Decision::Advanced,
                    gap: None,
                }
            }
            Some(next) if item.index == next => {
                state.apply(item);
                self.metrics.advanced += 1;
                trace!(group = %item.group, unit = %item.unit, index = item.index, "Item in sequence");
                Acceptance {
                    decision: Decision::Advanced,
                    gap: None,
                }
            }
            Some(next) if item.index > next => {
                let gap = GapRecord {
                    group: item.group.clone(),
                    unit: item.unit.clone(),
                    min_index: next,
                    max_index: item.index - 1,
                };
                state.apply(item);
                self.metrics.advanced += 1;
                self.metrics.gaps_detected += 1;
                self.metrics.missing_indices += gap.span();
                info!(
                    group = %gap.group,
                    unit = %gap.unit,
                    min = gap.min_index,
                    max = gap.max_index,
                    "Sequence gap detected"
                );
                Acceptance {
                    decision: Decision::AdvancedWithGap,
                    gap: Some(gap),
                }
            }
            Some(_) => {
                self.metrics.stale += 1;
                trace!(group = %item.group, unit = %item.unit, index = item.index, "Stale item");
                Acceptance {
                    decision: Decision::Stale,
                    gap: None,
                }
            }
        }
    }
}
