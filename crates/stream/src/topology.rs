//! Last-value cache for every unit of the session.
//!
//! The group/unit sets are fixed when the topology is built and never
//! change for the session's lifetime.

use std::collections::BTreeMap;

use monitor_core::{DataItem, GroupLayout, UpdateKind};
use serde::{Deserialize, Serialize};

/// Last accepted update of a unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    /// Index of the last accepted update; `None` until the first one
    pub last_index: Option<u64>,
    /// Kind of the last accepted update
    pub last_kind: Option<UpdateKind>,
    /// Timestamp (epoch ms) of the last accepted update
    pub last_timestamp: Option<i64>,
    /// Value of the last accepted update, if it carried one
    pub last_value: Option<String>,
}

impl UnitState {
    /// Overwrite with an accepted item
    pub(crate) fn apply(&mut self, item: &DataItem) {
        self.last_index = Some(item.index);
        self.last_kind = Some(item.kind);
        self.last_timestamp = Some(item.timestamp);
        self.last_value = item.value.clone();
    }
}

/// Group name → unit name → state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    groups: BTreeMap<String, BTreeMap<String, UnitState>>,
}

impl Topology {
    /// Build an empty-state topology from a group layout
    pub fn from_layout(layout: &GroupLayout) -> Self {
        let groups = layout
            .iter()
            .map(|(group, units)| {
                let states = units
                    .iter()
                    .map(|unit| (unit.clone(), UnitState::default()))
                    .collect();
                (group.clone(), states)
            })
            .collect();
        Self { groups }
    }

    /// Group/unit names without state
    pub fn layout(&self) -> GroupLayout {
        self.groups
            .iter()
            .map(|(group, units)| (group.clone(), units.keys().cloned().collect()))
            .collect()
    }

    /// State of one unit
    pub fn unit(&self, group: &str, unit: &str) -> Option<&UnitState> {
        self.groups.get(group).and_then(|units| units.get(unit))
    }

    pub(crate) fn unit_mut(&mut self, group: &str, unit: &str) -> Option<&mut UnitState> {
        self.groups.get_mut(group).and_then(|units| units.get_mut(unit))
    }

    /// Whether the unit is part of the session
    pub fn contains(&self, group: &str, unit: &str) -> bool {
        self.unit(group, unit).is_some()
    }

    /// Number of groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of units across all groups
    pub fn unit_count(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    /// Iterate `(group, unit, state)` in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &UnitState)> {
        self.groups.iter().flat_map(|(group, units)| {
            units
                .iter()
                .map(move |(unit, state)| (group.as_str(), unit.as_str(), state))
        })
    }
}
