//! Wire and domain types shared by the tracker and the link.
//!
//! Field names on the wire are single letters; the Rust side uses
//! descriptive names and maps them with `serde(rename)`.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Group name → unit names, as returned by the topology endpoint.
pub type GroupLayout = BTreeMap<String, Vec<String>>;

/// Kind of a unit update.
///
/// Unknown codes fail deserialization instead of mapping to a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    /// Unit went offline (`"f"`)
    #[serde(rename = "f")]
    Offline,
    /// Unit came online (`"n"`)
    #[serde(rename = "n")]
    Online,
    /// Unit published a value (`"v"`)
    #[serde(rename = "v")]
    Value,
}

impl UpdateKind {
    /// Semantic name exposed to consumers.
    pub const fn as_str(self) -> &'static str {
        match self {
            UpdateKind::Offline => "offline",
            UpdateKind::Online => "online",
            UpdateKind::Value => "value",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item served by the history endpoint and inside the connect snapshot.
///
/// Carries no group/unit; the caller knows which unit it asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Per-unit sequence index
    #[serde(rename = "i")]
    pub index: u64,
    /// Epoch milliseconds
    #[serde(rename = "t")]
    pub timestamp: i64,
    /// Update kind
    #[serde(rename = "y")]
    pub kind: UpdateKind,
    /// Base64 payload, only for value updates
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl HistoryItem {
    /// Attach the group and unit the item belongs to.
    pub fn into_data(self, group: impl Into<String>, unit: impl Into<String>) -> DataItem {
        DataItem {
            group: group.into(),
            unit: unit.into(),
            index: self.index,
            timestamp: self.timestamp,
            kind: self.kind,
            value: self.value,
        }
    }
}

/// Item pushed over the live socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    /// Group name
    #[serde(rename = "g")]
    pub group: String,
    /// Unit name
    #[serde(rename = "u")]
    pub unit: String,
    /// Per-unit sequence index
    #[serde(rename = "i")]
    pub index: u64,
    /// Epoch milliseconds
    #[serde(rename = "t")]
    pub timestamp: i64,
    /// Update kind
    #[serde(rename = "y")]
    pub kind: UpdateKind,
    /// Base64 payload, only for value updates
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Normalized record handed to observers for every processed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Group name
    pub group: String,
    /// Unit name
    pub unit: String,
    /// Per-unit sequence index
    pub index: u64,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Update kind
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    /// Base64 payload, only for value updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl UpdateRecord {
    /// Decode the base64 value payload into raw bytes.
    pub fn decode_value(&self) -> CoreResult<Option<Vec<u8>>> {
        match &self.value {
            Some(encoded) => Ok(Some(STANDARD.decode(encoded)?)),
            None => Ok(None),
        }
    }
}

impl From<&DataItem> for UpdateRecord {
    fn from(item: &DataItem) -> Self {
        Self {
            group: item.group.clone(),
            unit: item.unit.clone(),
            index: item.index,
            timestamp: item.timestamp,
            kind: item.kind,
            value: item.value.clone(),
        }
    }
}
