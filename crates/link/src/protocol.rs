//! Streaming protocol frames.
//!
//! The client opens with the raw session token as its first text frame,
//! then only ever sends ping acknowledgments. The server sends three
//! frame kinds, tagged by `x`.

use std::collections::BTreeMap;

use monitor_core::{DataItem, HistoryItem};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Close code: session is not authorized, never reconnect
pub const CLOSE_UNAUTHORIZED: u16 = 3000;

/// Close code: protocol violation, reconnect
pub const CLOSE_PROTOCOL_VIOLATION: u16 = 4102;

/// Longest close reason a control frame can carry
const MAX_CLOSE_REASON: usize = 123;

/// Group → `[unit, last item or null]` pairs
pub type SnapshotMap = BTreeMap<String, Vec<(String, Option<HistoryItem>)>>;

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "x")]
pub enum ServerFrame {
    /// Connect acknowledgment with an optional last-value snapshot
    #[serde(rename = "c")]
    Connected {
        /// Snapshot of current unit state
        #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<SnapshotMap>,
    },

    /// Liveness ping carrying the server's counter
    #[serde(rename = "p")]
    Ping {
        /// Counter value
        #[serde(rename = "v")]
        value: u64,
    },

    /// Live data push
    #[serde(rename = "d")]
    Data {
        /// Update items
        #[serde(rename = "d")]
        items: Vec<DataItem>,
    },
}

/// Frames sent by the client after the token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum ClientFrame {
    /// Ping acknowledgment echoing the received value
    #[serde(rename = "p")]
    Pong {
        /// Echoed counter value
        #[serde(rename = "v")]
        value: u64,
    },
}

/// Parse a text frame from the server
pub fn parse_server_frame(text: &str) -> Result<ServerFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a client frame
pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Flatten a snapshot into tagged data items, skipping units without data
pub fn snapshot_items(snapshot: SnapshotMap) -> Vec<DataItem> {
    let mut items = Vec::new();
    for (group, units) in snapshot {
        for (unit, item) in units {
            if let Some(item) = item {
                items.push(item.into_data(group.clone(), unit));
            }
        }
    }
    items
}

/// Clip a close reason to what a close frame can carry
pub fn close_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
