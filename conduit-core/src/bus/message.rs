//! Message and priority types carried by the bus.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Delivery priority. Currently advisory only — the bus does not reorder
/// queues by priority, it only stamps it onto the envelope for subscribers
/// that want to triage (e.g. a node skipping LOW priority work under load).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A single bus envelope. `payload` is an opaque JSON value — nodes agree on
/// shape out of band, keyed by topic name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: serde_json::Value,
    /// Wall-clock publish time, milliseconds since epoch.
    pub timestamp_ms: u64,
    pub source_node: String,
    pub id: Uuid,
    pub priority: Priority,
}

impl Message {
    pub fn new(
        topic: impl Into<String>,
        payload: serde_json::Value,
        source_node: impl Into<String>,
        priority: Priority,
    ) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            topic: topic.into(),
            payload,
            timestamp_ms,
            source_node: source_node.into(),
            id: Uuid::new_v4(),
            priority,
        }
    }
}
