//! Tool-call catalog: maps the realtime model's function-call arguments onto
//! bus publishes. Every tool here is fire-and-forget — the function call is
//! acknowledged immediately and whatever collaborator acts on the published
//! topic (a motor bridge, a camera node, a memory store) does so out of
//! band, same as the rest of this core's pub/sub architecture.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::bus::{Message, MessageBus, Priority};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

pub const TOOL_NAMES: &[&str] = &[
    "perform_gesture",
    "play_sound",
    "take_snapshot",
    "remember",
    "recall",
    "stream_youtube_music",
];

pub struct ToolCatalog {
    bus: Arc<MessageBus>,
    node_name: String,
    published_topics: HashSet<String>,
}

impl ToolCatalog {
    pub fn new(bus: Arc<MessageBus>, node_name: impl Into<String>, published_topics: HashSet<String>) -> Self {
        Self {
            bus,
            node_name: node_name.into(),
            published_topics,
        }
    }

    /// Runs `name` with `arguments` (the raw JSON object string the model
    /// sent) and returns the JSON payload that becomes the
    /// `function_call_output` reply.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> Result<Value, ToolError> {
        let args: Value = serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
            tool: name.to_string(),
            reason: e.to_string(),
        })?;

        match name {
            "perform_gesture" => self.perform_gesture(&args),
            "play_sound" => self.play_sound(&args),
            "take_snapshot" => Ok(self.take_snapshot()),
            "remember" => self.remember(&args),
            "recall" => self.recall(&args),
            "stream_youtube_music" => self.stream_youtube_music(&args),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    fn perform_gesture(&self, args: &Value) -> Result<Value, ToolError> {
        let gesture_name = required_str(args, "gesture_name", "perform_gesture")?;
        let speed = args.get("speed").and_then(Value::as_str).unwrap_or("med");
        let action = format!("{gesture_name}:{speed}");
        self.publish_robot_action(vec![action.clone()], None, None);
        Ok(json!({ "status": "success", "gesture": action }))
    }

    fn play_sound(&self, args: &Value) -> Result<Value, ToolError> {
        let sound_name = required_str(args, "sound_name", "play_sound")?;
        let action = format!("play_sound {sound_name}");
        self.publish_robot_action(vec![action.clone()], None, None);
        Ok(json!({ "status": "success", "action": action }))
    }

    fn take_snapshot(&self) -> Value {
        self.publish("snap_pic", json!({
            "requested_by": self.node_name,
            "timestamp": now_ms(),
            "trigger": "tool_call",
        }));
        json!({ "status": "requested" })
    }

    fn remember(&self, args: &Value) -> Result<Value, ToolError> {
        let message = required_str(args, "message", "remember")?;
        let response = required_str(args, "response", "remember")?;
        let category = args.get("category").and_then(Value::as_str).unwrap_or("general");
        let importance = args.get("importance").and_then(Value::as_f64).unwrap_or(0.5);
        self.publish("memory_request", json!({
            "operation": "remember",
            "params": {
                "message": message,
                "response": response,
                "category": category,
                "importance": importance,
            },
            "timestamp": now_ms(),
        }));
        Ok(json!({ "status": "requested" }))
    }

    fn recall(&self, args: &Value) -> Result<Value, ToolError> {
        let query = required_str(args, "query", "recall")?;
        let category = args.get("category").and_then(Value::as_str);
        let limit = args.get("limit").and_then(Value::as_u64);
        let min_importance = args.get("min_importance").and_then(Value::as_f64);
        self.publish("memory_request", json!({
            "operation": "recall",
            "params": {
                "query": query,
                "category": category,
                "limit": limit,
                "min_importance": min_importance,
            },
            "timestamp": now_ms(),
        }));
        // Results land later on `memory_response`; the model is acknowledged
        // immediately rather than blocking this reply on an external store.
        Ok(json!({ "status": "requested" }))
    }

    fn stream_youtube_music(&self, args: &Value) -> Result<Value, ToolError> {
        let query = args.get("query").and_then(Value::as_str).unwrap_or("");
        Ok(json!({ "status": "unsupported", "query": query }))
    }

    fn publish_robot_action(&self, actions: Vec<String>, source_text: Option<&str>, mood: Option<&str>) {
        self.publish("robot_action", json!({
            "actions": actions,
            "source_text": source_text,
            "mood": mood,
            "priority": "normal",
            "timestamp": now_ms(),
        }));
    }

    fn publish(&self, topic: &str, payload: Value) {
        if !self.published_topics.contains(topic) {
            warn!(node = %self.node_name, topic, "publish to undeclared topic");
            return;
        }
        self.bus
            .publish(Message::new(topic, payload, self.node_name.clone(), Priority::Normal));
    }
}

fn required_str<'a>(args: &'a Value, field: &str, tool: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing required field '{field}'"),
        })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
