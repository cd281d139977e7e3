//! Plain voice command, no vision intent: the turn should announce
//! `system_mode: thinking` and never request a snapshot.
//!
//! The matching assistant turn (`text_response`, `speaking_status`,
//! `robot_action`) only arrives once the realtime server replies, and that
//! reply path is driven by a private handler registered against a live
//! socket — untestable without one. That half of the scenario is covered at
//! the unit level inside `aicore::tests` and `synthesis::tests`, which have
//! access to construct the server events directly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use conduit_core::aicore::AiCoreNode;
use conduit_core::bus::{Message, Priority};
use conduit_core::runtime::Node;
use serde_json::json;

#[tokio::test]
async fn plain_command_announces_thinking_without_snapshot() {
    let bus = common::bus();
    let realtime = common::unstarted_connection();
    let chat_logger = common::chat_logger();
    let vision = common::unavailable_vision();

    let snap_rx = bus.subscribe("test", "snap_pic");
    let mode_rx = bus.subscribe("test", "system_mode");

    let node = AiCoreNode::new(
        "ai_core",
        Arc::clone(&bus),
        Arc::clone(&realtime),
        chat_logger,
        vision,
        tokio::runtime::Handle::current(),
        common::ai_core_published_topics(),
    );

    let message = Message::new(
        "voice_command",
        json!({ "text": "Hi there", "confidence": 0.95, "conversation_id": "c1" }),
        "stt",
        Priority::Normal,
    );
    node.dispatch("on_voice_command", &message);

    let mode = common::recv_async(&mode_rx, Duration::from_millis(200))
        .await
        .expect("system_mode should be published for a non-vision turn");
    assert_eq!(mode.payload["mode"], "thinking");
    assert!(snap_rx.try_recv().is_err(), "plain text should never request a snapshot");
}

#[tokio::test]
async fn missing_text_field_is_ignored_not_fatal() {
    let bus = common::bus();
    let realtime = common::unstarted_connection();
    let node = AiCoreNode::new(
        "ai_core",
        Arc::clone(&bus),
        realtime,
        common::chat_logger(),
        common::unavailable_vision(),
        tokio::runtime::Handle::current(),
        common::ai_core_published_topics(),
    );
    let message = Message::new("voice_command", json!({}), "stt", Priority::Normal);
    node.dispatch("on_voice_command", &message);
}
