//! `text_response` is logged for the offline chat timeline but must never
//! touch the speaking mutex — that path belongs exclusively to the streamed
//! audio deltas, which this node cannot observe without a live server (see
//! `synthesis::tests` for that half, which has access to construct the
//! server events directly).

mod common;

use std::sync::Arc;

use conduit_core::bus::{Message, Priority};
use conduit_core::runtime::Node;
use conduit_core::synthesis::SpeechSynthesisNode;
use serde_json::json;

#[tokio::test]
async fn text_response_is_logged_and_never_acquires_the_mutex() {
    let bus = common::bus();
    let realtime = common::unstarted_connection();
    let registry = common::mutex_registry();
    let chat_logger = common::chat_logger();
    let playback = common::unavailable_playback();
    let output_dir = common::tempdir("synthesis-output");

    let node = SpeechSynthesisNode::new(
        "speech_synthesis",
        Arc::clone(&bus),
        realtime,
        Arc::clone(&registry),
        playback,
        Arc::clone(&chat_logger),
        output_dir,
        tokio::runtime::Handle::current(),
        common::synthesis_published_topics(),
    );

    let message = Message::new(
        "text_response",
        json!({ "text": "hello there", "conversation_id": "c9" }),
        "ai_core",
        Priority::Normal,
    );
    node.dispatch("on_text_response", &message);

    let steps = chat_logger.steps_for("c9");
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status.as_deref(), Some("success"));
    assert!(registry.is_microphone_available(), "logging a text_response must not gate the microphone");

    // cleanup() is the launcher's shutdown hook; since this node never held
    // the mutex it must be a no-op, not a spurious release warning.
    node.cleanup();
    assert!(registry.is_microphone_available());
}
