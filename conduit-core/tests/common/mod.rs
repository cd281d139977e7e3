#![allow(dead_code)]
//! Shared fixtures for integration tests.
//!
//! Every test here drives nodes through their public `Node`/constructor API
//! and observes effects on the bus, the mutex registry, or the chat logger —
//! the same boundary a real deployment's other processes would use. None of
//! these tests can drive a live realtime server socket, so anything gated on
//! a `ServerEvent` reaching a node (tool calls, streamed audio) is exercised
//! at the unit level inside the crate instead; see the module doc comments.

use std::path::PathBuf;
use std::sync::Arc;

use conduit_core::bus::MessageBus;
use conduit_core::chatlog::ChatLogger;
use conduit_core::collab::{CollabError, Unavailable};
use conduit_core::mutex_registry::MutexRegistry;
use conduit_core::realtime::{Auth, InputAudioTranscription, RealtimeConnection, SessionConfig};

pub fn session_config() -> SessionConfig {
    SessionConfig {
        modalities: vec!["text".to_string(), "audio".to_string()],
        voice: "alloy".to_string(),
        instructions: "be a helpful robot".to_string(),
        input_audio_format: "pcm16".to_string(),
        output_audio_format: "pcm16".to_string(),
        input_audio_transcription: InputAudioTranscription {
            model: "whisper-1".to_string(),
            language: "en".to_string(),
        },
        turn_detection: None,
        tools: vec![],
    }
}

pub fn unstarted_connection() -> Arc<RealtimeConnection> {
    Arc::new(RealtimeConnection::new(
        "wss://example.invalid/v1/realtime",
        Auth::ApiKey("test-key".to_string()),
        session_config(),
    ))
}

pub fn bus() -> Arc<MessageBus> {
    Arc::new(MessageBus::new())
}

pub fn mutex_registry() -> Arc<MutexRegistry> {
    Arc::new(MutexRegistry::new())
}

pub fn chat_logger() -> Arc<ChatLogger> {
    Arc::new(ChatLogger::new())
}

pub fn unavailable_playback() -> Arc<Unavailable> {
    Arc::new(Unavailable::new("playback_device"))
}

pub fn unavailable_vision() -> Arc<Unavailable> {
    Arc::new(Unavailable::new("vision_completion"))
}

pub fn tempdir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("conduit-it-{label}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn ai_core_published_topics() -> Vec<String> {
    ["snap_pic", "system_mode", "text_response", "robot_action", "memory_request"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn synthesis_published_topics() -> Vec<String> {
    ["speaking_status", "robot_action"].iter().map(|s| s.to_string()).collect()
}

pub fn write_file(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

pub type StubError = CollabError;

/// Poll a bus subscriber queue without blocking the tokio worker thread —
/// `crossbeam_channel::Receiver::recv_timeout` blocks the OS thread outright,
/// which would starve any task this test spawned onto the same
/// single-threaded runtime. Polling with an async sleep between attempts
/// keeps the executor free to make progress on spawned work.
pub async fn recv_async(
    rx: &conduit_core::bus::SubscriberQueue,
    timeout: std::time::Duration,
) -> Option<conduit_core::bus::Message> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(message) = rx.try_recv() {
            return Some(message);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
