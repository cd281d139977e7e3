//! Feedback-loop prevention: while the `"speaking"` activity holds the
//! microphone mutex, AudioCapture must forward nothing upstream, and once
//! released, sustained speech resumes the normal commit path.

mod common;

use std::time::Duration;

use conduit_core::audio::{AudioCaptureNode, RmsThresholdVad, CHUNK_SAMPLES};

fn speech_block() -> Vec<f32> {
    vec![0.3; CHUNK_SAMPLES]
}

fn silence_block() -> Vec<f32> {
    vec![0.0; CHUNK_SAMPLES]
}

#[test]
fn held_speaking_mutex_blocks_all_capture() {
    let registry = common::mutex_registry();
    let realtime = common::unstarted_connection();
    let node = AudioCaptureNode::new(
        "audio_capture",
        std::sync::Arc::clone(&realtime),
        std::sync::Arc::clone(&registry),
        Box::new(RmsThresholdVad::default()),
    );

    registry.acquire_noisy_activity("speaking");
    for _ in 0..10 {
        node.ingest_block(&speech_block());
    }

    let stats = node.stats();
    assert_eq!(stats.sent_chunks, 0);
    assert_eq!(stats.skipped_chunks, 0);
    assert_eq!(realtime.stats().messages_sent, 0);
}

#[test]
fn releasing_the_mutex_lets_sustained_speech_commit() {
    let registry = common::mutex_registry();
    let realtime = common::unstarted_connection();
    let node = AudioCaptureNode::new(
        "audio_capture",
        std::sync::Arc::clone(&realtime),
        std::sync::Arc::clone(&registry),
        Box::new(RmsThresholdVad::default()),
    );

    registry.acquire_noisy_activity("speaking");
    node.ingest_block(&speech_block());
    assert_eq!(node.stats().sent_chunks, 0, "still gated while the mutex is held");

    registry.release_noisy_activity("speaking");
    node.ingest_block(&speech_block());
    std::thread::sleep(Duration::from_millis(320));
    for _ in 0..5 {
        node.ingest_block(&silence_block());
    }

    let stats = node.stats();
    assert!(stats.sent_chunks > 0, "speech frames should be forwarded once the mic is free");
    assert_eq!(stats.commits, 1);
}
