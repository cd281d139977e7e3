//! Gesture selection must stay inside its declared range and avoid repeating
//! a gesture too soon, regardless of which response text triggered it.

use std::collections::HashSet;

use conduit_core::aicore::gestures::{GestureInjector, MAX_ADDITIONAL, MIN_GESTURES};

#[test]
fn selection_size_always_falls_within_the_declared_range() {
    let injector = GestureInjector::new();
    let samples = [
        "That's amazing, I'm so excited!",
        "Hmm, let me think about that carefully.",
        "Whoa, what was that?!",
        "Okay, sounds good.",
        "",
    ];
    for text in samples {
        let gestures = injector.select_gestures(text);
        assert!(
            gestures.len() >= MIN_GESTURES && gestures.len() <= MAX_ADDITIONAL,
            "got {} gestures for {text:?}",
            gestures.len()
        );
    }
}

#[test]
fn repeated_calls_favor_gestures_outside_the_recent_window() {
    let injector = GestureInjector::new();
    let mut ever_seen: HashSet<&'static str> = HashSet::new();
    for _ in 0..5 {
        let gestures = injector.select_gestures("Tell me a story about the ocean");
        for g in gestures {
            ever_seen.insert(g);
        }
    }
    // With a 20-entry recency window and >80 catalog entries, five rounds of
    // 3-6 gestures each should surface more than one distinct gesture name.
    assert!(ever_seen.len() > 1);
}
