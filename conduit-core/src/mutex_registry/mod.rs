//! Microphone/noisy-activity coordination.
//!
//! Not mutual exclusion between individual noisy activities — TTS playback and
//! motor actuation may run concurrently. It is mutual exclusion between *any*
//! noisy activity and speech recognition: the microphone is usable only while
//! the combined reference count across all activities is zero.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Default)]
struct State {
    counts: HashMap<String, usize>,
}

impl State {
    fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Process-wide singleton by construction (see `Launcher`, which owns the one
/// instance and hands clones of its `Arc` to every node that needs it) rather
/// than a module-level global, so tests can build their own isolated instance.
pub struct MutexRegistry {
    state: Mutex<State>,
}

impl Default for MutexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MutexRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn acquire_noisy_activity(&self, activity_name: &str) {
        let mut state = self.state.lock();
        *state.counts.entry(activity_name.to_string()).or_insert(0) += 1;
        let total = state.total();
        debug!(activity = activity_name, total, "noisy activity acquired");
    }

    /// A release on an activity with no outstanding acquisitions is logged
    /// and otherwise ignored; it never drives the count negative.
    pub fn release_noisy_activity(&self, activity_name: &str) {
        let mut state = self.state.lock();
        match state.counts.get_mut(activity_name) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    state.counts.remove(activity_name);
                }
                let total = state.total();
                debug!(activity = activity_name, total, "noisy activity released");
            }
            _ => {
                warn!(
                    activity = activity_name,
                    "released noisy activity with no outstanding acquisition"
                );
            }
        }
    }

    pub fn is_microphone_available(&self) -> bool {
        self.state.lock().total() == 0
    }

    pub fn get_active_activities(&self) -> Vec<String> {
        self.state.lock().counts.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mic_unavailable_while_any_activity_held() {
        let registry = MutexRegistry::new();
        assert!(registry.is_microphone_available());
        registry.acquire_noisy_activity("speaking");
        assert!(!registry.is_microphone_available());
        registry.release_noisy_activity("speaking");
        assert!(registry.is_microphone_available());
    }

    #[test]
    fn overlapping_activities_both_counted() {
        let registry = MutexRegistry::new();
        registry.acquire_noisy_activity("speaking");
        registry.acquire_noisy_activity("navigation");
        assert!(!registry.is_microphone_available());
        assert_eq!(registry.get_active_activities().len(), 2);
        registry.release_noisy_activity("speaking");
        assert!(!registry.is_microphone_available());
        registry.release_noisy_activity("navigation");
        assert!(registry.is_microphone_available());
    }

    #[test]
    fn reacquiring_same_activity_requires_matching_releases() {
        let registry = MutexRegistry::new();
        registry.acquire_noisy_activity("speaking");
        registry.acquire_noisy_activity("speaking");
        registry.release_noisy_activity("speaking");
        assert!(!registry.is_microphone_available());
        registry.release_noisy_activity("speaking");
        assert!(registry.is_microphone_available());
    }

    #[test]
    fn release_without_acquire_is_noop() {
        let registry = MutexRegistry::new();
        registry.release_noisy_activity("ghost");
        assert!(registry.is_microphone_available());
    }
}
