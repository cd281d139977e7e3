//! Per-frame voice activity classification. Multi-frame hysteresis (silence
//! run length, minimum speech duration, commit cooldown) lives in
//! [`super::capture`] — this trait only answers "is this one frame speech?"
//! so the threshold algorithm stays swappable.

use super::DEFAULT_VAD_THRESHOLD;

pub trait VoiceActivityDetector: Send {
    fn classify(&mut self, rms: f32) -> bool;
    fn reset(&mut self);
}

#[derive(Debug, Clone)]
pub struct RmsThresholdVad {
    threshold: f32,
}

impl RmsThresholdVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for RmsThresholdVad {
    fn default() -> Self {
        Self::new(DEFAULT_VAD_THRESHOLD)
    }
}

impl VoiceActivityDetector for RmsThresholdVad {
    fn classify(&mut self, rms: f32) -> bool {
        rms > self.threshold
    }

    fn reset(&mut self) {}
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
