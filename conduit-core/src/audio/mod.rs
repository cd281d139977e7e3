//! Microphone capture: gain/RMS/mutex-gate pipeline feeding the realtime
//! session with base64 PCM16 frames, gated by voice-activity detection and
//! the noisy-activity mutex to avoid feedback loops.

pub mod capture;
pub mod device;
pub mod ring;
pub mod vad;

pub use capture::{AudioCaptureNode, CaptureStats};
pub use device::DeviceInfo;
pub use vad::{RmsThresholdVad, VoiceActivityDetector};

use thiserror::Error;

pub const SAMPLE_RATE_HZ: u32 = 24_000;
pub const CHUNK_SAMPLES: usize = 4_800;
pub const CHUNK_DURATION_MS: u64 = 200;
pub const DEFAULT_GAIN: f32 = 3.0;
pub const DEFAULT_VAD_THRESHOLD: f32 = 0.02;
pub const MIN_SPEECH_DURATION_MS: u64 = 300;
pub const COMMIT_COOLDOWN_MS: u64 = 500;
pub const PRE_SPEECH_PADDING_MS: u64 = 300;
pub const POST_SPEECH_PADDING_MS: u64 = 300;
pub const SILENCE_THRESHOLD_FRAMES: u32 = 2;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to open input device: {0}")]
    DeviceOpen(String),

    #[error("failed to build input stream: {0}")]
    StreamBuild(String),

    #[error("no input device available")]
    NoInputDevice,
}

/// `ceil(ms / CHUNK_DURATION_MS)`, used to size the pre/post speech padding
/// windows in whole chunks.
pub fn frames_for_ms(ms: u64) -> u32 {
    ((ms + CHUNK_DURATION_MS - 1) / CHUNK_DURATION_MS) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_for_ms_rounds_up() {
        assert_eq!(frames_for_ms(300), 2);
        assert_eq!(frames_for_ms(200), 1);
        assert_eq!(frames_for_ms(1), 1);
        assert_eq!(frames_for_ms(0), 0);
    }
}
