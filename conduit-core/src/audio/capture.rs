//! The microphone → base64-PCM16 pipeline: gain, chunking, the mutex gate
//! that prevents acoustic feedback, and the speech/silence state machine
//! that decides when to commit a user turn.
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS) and must be created and dropped on the thread that owns it. A
//! dedicated OS thread spun up in [`AudioCaptureNode::initialize`] owns the
//! stream end-to-end; the node itself only ever touches the `Send` producer
//! half of a lock-free ring buffer. The consumer half is drained by
//! [`AudioCaptureNode::main_loop`], which runs on the runtime's own worker
//! thread — decoupling the real-time audio callback from VAD/mutex/network
//! logic that is free to allocate and block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::mutex_registry::MutexRegistry;
use crate::realtime::{ClientEvent, RealtimeConnection, ResponseCreateParams};
use crate::runtime::Node;

use super::ring::{create_sample_ring, Consumer, Producer, SampleConsumer, SampleProducer};
use super::vad::{rms, VoiceActivityDetector};
use super::{
    frames_for_ms, AudioError, CHUNK_SAMPLES, COMMIT_COOLDOWN_MS, MIN_SPEECH_DURATION_MS,
    POST_SPEECH_PADDING_MS, PRE_SPEECH_PADDING_MS, SILENCE_THRESHOLD_FRAMES,
};

#[derive(Debug, Clone, Serialize)]
pub struct CaptureStats {
    pub sent_chunks: u64,
    pub skipped_chunks: u64,
    pub commits: u64,
    pub overflow_count: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Silence,
    Speech,
    Trailing,
}

struct PipelineState {
    phase: Phase,
    float_buffer: Vec<f32>,
    pre_padding: VecDeque<Vec<i16>>,
    silence_run: u32,
    trailing_remaining: u32,
    speech_started_at: Option<Instant>,
    last_commit_at: Option<Instant>,
    paused: bool,
}

impl PipelineState {
    fn new() -> Self {
        Self {
            phase: Phase::Silence,
            float_buffer: Vec::with_capacity(CHUNK_SAMPLES),
            pre_padding: VecDeque::with_capacity(frames_for_ms(PRE_SPEECH_PADDING_MS) as usize),
            silence_run: 0,
            trailing_remaining: 0,
            speech_started_at: None,
            last_commit_at: None,
            paused: false,
        }
    }
}

pub struct AudioCaptureNode {
    name: String,
    realtime: Arc<RealtimeConnection>,
    mutex_registry: Arc<MutexRegistry>,
    vad: Mutex<Box<dyn VoiceActivityDetector>>,
    gain: f32,
    threshold_frames: u32,
    min_speech_duration: Duration,
    commit_cooldown: Duration,
    pre_padding_frames: u32,
    post_padding_frames: u32,
    state: Mutex<PipelineState>,
    consumer: Mutex<SampleConsumer>,
    producer: Mutex<Option<SampleProducer>>,
    capture_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    capture_running: Arc<AtomicBool>,
    sent_chunks: AtomicU64,
    skipped_chunks: AtomicU64,
    commits: AtomicU64,
    overflow_count: AtomicU64,
}

impl AudioCaptureNode {
    pub fn new(
        name: impl Into<String>,
        realtime: Arc<RealtimeConnection>,
        mutex_registry: Arc<MutexRegistry>,
        vad: Box<dyn VoiceActivityDetector>,
    ) -> Self {
        let (producer, consumer) = create_sample_ring();
        Self {
            name: name.into(),
            realtime,
            mutex_registry,
            vad: Mutex::new(vad),
            gain: super::DEFAULT_GAIN,
            threshold_frames: SILENCE_THRESHOLD_FRAMES,
            min_speech_duration: Duration::from_millis(MIN_SPEECH_DURATION_MS),
            commit_cooldown: Duration::from_millis(COMMIT_COOLDOWN_MS),
            pre_padding_frames: frames_for_ms(PRE_SPEECH_PADDING_MS),
            post_padding_frames: frames_for_ms(POST_SPEECH_PADDING_MS),
            state: Mutex::new(PipelineState::new()),
            consumer: Mutex::new(consumer),
            producer: Mutex::new(Some(producer)),
            capture_thread: Mutex::new(None),
            capture_running: Arc::new(AtomicBool::new(false)),
            sent_chunks: AtomicU64::new(0),
            skipped_chunks: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            overflow_count: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            sent_chunks: self.sent_chunks.load(Ordering::Relaxed),
            skipped_chunks: self.skipped_chunks.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            overflow_count: self.overflow_count.load(Ordering::Relaxed),
        }
    }

    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
    }

    /// Start the dedicated cpal capture thread. Feature-gated; with
    /// `audio-cpal` disabled, tests and headless environments drive the
    /// pipeline with [`AudioCaptureNode::ingest_block`] directly.
    #[cfg(feature = "audio-cpal")]
    fn open_device(&self) -> Result<(), AudioError> {
        let producer = self
            .producer
            .lock()
            .take()
            .ok_or_else(|| AudioError::DeviceOpen("capture already started".to_string()))?;

        self.capture_running.store(true, Ordering::Relaxed);
        let running = Arc::clone(&self.capture_running);
        let name = self.name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("{name}-cpal"))
            .spawn(move || run_cpal_capture(producer, running))
            .map_err(|e| AudioError::DeviceOpen(e.to_string()))?;

        *self.capture_thread.lock() = Some(handle);
        Ok(())
    }

    #[cfg(not(feature = "audio-cpal"))]
    fn open_device(&self) -> Result<(), AudioError> {
        Ok(())
    }

    /// Feed raw (pre-gain) samples into the pipeline. Used directly by tests
    /// and by the ring-buffer drain in [`Self::main_loop`].
    pub fn ingest_block(&self, raw: &[f32]) {
        let mic_available = self.mutex_registry.is_microphone_available();
        if !mic_available {
            return;
        }

        let mut state = self.state.lock();
        if state.paused {
            return;
        }

        for &sample in raw {
            let gained = (sample * self.gain).clamp(-1.0, 1.0);
            state.float_buffer.push(gained);
        }

        while state.float_buffer.len() >= CHUNK_SAMPLES {
            let chunk: Vec<f32> = state.float_buffer.drain(..CHUNK_SAMPLES).collect();
            self.process_frame(&mut state, &chunk);
        }
    }

    fn process_frame(&self, state: &mut PipelineState, chunk: &[f32]) {
        let volume = rms(chunk);
        let is_speech = self.vad.lock().classify(volume);
        let pcm16 = to_pcm16(chunk);

        match state.phase {
            Phase::Silence => {
                if is_speech {
                    state.phase = Phase::Speech;
                    state.speech_started_at = Some(Instant::now());
                    state.silence_run = 0;
                    self.realtime.send_sync(ClientEvent::InputAudioBufferClear);
                    while let Some(padded) = state.pre_padding.pop_front() {
                        self.send_pcm(&padded);
                    }
                    self.send_pcm(&pcm16);
                } else {
                    if state.pre_padding.len() as u32 >= self.pre_padding_frames {
                        state.pre_padding.pop_front();
                    }
                    state.pre_padding.push_back(pcm16);
                    self.skipped_chunks.fetch_add(1, Ordering::Relaxed);
                }
            }
            Phase::Speech => {
                if is_speech {
                    state.silence_run = 0;
                    self.send_pcm(&pcm16);
                } else {
                    state.silence_run += 1;
                    if state.silence_run >= self.threshold_frames {
                        let speech_duration = state
                            .speech_started_at
                            .map(|t| t.elapsed())
                            .unwrap_or_default();
                        let cooldown_elapsed = state
                            .last_commit_at
                            .map(|t| t.elapsed() >= self.commit_cooldown)
                            .unwrap_or(true);
                        let mic_available = self.mutex_registry.is_microphone_available();

                        if speech_duration >= self.min_speech_duration
                            && cooldown_elapsed
                            && mic_available
                        {
                            state.phase = Phase::Trailing;
                            state.trailing_remaining = self.post_padding_frames;
                            self.send_pcm(&pcm16);
                        } else {
                            state.phase = Phase::Silence;
                            state.float_buffer.clear();
                            state.speech_started_at = None;
                        }
                    } else {
                        self.send_pcm(&pcm16);
                    }
                }
            }
            Phase::Trailing => {
                self.send_pcm(&pcm16);
                if state.trailing_remaining > 0 {
                    state.trailing_remaining -= 1;
                }
                if state.trailing_remaining == 0 {
                    std::thread::sleep(Duration::from_millis(50));
                    self.realtime.send_sync(ClientEvent::InputAudioBufferCommit);
                    state.float_buffer.clear();
                    self.commits.fetch_add(1, Ordering::Relaxed);
                    if !self.realtime.response_in_progress() {
                        self.realtime.send_sync(ClientEvent::ResponseCreate {
                            response: ResponseCreateParams {
                                modalities: vec!["text".to_string(), "audio".to_string()],
                            },
                        });
                    }
                    state.last_commit_at = Some(Instant::now());
                    state.phase = Phase::Silence;
                    state.speech_started_at = None;
                }
            }
        }
    }

    fn send_pcm(&self, pcm16: &[i16]) {
        let bytes: Vec<u8> = pcm16.iter().flat_map(|s| s.to_le_bytes()).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.realtime
            .send_sync(ClientEvent::InputAudioBufferAppend { audio: encoded });
        self.sent_chunks.fetch_add(1, Ordering::Relaxed);
    }
}

fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

#[cfg(feature = "audio-cpal")]
fn run_cpal_capture(mut producer: SampleProducer, running: Arc<AtomicBool>) {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            tracing::error!("no default input device available");
            return;
        }
    };

    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to read default input config");
            return;
        }
    };

    let channels = supported.channels() as usize;
    let config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(super::SAMPLE_RATE_HZ),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _info: &cpal::InputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            if channels == 1 {
                let _ = producer.push_slice(data);
                return;
            }
            let frames = data.len() / channels;
            let mut mono = vec![0f32; frames];
            for (f, slot) in mono.iter_mut().enumerate() {
                let base = f * channels;
                let sum: f32 = data[base..base + channels].iter().sum();
                *slot = sum / channels as f32;
            }
            let _ = producer.push_slice(&mono);
        },
        |err| tracing::error!(error = %err, "audio stream error"),
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to build input stream");
            return;
        }
    };

    if let Err(e) = stream.play() {
        tracing::error!(error = %e, "failed to start input stream");
        return;
    }

    info!("audio capture thread started");
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(50));
    }
    info!("audio capture thread stopping");
}

impl Node for AudioCaptureNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn known_callbacks(&self) -> &'static [&'static str] {
        &[]
    }

    fn initialize(&self) -> Result<(), String> {
        self.open_device().map_err(|e| e.to_string())
    }

    fn main_loop(&self) -> Result<(), String> {
        let mut buf = vec![0f32; CHUNK_SAMPLES];
        let read = self.consumer.lock().pop_slice(&mut buf);
        if read > 0 {
            self.ingest_block(&buf[..read]);
        } else {
            std::thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }

    fn cleanup(&self) {
        self.capture_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.capture_thread.lock().take() {
            let _ = handle.join();
        }
        warn!(node = %self.name, "audio capture stopped");
    }

    fn dispatch(&self, _callback: &str, _message: &crate::bus::Message) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::events::{InputAudioTranscription, SessionConfig};
    use crate::realtime::Auth;

    fn test_connection() -> Arc<RealtimeConnection> {
        Arc::new(RealtimeConnection::new(
            "wss://example.invalid",
            Auth::ApiKey("key".to_string()),
            SessionConfig {
                modalities: vec!["text".to_string(), "audio".to_string()],
                voice: "alloy".to_string(),
                instructions: String::new(),
                input_audio_format: "pcm16".to_string(),
                output_audio_format: "pcm16".to_string(),
                input_audio_transcription: InputAudioTranscription {
                    model: "whisper-1".to_string(),
                    language: "en".to_string(),
                },
                turn_detection: None,
                tools: vec![],
            },
        ))
    }

    fn test_node() -> AudioCaptureNode {
        AudioCaptureNode::new(
            "audio_capture",
            test_connection(),
            Arc::new(MutexRegistry::new()),
            Box::new(crate::audio::vad::RmsThresholdVad::new(0.02)),
        )
    }

    fn silence_block() -> Vec<f32> {
        vec![0.0; CHUNK_SAMPLES]
    }

    fn speech_block() -> Vec<f32> {
        vec![0.3; CHUNK_SAMPLES]
    }

    #[test]
    fn blocked_mic_discards_blocks_entirely() {
        let node = test_node();
        node.mutex_registry.acquire_noisy_activity("speaking");
        node.ingest_block(&speech_block());
        let stats = node.stats();
        assert_eq!(stats.sent_chunks, 0);
        assert_eq!(stats.skipped_chunks, 0);
    }

    #[test]
    fn silence_chunks_are_skipped_not_sent() {
        let node = test_node();
        node.ingest_block(&silence_block());
        let stats = node.stats();
        assert_eq!(stats.sent_chunks, 0);
        assert_eq!(stats.skipped_chunks, 1);
    }

    #[test]
    fn sustained_speech_eventually_commits() {
        let node = test_node();
        node.ingest_block(&speech_block());
        // Exceed `min_speech_duration` (300ms) before the speech run ends so
        // the commit path is actually eligible.
        std::thread::sleep(Duration::from_millis(320));
        for _ in 0..5 {
            node.ingest_block(&silence_block());
        }
        let stats = node.stats();
        assert!(stats.sent_chunks > 0);
        assert_eq!(stats.commits, 1);
    }

    #[test]
    fn paused_node_ignores_blocks() {
        let node = test_node();
        node.pause();
        node.ingest_block(&speech_block());
        let stats = node.stats();
        assert_eq!(stats.sent_chunks, 0);
        assert_eq!(stats.skipped_chunks, 0);
    }

    #[test]
    fn brief_speech_blip_is_discarded_not_committed() {
        let node = test_node();
        node.ingest_block(&speech_block());
        for _ in 0..5 {
            node.ingest_block(&silence_block());
        }
        let stats = node.stats();
        assert_eq!(stats.commits, 0);
    }
}
