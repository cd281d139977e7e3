//! SpeechSynthesis — buffers streamed audio deltas into a whole utterance,
//! writes it to disk, and hands the file to a hardware playback
//! collaborator. Owns the `"speaking"` key in the microphone mutex for the
//! duration of playback so the robot never hears its own voice.
//!
//! Like [`crate::aicore::AiCoreNode`], its realtime-event handlers are
//! registered against a `Shared` handle built before the node itself
//! exists, and publish straight through `Arc<MessageBus>` — `Shared::publish`
//! checks the same declared-topic set `NodeRuntime::publish` would.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::aicore::gestures::GestureInjector;
use crate::bus::{Message, MessageBus, Priority};
use crate::chatlog::{ChatLogger, STEP_TTS};
use crate::collab::PlaybackDevice;
use crate::mutex_registry::MutexRegistry;
use crate::realtime::{RealtimeConnection, ServerEvent};
use crate::runtime::Node;

const SPEAKING_ACTIVITY: &str = "speaking";
const WAV_SAMPLE_RATE: u32 = 24_000;
const POST_PLAYBACK_PAD: Duration = Duration::from_millis(300);
const PLAYBACK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Utterance {
    audio_bytes: Vec<u8>,
    transcript: String,
}

struct Shared {
    name: String,
    bus: Arc<MessageBus>,
    mutex_registry: Arc<MutexRegistry>,
    playback: Arc<dyn PlaybackDevice>,
    gestures: GestureInjector,
    chat_logger: Arc<ChatLogger>,
    runtime_handle: tokio::runtime::Handle,
    output_dir: std::path::PathBuf,
    utterance: Mutex<Utterance>,
    speaking_active: AtomicBool,
    published_topics: HashSet<String>,
}

impl Shared {
    fn publish(&self, topic: &str, payload: Value) {
        if !self.published_topics.contains(topic) {
            warn!(node = %self.name, topic, "publish to undeclared topic");
            return;
        }
        self.bus
            .publish(Message::new(topic, payload, self.name.clone(), Priority::Normal));
    }

    fn ensure_speaking_acquired(&self) {
        if !self.speaking_active.swap(true, Ordering::SeqCst) {
            self.mutex_registry.acquire_noisy_activity(SPEAKING_ACTIVITY);
            self.publish("speaking_status", json!({ "speaking": true, "timestamp": now_ms() }));
        }
    }

    /// Releases the mutex and flips the `speaking_status` flag at most once
    /// regardless of how many times this is called for one utterance.
    fn release_speaking_if_held(&self) {
        if self.speaking_active.swap(false, Ordering::SeqCst) {
            self.mutex_registry.release_noisy_activity(SPEAKING_ACTIVITY);
            self.publish("speaking_status", json!({ "speaking": false, "timestamp": now_ms() }));
        }
    }
}

pub struct SpeechSynthesisNode {
    shared: Arc<Shared>,
}

impl SpeechSynthesisNode {
    pub fn new(
        name: impl Into<String>,
        bus: Arc<MessageBus>,
        realtime: Arc<RealtimeConnection>,
        mutex_registry: Arc<MutexRegistry>,
        playback: Arc<dyn PlaybackDevice>,
        chat_logger: Arc<ChatLogger>,
        output_dir: impl Into<std::path::PathBuf>,
        runtime_handle: tokio::runtime::Handle,
        published_topics: impl IntoIterator<Item = String>,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            name: name.into(),
            bus,
            mutex_registry,
            playback,
            gestures: GestureInjector::new(),
            chat_logger,
            runtime_handle,
            output_dir: output_dir.into(),
            utterance: Mutex::new(Utterance::default()),
            speaking_active: AtomicBool::new(false),
            published_topics: published_topics.into_iter().collect(),
        });
        register_handlers(&shared, &realtime);
        Arc::new(Self { shared })
    }
}

fn register_handlers(shared: &Arc<Shared>, realtime: &Arc<RealtimeConnection>) {
    {
        let shared = Arc::clone(shared);
        realtime.on("response.output_item.added", Box::new(move |_event| {
            let mut utterance = shared.utterance.lock();
            *utterance = Utterance::default();
            drop(utterance);
            shared.ensure_speaking_acquired();
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("response.audio.delta", Box::new(move |event| {
            if let ServerEvent::AudioDelta { delta, .. } = event {
                shared.ensure_speaking_acquired();
                match BASE64.decode(delta) {
                    Ok(bytes) => shared.utterance.lock().audio_bytes.extend_from_slice(&bytes),
                    Err(e) => warn!(node = %shared.name, error = %e, "could not decode audio delta"),
                }
            }
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("response.audio_transcript.delta", Box::new(move |event| {
            if let ServerEvent::AudioTranscriptDelta { delta, .. } = event {
                shared.utterance.lock().transcript.push_str(delta);
            }
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("response.audio.done", Box::new(move |_event| {
            let spawn_shared = Arc::clone(&shared);
            shared.runtime_handle.spawn(async move {
                finish_utterance(&spawn_shared).await;
            });
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("error", Box::new(move |event| {
            if let ServerEvent::Error { error } = event {
                warn!(node = %shared.name, message = %error.message, "realtime error during synthesis");
            }
            shared.release_speaking_if_held();
        }));
    }
}

async fn finish_utterance(shared: &Arc<Shared>) {
    let (audio_bytes, transcript) = {
        let utterance = shared.utterance.lock();
        (utterance.audio_bytes.clone(), utterance.transcript.clone())
    };

    if !transcript.trim().is_empty() {
        let speed = shared.gestures.detect_speed(&transcript);
        let actions: Vec<String> = shared
            .gestures
            .select_gestures(&transcript)
            .into_iter()
            .map(|g| format!("{g}:{}", speed.as_str()))
            .collect();
        shared.publish("robot_action", json!({
            "actions": actions,
            "source_text": transcript,
            "mood": Value::Null,
            "priority": "normal",
            "timestamp": now_ms(),
        }));
    }

    if audio_bytes.is_empty() {
        shared.release_speaking_if_held();
        return;
    }

    let output_dir = shared.output_dir.clone();
    let write_result = tokio::task::spawn_blocking(move || write_wav(&output_dir, &audio_bytes)).await;

    let path = match write_result {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => {
            error!("failed to write utterance WAV: {e}");
            shared.release_speaking_if_held();
            return;
        }
        Err(e) => {
            error!("WAV write task panicked: {e}");
            shared.release_speaking_if_held();
            return;
        }
    };

    let path_str = path.to_string_lossy().to_string();
    if let Err(e) = shared.playback.play(&path_str) {
        error!(path = %path_str, error = %e, "playback failed");
        shared.chat_logger.log_step("unknown", STEP_TTS, None, None).fail(e.to_string());
        shared.release_speaking_if_held();
        return;
    }

    while shared.playback.is_playing() {
        tokio::time::sleep(PLAYBACK_POLL_INTERVAL).await;
    }
    tokio::time::sleep(POST_PLAYBACK_PAD).await;

    shared.release_speaking_if_held();
}

fn write_wav(output_dir: &std::path::Path, pcm16_le: &[u8]) -> Result<std::path::PathBuf, hound::Error> {
    std::fs::create_dir_all(output_dir).map_err(hound::Error::IoError)?;
    let filename = format!("utterance-{}.wav", uuid::Uuid::new_v4());
    let path = output_dir.join(filename);

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: WAV_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    for chunk in pcm16_le.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(path)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Node for SpeechSynthesisNode {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn known_callbacks(&self) -> &'static [&'static str] {
        &["on_text_response"]
    }

    fn initialize(&self) -> Result<(), String> {
        Ok(())
    }

    fn main_loop(&self) -> Result<(), String> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(())
    }

    fn cleanup(&self) {
        self.shared.release_speaking_if_held();
    }

    fn dispatch(&self, callback: &str, message: &Message) {
        if callback == "on_text_response" {
            // Logged for the offline timeline only — the streaming audio
            // path is authoritative and must not be triggered twice.
            let conversation_id = message
                .payload
                .get("conversation_id")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let text = message.payload.get("text").and_then(Value::as_str).map(str::to_string);
            self.shared
                .chat_logger
                .log_step(conversation_id, "text_response_logged", text, None)
                .succeed(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{CollabError, Unavailable};
    use crate::realtime::{Auth, InputAudioTranscription, SessionConfig};
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    struct StubPlayback {
        playing: StdAtomicBool,
    }

    impl PlaybackDevice for StubPlayback {
        fn play(&self, _wav_path: &str) -> Result<(), CollabError> {
            self.playing.store(true, Ordering::SeqCst);
            self.playing.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }
        fn stop(&self) {
            self.playing.store(false, Ordering::SeqCst);
        }
    }

    fn session_config() -> SessionConfig {
        SessionConfig {
            modalities: vec!["text".to_string(), "audio".to_string()],
            voice: "alloy".to_string(),
            instructions: "be helpful".to_string(),
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

    fn published_topics() -> Vec<String> {
        ["speaking_status", "robot_action"].iter().map(|s| s.to_string()).collect()
    }

    fn node(tmp: &std::path::Path) -> (Arc<MessageBus>, Arc<MutexRegistry>, Arc<SpeechSynthesisNode>) {
        let bus = Arc::new(MessageBus::new());
        let realtime = Arc::new(RealtimeConnection::new(
            "wss://example.invalid",
            Auth::ApiKey("test".to_string()),
            session_config(),
        ));
        let mutex_registry = Arc::new(MutexRegistry::new());
        let playback = Arc::new(StubPlayback { playing: StdAtomicBool::new(false) });
        let chat_logger = Arc::new(ChatLogger::new());
        let handle = tokio::runtime::Handle::current();
        let node = SpeechSynthesisNode::new(
            "speech_synthesis",
            Arc::clone(&bus),
            realtime,
            Arc::clone(&mutex_registry),
            playback,
            chat_logger,
            tmp.to_path_buf(),
            handle,
            published_topics(),
        );
        (bus, mutex_registry, node)
    }

    #[tokio::test]
    async fn release_without_acquire_is_noop() {
        let tmp = tempdir();
        let (_bus, registry, node) = node(&tmp);
        node.shared.release_speaking_if_held();
        assert!(registry.is_microphone_available());
    }

    #[tokio::test]
    async fn ensure_speaking_acquired_is_idempotent() {
        let tmp = tempdir();
        let (_bus, registry, node) = node(&tmp);
        node.shared.ensure_speaking_acquired();
        node.shared.ensure_speaking_acquired();
        assert!(!registry.is_microphone_available());
        node.shared.release_speaking_if_held();
        assert!(registry.is_microphone_available());
    }

    #[tokio::test]
    async fn text_response_is_logged_not_acted_on() {
        let tmp = tempdir();
        let (_bus, _registry, node) = node(&tmp);
        let message = Message::new(
            "text_response",
            json!({ "text": "hello", "conversation_id": "c1" }),
            "ai_core",
            Priority::Normal,
        );
        node.dispatch("on_text_response", &message);
        let steps = node.shared.chat_logger.steps_for("c1");
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn wav_write_roundtrips_sample_count() {
        let tmp = tempdir();
        let pcm: Vec<u8> = (0i16..100).flat_map(|s| s.to_le_bytes()).collect();
        let path = write_wav(&tmp, &pcm).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, WAV_SAMPLE_RATE);
        assert_eq!(reader.len(), 100);
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("conduit-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
