//! AiCore — the reasoning hub. Turns `voice_command` bus messages into
//! realtime-session turns, drains server events (text/audio deltas,
//! function calls) back onto the bus, and runs the vision-intent and
//! minimum-gesture policies described alongside it.
//!
//! Event handlers registered on [`RealtimeConnection`] run on whatever
//! thread the connection's background task is polled from (a tokio
//! worker), not on this node's own `dispatch()` thread. They close over a
//! [`Shared`] handle built *before* the `Node` trait object exists, so they
//! never need to reach back into the node itself — only into the bus,
//! the connection, and this module's own turn-tracking state. Publishing
//! from inside those handlers goes straight through `Arc<MessageBus>`
//! rather than `NodeRuntime::publish`, since there is no `NodeRuntime`
//! reference available at that point; `Shared::publish` re-checks the same
//! declared-topic set `NodeRuntime::publish` would, so an undeclared topic
//! is dropped with a warning either way.

pub mod gestures;
pub mod tools;
pub mod vision;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::bus::{Message, MessageBus, Priority};
use crate::chatlog::{ChatLogger, STEP_GPT, STEP_REQUEST};
use crate::collab::VisionCompletion;
use crate::realtime::{
    ClientEvent, ContentPart, ConversationItem, RealtimeConnection, ResponseCreateParams, ServerEvent,
};
use crate::runtime::Node;

use gestures::{GestureInjector, MIN_GESTURES};
use tools::ToolCatalog;
use vision::VisionIntent;

const STUCK_RESPONSE_AGE: Duration = Duration::from_secs(30);
const AUTONOMOUS_VISION_BASE: Duration = Duration::from_secs(180);
const AUTONOMOUS_VISION_FLOOR: Duration = Duration::from_secs(15);

struct PendingCall {
    name: Option<String>,
    arguments: String,
}

struct PendingVision {
    user_text: String,
    conversation_id: String,
}

struct TurnState {
    conversation_id: String,
    response_text: String,
    gesture_calls_this_response: u32,
    had_audio_transcript: bool,
    awaiting_vision: Option<PendingVision>,
    pending_visual_data: Option<String>,
    function_calls: HashMap<String, PendingCall>,
    next_autonomous_at: Instant,
}

impl Default for TurnState {
    fn default() -> Self {
        Self {
            conversation_id: String::new(),
            response_text: String::new(),
            gesture_calls_this_response: 0,
            had_audio_transcript: false,
            awaiting_vision: None,
            pending_visual_data: None,
            function_calls: HashMap::new(),
            next_autonomous_at: Instant::now() + AUTONOMOUS_VISION_BASE,
        }
    }
}

/// State shared between the node's own `dispatch()`/`main_loop()` calls and
/// the realtime-event closures registered in [`AiCoreNode::new`].
struct Shared {
    name: String,
    bus: Arc<MessageBus>,
    realtime: Arc<RealtimeConnection>,
    chat_logger: Arc<ChatLogger>,
    gestures: GestureInjector,
    vision: Arc<dyn VisionCompletion>,
    tools: ToolCatalog,
    runtime_handle: tokio::runtime::Handle,
    turn: Mutex<TurnState>,
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

    fn heal_stuck_response(&self) {
        if self.realtime.response_in_progress() {
            if let Some(age) = self.realtime.response_age() {
                if age >= STUCK_RESPONSE_AGE {
                    warn!(node = %self.name, age_secs = age.as_secs_f64(), "clearing stuck response flag");
                    self.realtime.clear_stuck_response();
                }
            }
        }
    }

    fn inject_user_turn(&self, text: &str, conversation_id: &str) {
        self.realtime.send_sync(ClientEvent::ConversationItemCreate {
            item: ConversationItem::Message {
                role: "user".to_string(),
                content: vec![ContentPart::InputText { text: text.to_string() }],
            },
        });
        self.realtime.send_sync(ClientEvent::ResponseCreate {
            response: ResponseCreateParams {
                modalities: vec!["text".to_string(), "audio".to_string()],
            },
        });
        self.publish("system_mode", json!({ "mode": "thinking", "reason": "turn_started", "timestamp": now_ms() }));
    }
}

pub struct AiCoreNode {
    shared: Arc<Shared>,
}

impl AiCoreNode {
    pub fn new(
        name: impl Into<String>,
        bus: Arc<MessageBus>,
        realtime: Arc<RealtimeConnection>,
        chat_logger: Arc<ChatLogger>,
        vision: Arc<dyn VisionCompletion>,
        runtime_handle: tokio::runtime::Handle,
        published_topics: impl IntoIterator<Item = String>,
    ) -> Arc<Self> {
        let name = name.into();
        let published_topics: HashSet<String> = published_topics.into_iter().collect();
        let tools = ToolCatalog::new(Arc::clone(&bus), name.clone(), published_topics.clone());
        let shared = Arc::new(Shared {
            name,
            bus,
            realtime: Arc::clone(&realtime),
            chat_logger,
            gestures: GestureInjector::new(),
            vision,
            tools,
            runtime_handle,
            turn: Mutex::new(TurnState::default()),
            published_topics,
        });

        register_handlers(&shared, &realtime);
        Arc::new(Self { shared })
    }

    fn handle_voice_command(&self, message: &Message) {
        self.shared.heal_stuck_response();

        if self.shared.realtime.response_in_progress() {
            warn!(node = %self.shared.name, "dropping voice_command: response already in progress");
            return;
        }

        let text = match message.payload.get("text").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => {
                warn!(node = %self.shared.name, "voice_command missing text field");
                return;
            }
        };
        let conversation_id = message
            .payload
            .get("conversation_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let step = self.shared.chat_logger.log_step(
            conversation_id.clone(),
            STEP_REQUEST,
            Some(text.clone()),
            None,
        );

        {
            let mut turn = self.shared.turn.lock();
            turn.conversation_id = conversation_id.clone();
            turn.response_text.clear();
            turn.gesture_calls_this_response = 0;
        }

        match vision::detect_intent(&text) {
            VisionIntent::Blocking => {
                self.shared.turn.lock().awaiting_vision = Some(PendingVision {
                    user_text: text.clone(),
                    conversation_id: conversation_id.clone(),
                });
                self.shared.publish(
                    "snap_pic",
                    json!({ "requested_by": self.shared.name, "timestamp": now_ms(), "trigger": "vision_intent_blocking" }),
                );
            }
            VisionIntent::Background => {
                self.shared.publish(
                    "snap_pic",
                    json!({ "requested_by": self.shared.name, "timestamp": now_ms(), "trigger": "vision_intent_background" }),
                );
                self.shared.inject_user_turn(&text, &conversation_id);
            }
            VisionIntent::None => {
                self.shared.inject_user_turn(&text, &conversation_id);
            }
        }

        step.succeed(None);
    }

    fn handle_visual_data(&self, message: &Message) {
        let image_data = match message.payload.get("image_data").and_then(Value::as_str) {
            Some(d) => d.to_string(),
            None => return,
        };

        if self.shared.realtime.response_in_progress() {
            // A response is already streaming; injecting a conversation item
            // now would interleave with it. Hold the image and process it
            // once `response.done` fires.
            self.shared.turn.lock().pending_visual_data = Some(image_data);
            return;
        }

        let shared = Arc::clone(&self.shared);
        self.shared.runtime_handle.spawn(async move {
            process_visual_data(shared, image_data).await;
        });
    }

    fn maybe_trigger_autonomous_vision(&self) {
        let due = {
            let turn = self.shared.turn.lock();
            Instant::now() >= turn.next_autonomous_at
        };
        if !due {
            return;
        }
        self.shared.publish(
            "snap_pic",
            json!({ "requested_by": self.shared.name, "timestamp": now_ms(), "trigger": "autonomous_random" }),
        );
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(-0.5..=0.5);
        let secs = (AUTONOMOUS_VISION_BASE.as_secs_f64() * (1.0 + jitter)).max(AUTONOMOUS_VISION_FLOOR.as_secs_f64());
        self.shared.turn.lock().next_autonomous_at = Instant::now() + Duration::from_secs_f64(secs);
    }
}

async fn process_visual_data(shared: Arc<Shared>, image_data: String) {
    let description = match shared.vision.describe_image(&image_data).await {
        Ok(d) => d,
        Err(e) => {
            warn!(node = %shared.name, error = %e, "vision completion failed");
            return;
        }
    };
    let marker = format!("[SYSTEM: Your camera is showing you this view: {description}]");
    shared.realtime.send_sync(ClientEvent::ConversationItemCreate {
        item: ConversationItem::Message {
            role: "user".to_string(),
            content: vec![ContentPart::InputText { text: marker }],
        },
    });

    let pending = shared.turn.lock().awaiting_vision.take();
    if let Some(pending) = pending {
        shared.inject_user_turn(&pending.user_text, &pending.conversation_id);
    }
}

fn register_handlers(shared: &Arc<Shared>, realtime: &Arc<RealtimeConnection>) {
    {
        let shared = Arc::clone(shared);
        realtime.on("response.text.delta", Box::new(move |event| {
            if let ServerEvent::TextDelta { delta, .. } = event {
                shared.turn.lock().response_text.push_str(delta);
            }
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("response.audio_transcript.delta", Box::new(move |event| {
            if let ServerEvent::AudioTranscriptDelta { delta, .. } = event {
                let mut turn = shared.turn.lock();
                turn.response_text.push_str(delta);
                turn.had_audio_transcript = true;
            }
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("response.text.done", Box::new(move |event| {
            if let ServerEvent::TextDone { text, .. } = event {
                let conversation_id = shared.turn.lock().conversation_id.clone();
                shared.publish("text_response", json!({
                    "text": text,
                    "voice": Value::Null,
                    "priority": "normal",
                    "timestamp": now_ms(),
                    "conversation_id": conversation_id,
                }));
                shared.chat_logger
                    .log_step(conversation_id, STEP_GPT, None, None)
                    .succeed(Some(text.clone()));
            }
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("response.function_call_arguments.delta", Box::new(move |event| {
            if let ServerEvent::FunctionCallArgumentsDelta { call_id, delta } = event {
                let mut turn = shared.turn.lock();
                let entry = turn.function_calls.entry(call_id.clone()).or_insert(PendingCall {
                    name: None,
                    arguments: String::new(),
                });
                entry.arguments.push_str(delta);
            }
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("response.function_call_arguments.done", Box::new(move |event| {
            if let ServerEvent::FunctionCallArgumentsDone { call_id, name, arguments } = event {
                let call_id = call_id.clone();
                let tool_name = name.clone().or_else(|| {
                    shared.turn.lock().function_calls.get(&call_id).and_then(|c| c.name.clone())
                });
                let arguments = arguments.clone();
                shared.turn.lock().function_calls.remove(&call_id);

                let Some(tool_name) = tool_name else {
                    warn!(call_id = %call_id, "function call completed with no known tool name");
                    return;
                };

                if tool_name == "perform_gesture" {
                    shared.turn.lock().gesture_calls_this_response += 1;
                }

                let spawn_shared = Arc::clone(&shared);
                shared.runtime_handle.spawn(async move {
                    let output = match spawn_shared.tools.dispatch(&tool_name, &arguments).await {
                        Ok(v) => v,
                        Err(e) => json!({ "status": "error", "message": e.to_string() }),
                    };
                    spawn_shared.realtime.send_sync(ClientEvent::ConversationItemCreate {
                        item: ConversationItem::FunctionCallOutput {
                            call_id: call_id.clone(),
                            output: output.to_string(),
                        },
                    });
                    spawn_shared.realtime.send_sync(ClientEvent::ResponseCreate {
                        response: ResponseCreateParams { modalities: vec!["text".to_string(), "audio".to_string()] },
                    });
                });
            }
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("response.done", Box::new(move |_event| {
            let (text, gesture_calls, conversation_id, had_audio_transcript) = {
                let turn = shared.turn.lock();
                (
                    turn.response_text.clone(),
                    turn.gesture_calls_this_response,
                    turn.conversation_id.clone(),
                    turn.had_audio_transcript,
                )
            };
            // When this turn carried an audio transcript, SpeechSynthesis's
            // own `response.audio.done` handler already tops up gestures for
            // it — topping up here too would double the robot_action batch.
            if !text.trim().is_empty() && gesture_calls < MIN_GESTURES as u32 && !had_audio_transcript {
                let needed = MIN_GESTURES - gesture_calls as usize;
                let speed = shared.gestures.detect_speed(&text);
                let actions: Vec<String> = shared
                    .gestures
                    .select_gestures(&text)
                    .into_iter()
                    .take(needed.max(1))
                    .map(|g| format!("{g}:{}", speed.as_str()))
                    .collect();
                if !actions.is_empty() {
                    shared.publish("robot_action", json!({
                        "actions": actions,
                        "source_text": text,
                        "mood": Value::Null,
                        "priority": "normal",
                        "timestamp": now_ms(),
                    }));
                }
            }
            shared.publish("system_mode", json!({ "mode": "idle", "reason": "response_done", "timestamp": now_ms() }));
            debug!(node = %shared.name, conversation_id, "response done");

            let pending_image = {
                let mut turn = shared.turn.lock();
                turn.response_text.clear();
                turn.gesture_calls_this_response = 0;
                turn.had_audio_transcript = false;
                turn.pending_visual_data.take()
            };
            if let Some(image_data) = pending_image {
                let spawn_shared = Arc::clone(&shared);
                shared.runtime_handle.spawn(async move {
                    process_visual_data(spawn_shared, image_data).await;
                });
            }
        }));
    }
    {
        let shared = Arc::clone(shared);
        realtime.on("error", Box::new(move |event| {
            if let ServerEvent::Error { error } = event {
                warn!(node = %shared.name, message = %error.message, "realtime server error");
            }
        }));
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Node for AiCoreNode {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn known_callbacks(&self) -> &'static [&'static str] {
        &["on_voice_command", "on_visual_data"]
    }

    fn initialize(&self) -> Result<(), String> {
        Ok(())
    }

    fn main_loop(&self) -> Result<(), String> {
        self.maybe_trigger_autonomous_vision();
        std::thread::sleep(Duration::from_secs(1));
        Ok(())
    }

    fn cleanup(&self) {}

    fn dispatch(&self, callback: &str, message: &Message) {
        match callback {
            "on_voice_command" => self.handle_voice_command(message),
            "on_visual_data" => self.handle_visual_data(message),
            other => warn!(node = %self.shared.name, callback = other, "unhandled callback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{CollabError, Unavailable};
    use crate::realtime::{Auth, InputAudioTranscription, SessionConfig};
    use async_trait::async_trait;

    struct StubVision {
        description: String,
    }

    #[async_trait]
    impl VisionCompletion for StubVision {
        async fn describe_image(&self, _image_data_base64: &str) -> Result<String, CollabError> {
            Ok(self.description.clone())
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
        ["snap_pic", "system_mode", "text_response", "robot_action", "memory_request"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn node() -> (Arc<MessageBus>, Arc<AiCoreNode>) {
        let bus = Arc::new(MessageBus::new());
        let realtime = Arc::new(RealtimeConnection::new(
            "wss://example.invalid",
            Auth::ApiKey("test".to_string()),
            session_config(),
        ));
        let chat_logger = Arc::new(ChatLogger::new());
        let vision = Arc::new(Unavailable::new("vision"));
        let handle = tokio::runtime::Handle::current();
        let node = AiCoreNode::new(
            "ai_core",
            Arc::clone(&bus),
            realtime,
            chat_logger,
            vision,
            handle,
            published_topics(),
        );
        (bus, node)
    }

    #[tokio::test]
    async fn plain_voice_command_injects_conversation_item() {
        let (_bus, node) = node();
        let message = Message::new(
            "voice_command",
            json!({ "text": "Hi there", "confidence": 0.95, "conversation_id": "c1" }),
            "stt",
            Priority::Normal,
        );
        node.dispatch("on_voice_command", &message);
        assert_eq!(node.shared.turn.lock().conversation_id, "c1");
    }

    #[tokio::test]
    async fn vision_intent_suspends_turn_until_visual_data_arrives() {
        let (bus, node) = node();
        let rx = bus.subscribe("listener", "snap_pic");
        let message = Message::new(
            "voice_command",
            json!({ "text": "What do you see?", "conversation_id": "c2" }),
            "stt",
            Priority::Normal,
        );
        node.dispatch("on_voice_command", &message);
        assert!(node.shared.turn.lock().awaiting_vision.is_some());
        let snap = rx.try_recv().unwrap();
        assert_eq!(snap.payload["trigger"], "vision_intent_blocking");
    }

    #[tokio::test]
    async fn visual_data_resumes_pending_vision_turn() {
        let (_bus, node) = node();
        node.shared.turn.lock().awaiting_vision = Some(PendingVision {
            user_text: "What do you see?".to_string(),
            conversation_id: "c3".to_string(),
        });
        let message = Message::new(
            "visual_data",
            json!({ "image_data": "base64stub", "capture_id": "cap1" }),
            "camera",
            Priority::Normal,
        );
        node.dispatch("on_visual_data", &message);
        // The spawned task runs on this test's own tokio runtime; give it a
        // chance to complete before asserting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(node.shared.turn.lock().awaiting_vision.is_none());
    }

    #[tokio::test]
    async fn missing_text_field_does_not_panic() {
        let (_bus, node) = node();
        let message = Message::new("voice_command", json!({}), "stt", Priority::Normal);
        node.dispatch("on_voice_command", &message);
    }

    #[test]
    fn stub_vision_returns_configured_description() {
        let stub = StubVision { description: "a kitchen".to_string() };
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(stub.describe_image("x"));
        assert_eq!(result.unwrap(), "a kitchen");
    }
}
