//! Typed client/server events for the streaming LLM wire protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events this core sends upstream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseCreateParams },
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseCreateParams {
    pub modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: String,
        content: Vec<ContentPart>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputAudioTranscription {
    pub model: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: InputAudioTranscription,
    /// `None` ⇒ manual commit (the `turn_detection: null` case in spec §6).
    pub turn_detection: Option<TurnDetection>,
    pub tools: Vec<Value>,
}

/// Events this core receives from the server. Only the subset named in the
/// spec's event list is modeled; anything else falls into `Unknown` and is
/// logged, not dropped silently.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: Value },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: Value },

    #[serde(rename = "response.created")]
    ResponseCreated { response: Value },

    #[serde(rename = "response.done")]
    ResponseDone { response: Value },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        response_id: String,
        item: OutputItem,
    },

    #[serde(rename = "response.text.delta")]
    TextDelta { item_id: String, delta: String },

    #[serde(rename = "response.text.done")]
    TextDone { item_id: String, text: String },

    #[serde(rename = "response.audio.delta")]
    AudioDelta { item_id: String, delta: String },

    #[serde(rename = "response.audio.done")]
    AudioDone { item_id: String },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { item_id: String, delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone { item_id: String, transcript: String },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { call_id: String, delta: String },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: Option<String>,
        arguments: String,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted { audio_start_ms: u64 },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped { audio_end_ms: u64 },

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: Value },

    #[serde(rename = "error")]
    Error { error: ServerError },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerError {
    pub code: Option<String>,
    pub message: String,
}

impl ServerError {
    pub fn is_active_response_conflict(&self) -> bool {
        self.code.as_deref() == Some("conversation_already_has_active_response")
            || self.message.contains("conversation_already_has_active_response")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Option<String>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

/// A named tag distinguishing every `ServerEvent` variant, used by
/// [`crate::realtime::RealtimeConnection::on`] for handler registration.
impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::OutputItemAdded { .. } => "response.output_item.added",
            ServerEvent::TextDelta { .. } => "response.text.delta",
            ServerEvent::TextDone { .. } => "response.text.done",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::AudioDone { .. } => "response.audio.done",
            ServerEvent::AudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::AudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::FunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            ServerEvent::FunctionCallArgumentsDone { .. } => {
                "response.function_call_arguments.done"
            }
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::ConversationItemCreated { .. } => "conversation.item.created",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown => "unknown",
        }
    }
}
