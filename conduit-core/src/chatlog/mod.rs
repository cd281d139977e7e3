//! Per-conversation step timeline for offline chat analytics.
//!
//! Not on the hot path for correctness — a step record that's lost or
//! delayed never affects message delivery or the voice pipeline. Held in an
//! in-process store; a real deployment would flush this to a sink, but that
//! sink is outside this core's scope.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// The canonical step names this core records.
pub const STEP_REQUEST: &str = "request";
pub const STEP_STT: &str = "stt";
pub const STEP_GPT: &str = "gpt";
pub const STEP_TTS: &str = "tts";
pub const STEP_RESPONSE: &str = "response";
pub const STEP_SLEEP: &str = "sleep";

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub conversation_id: String,
    pub step_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub status: Option<String>,
    pub input_text: Option<String>,
    pub output_text: Option<String>,
    pub metadata: Option<Value>,
    pub error: Option<String>,
}

/// A scoped handle returned by [`ChatLogger::log_step`]. Dropping it without
/// calling [`StepHandle::fail`] records success.
pub struct StepHandle<'a> {
    logger: &'a ChatLogger,
    conversation_id: String,
    step_name: String,
    started_monotonic: Instant,
    index: usize,
    finished: bool,
}

impl<'a> StepHandle<'a> {
    pub fn succeed(mut self, output_text: Option<String>) {
        self.finish(Ok(output_text));
    }

    pub fn fail(mut self, error: impl Into<String>) {
        self.finish(Err(error.into()));
    }

    fn finish(&mut self, outcome: Result<Option<String>, String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let duration_ms = self.started_monotonic.elapsed().as_secs_f64() * 1000.0;
        let mut records = self.logger.records.lock();
        if let Some(record) = records.get_mut(self.index) {
            record.ended_at = Some(Utc::now());
            record.duration_ms = Some(duration_ms);
            match outcome {
                Ok(output_text) => {
                    record.status = Some("success".to_string());
                    record.output_text = output_text;
                }
                Err(error) => {
                    record.status = Some("fail".to_string());
                    record.error = Some(error);
                }
            }
        }
    }
}

impl<'a> Drop for StepHandle<'a> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Ok(None));
        }
    }
}

/// Keyed by `conversation_id`; holds every step record seen so far. A process
/// singleton by construction — the launcher owns the one instance.
#[derive(Default)]
pub struct ChatLogger {
    records: Mutex<Vec<StepRecord>>,
    by_conversation: Mutex<HashMap<String, Vec<usize>>>,
}

impl ChatLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_step(
        &self,
        conversation_id: impl Into<String>,
        step_name: impl Into<String>,
        input_text: Option<String>,
        metadata: Option<Value>,
    ) -> StepHandle<'_> {
        let conversation_id = conversation_id.into();
        let step_name = step_name.into();
        let record = StepRecord {
            conversation_id: conversation_id.clone(),
            step_name: step_name.clone(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            status: None,
            input_text,
            output_text: None,
            metadata,
            error: None,
        };

        let mut records = self.records.lock();
        let index = records.len();
        records.push(record);
        drop(records);

        self.by_conversation
            .lock()
            .entry(conversation_id.clone())
            .or_default()
            .push(index);

        StepHandle {
            logger: self,
            conversation_id,
            step_name,
            started_monotonic: Instant::now(),
            index,
            finished: false,
        }
    }

    pub fn steps_for(&self, conversation_id: &str) -> Vec<StepRecord> {
        let by_conversation = self.by_conversation.lock();
        let records = self.records.lock();
        match by_conversation.get(conversation_id) {
            Some(indices) => indices
                .iter()
                .filter_map(|i| records.get(*i).cloned())
                .collect(),
            None => {
                warn!(conversation_id, "no chat log steps recorded");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_records_duration_and_success_on_succeed() {
        let logger = ChatLogger::new();
        let step = logger.log_step("c1", STEP_GPT, Some("hi".to_string()), None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        step.succeed(Some("hello back".to_string()));

        let steps = logger.steps_for("c1");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status.as_deref(), Some("success"));
        assert!(steps[0].duration_ms.unwrap() > 0.0);
        assert_eq!(steps[0].output_text.as_deref(), Some("hello back"));
    }

    #[test]
    fn step_records_failure_reason() {
        let logger = ChatLogger::new();
        let step = logger.log_step("c2", STEP_TTS, None, None);
        step.fail("playback device busy");

        let steps = logger.steps_for("c2");
        assert_eq!(steps[0].status.as_deref(), Some("fail"));
        assert_eq!(steps[0].error.as_deref(), Some("playback device busy"));
    }

    #[test]
    fn dropped_handle_without_explicit_outcome_records_success() {
        let logger = ChatLogger::new();
        {
            let _step = logger.log_step("c3", STEP_SLEEP, None, None);
        }
        let steps = logger.steps_for("c3");
        assert_eq!(steps[0].status.as_deref(), Some("success"));
    }

    #[test]
    fn unknown_conversation_returns_empty() {
        let logger = ChatLogger::new();
        assert!(logger.steps_for("nope").is_empty());
    }

    #[test]
    fn multiple_steps_stitched_by_conversation_id() {
        let logger = ChatLogger::new();
        logger
            .log_step("c4", STEP_REQUEST, None, None)
            .succeed(None);
        logger.log_step("c4", STEP_STT, None, None).succeed(None);
        logger.log_step("c4", STEP_GPT, None, None).succeed(None);
        let steps = logger.steps_for("c4");
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].step_name, STEP_GPT);
    }
}
