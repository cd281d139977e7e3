//! Runtime core for a voice-driven conversational robot: a declarative
//! pub/sub message bus, node lifecycle management, a persistent realtime
//! voice session, and the launcher that wires them together from YAML
//! config.
//!
//! Module map:
//!   - [`bus`] — topic registry and fan-out delivery.
//!   - [`config`] — YAML descriptors and `${VAR}` expansion.
//!   - [`runtime`] — the `Node` trait and its worker lifecycle.
//!   - [`realtime`] — the streaming LLM session (transport, events, backoff).
//!   - [`audio`] — microphone capture, VAD, and the mutex-gated pipeline.
//!   - [`aicore`] — turns voice commands into realtime turns; tools, gestures,
//!     vision-intent detection.
//!   - [`synthesis`] — buffers streamed audio into an utterance and plays it.
//!   - [`mutex_registry`] — the microphone/noisy-activity coordination lock.
//!   - [`chatlog`] — per-conversation step timeline for offline analytics.
//!   - [`collab`] — capability seams for hardware this core doesn't own.
//!   - [`launcher`] — process entry: startup order, signals, shutdown.
//!   - [`error`] — crate-wide error aggregation.

pub mod aicore;
pub mod audio;
pub mod bus;
pub mod chatlog;
pub mod collab;
pub mod config;
pub mod error;
pub mod launcher;
pub mod mutex_registry;
pub mod realtime;
pub mod runtime;
pub mod synthesis;

pub use error::{CoreError, Result};
