//! External capability interfaces.
//!
//! Hardware drivers for motors, the speaker, and the camera are out of
//! scope for this core — it only defines the seams a real deployment plugs
//! concrete collaborators into. This replaces the original behavior's
//! pattern of reaching into a shared hardware utility module and monkey
//! patching it at runtime: every capability here is an explicit trait
//! injected into the node that needs it, and a missing capability returns a
//! typed "not available" result instead of the call succeeding silently or
//! panicking.
//!
//! Camera and memory access go through the bus (`snap_pic`/`visual_data`,
//! `memory_request`/`memory_response`) rather than a trait, since those
//! collaborators are themselves modeled as nodes elsewhere in the system.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("capability not available: {0}")]
    NotAvailable(String),

    #[error("collaborator call failed: {0}")]
    Failed(String),
}

/// Accepts a WAV file path; playback itself is blocking or started+pollable.
/// File-based so the streaming/synthesis path can change without touching
/// playback hardware.
pub trait PlaybackDevice: Send + Sync {
    fn play(&self, wav_path: &str) -> Result<(), CollabError>;
    fn is_playing(&self) -> bool;
    fn stop(&self);
}

/// The explicit capability interface named by this core's redesign notes:
/// anything that moves the robot's body goes through here rather than a
/// shared mutable hardware handle.
#[async_trait]
pub trait MotorController: Send + Sync {
    async fn perform_gesture(&self, gesture_name: &str, speed: &str) -> Result<(), CollabError>;
}

#[async_trait]
pub trait VisionCompletion: Send + Sync {
    /// Runs a separate, non-streaming completion against a still image and
    /// returns a short objective description.
    async fn describe_image(&self, image_data_base64: &str) -> Result<String, CollabError>;
}

/// Placeholder used wherever no concrete collaborator is wired yet.
pub struct Unavailable {
    name: &'static str,
}

impl Unavailable {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl PlaybackDevice for Unavailable {
    fn play(&self, _wav_path: &str) -> Result<(), CollabError> {
        Err(CollabError::NotAvailable(self.name.to_string()))
    }
    fn is_playing(&self) -> bool {
        false
    }
    fn stop(&self) {}
}

#[async_trait]
impl MotorController for Unavailable {
    async fn perform_gesture(&self, _gesture_name: &str, _speed: &str) -> Result<(), CollabError> {
        Err(CollabError::NotAvailable(self.name.to_string()))
    }
}

#[async_trait]
impl VisionCompletion for Unavailable {
    async fn describe_image(&self, _image_data_base64: &str) -> Result<String, CollabError> {
        Err(CollabError::NotAvailable(self.name.to_string()))
    }
}
