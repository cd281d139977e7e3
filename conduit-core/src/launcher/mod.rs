//! Process entry orchestration: resolves the `startup_order` from the root
//! config into concrete nodes via an explicit name-to-constructor registry,
//! starts them with an inter-node delay, and owns the signal-driven shutdown
//! sequence.
//!
//! This replaces the original behavior's dynamic class-loading-by-convention
//! (scanning a package for a class whose name matched the config key) with a
//! closed, explicit match — a config naming a node this binary doesn't know
//! how to build fails at startup, not at first dispatch.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::aicore::AiCoreNode;
use crate::audio::{AudioCaptureNode, RmsThresholdVad};
use crate::bus::MessageBus;
use crate::chatlog::ChatLogger;
use crate::collab::{PlaybackDevice, Unavailable, VisionCompletion};
use crate::config::{self, ConfigError, RootConfig};
use crate::mutex_registry::MutexRegistry;
use crate::realtime::{Auth, RealtimeConnection, SessionConfig};
use crate::runtime::{Node, NodeRuntime, RuntimeError};
use crate::synthesis::SpeechSynthesisNode;

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("no constructor registered for node '{0}'")]
    UnknownNode(String),
}

/// Everything a node constructor needs, built once before any node starts.
pub struct LauncherContext {
    pub bus: Arc<MessageBus>,
    pub mutex_registry: Arc<MutexRegistry>,
    pub chat_logger: Arc<ChatLogger>,
    pub realtime: Arc<RealtimeConnection>,
    pub playback: Arc<dyn PlaybackDevice>,
    pub vision: Arc<dyn VisionCompletion>,
    pub runtime_handle: tokio::runtime::Handle,
    pub utterance_dir: PathBuf,
}

/// Builds a session config from the root config's environment block, falling
/// back to defaults matched against the streaming endpoint's own defaults
/// rather than this core inventing values of its own.
pub fn session_config_from_env(instructions: impl Into<String>) -> SessionConfig {
    use crate::realtime::InputAudioTranscription;

    SessionConfig {
        modalities: vec!["text".to_string(), "audio".to_string()],
        voice: std::env::var("CONDUIT_VOICE").unwrap_or_else(|_| "alloy".to_string()),
        instructions: instructions.into(),
        input_audio_format: "pcm16".to_string(),
        output_audio_format: "pcm16".to_string(),
        input_audio_transcription: InputAudioTranscription {
            model: std::env::var("CONDUIT_STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string()),
            language: std::env::var("CONDUIT_STT_LANGUAGE").unwrap_or_else(|_| "en".to_string()),
        },
        turn_detection: None,
        tools: vec![],
    }
}

pub fn auth_from_env() -> Auth {
    if let Ok(token) = std::env::var("CONDUIT_EPHEMERAL_TOKEN") {
        Auth::EphemeralToken(token)
    } else {
        Auth::ApiKey(std::env::var("CONDUIT_API_KEY").unwrap_or_default())
    }
}

fn build_node(name: &str, descriptor: &config::NodeDescriptor, ctx: &LauncherContext) -> Result<Arc<dyn Node>, LauncherError> {
    let published_topics: HashSet<String> = descriptor.publishes.iter().map(|p| p.topic.clone()).collect();

    match name {
        "audio_capture" => {
            let vad = Box::new(RmsThresholdVad::default());
            let node = AudioCaptureNode::new(name, Arc::clone(&ctx.realtime), Arc::clone(&ctx.mutex_registry), vad);
            Ok(Arc::new(node) as Arc<dyn Node>)
        }
        "ai_core" => {
            let node = AiCoreNode::new(
                name,
                Arc::clone(&ctx.bus),
                Arc::clone(&ctx.realtime),
                Arc::clone(&ctx.chat_logger),
                Arc::clone(&ctx.vision),
                ctx.runtime_handle.clone(),
                published_topics,
            );
            Ok(node as Arc<dyn Node>)
        }
        "speech_synthesis" => {
            let node = SpeechSynthesisNode::new(
                name,
                Arc::clone(&ctx.bus),
                Arc::clone(&ctx.realtime),
                Arc::clone(&ctx.mutex_registry),
                Arc::clone(&ctx.playback),
                Arc::clone(&ctx.chat_logger),
                ctx.utterance_dir.clone(),
                ctx.runtime_handle.clone(),
                published_topics,
            );
            Ok(node as Arc<dyn Node>)
        }
        other => Err(LauncherError::UnknownNode(other.to_string())),
    }
}

/// Default collaborators used when the launcher is given no concrete
/// hardware bindings — every call reports `NotAvailable` rather than the
/// process panicking or silently doing nothing.
pub fn default_context(
    bus: Arc<MessageBus>,
    realtime: Arc<RealtimeConnection>,
    runtime_handle: tokio::runtime::Handle,
    utterance_dir: impl Into<PathBuf>,
) -> LauncherContext {
    LauncherContext {
        bus,
        mutex_registry: Arc::new(MutexRegistry::new()),
        chat_logger: Arc::new(ChatLogger::new()),
        realtime,
        playback: Arc::new(Unavailable::new("playback_device")),
        vision: Arc::new(Unavailable::new("vision_completion")),
        runtime_handle,
        utterance_dir: utterance_dir.into(),
    }
}

struct RunningNode {
    name: String,
    runtime: NodeRuntime,
}

/// Owns the set of started `NodeRuntime`s in startup order, so shutdown can
/// stop them in reverse order.
pub struct Launcher {
    config: RootConfig,
    running: Vec<RunningNode>,
}

impl Launcher {
    /// Reads the root config and, for each name in `launch.startup_order`,
    /// its per-node descriptor from `nodes_dir/<name>.yaml`.
    pub fn load(root_config_path: impl AsRef<Path>) -> Result<Self, LauncherError> {
        let config = config::load_root_config(root_config_path)?;
        Ok(Self { config, running: Vec::new() })
    }

    pub fn config(&self) -> &RootConfig {
        &self.config
    }

    /// Instantiate and start every node named in `launch.startup_order`, in
    /// order, waiting `system.startup_delay` seconds between each. The first
    /// node that fails to build or start aborts the whole sequence; nodes
    /// already started are stopped before returning the error.
    pub fn start_all(&mut self, nodes_dir: impl AsRef<Path>, ctx: &LauncherContext) -> Result<(), LauncherError> {
        let nodes_dir = nodes_dir.as_ref();
        let startup_delay = Duration::from_secs_f64(self.config.system.startup_delay);

        for (i, name) in self.config.launch.startup_order.clone().iter().enumerate() {
            let descriptor_path = nodes_dir.join(format!("{name}.yaml"));
            let descriptor = config::load_node_descriptor(&descriptor_path)?;

            let result = build_node(name, &descriptor, ctx).and_then(|node| {
                let runtime = NodeRuntime::new(node, &descriptor, Arc::clone(&ctx.bus))?;
                runtime.start()?;
                Ok(runtime)
            });

            match result {
                Ok(runtime) => {
                    info!(node = %name, "node started");
                    self.running.push(RunningNode { name: name.clone(), runtime });
                }
                Err(e) => {
                    error!(node = %name, error = %e, "node failed to start, rolling back");
                    self.stop_all(Duration::from_secs_f64(self.config.system.shutdown_timeout));
                    return Err(e);
                }
            }

            if i + 1 < self.config.launch.startup_order.len() && !startup_delay.is_zero() {
                std::thread::sleep(startup_delay);
            }
        }
        Ok(())
    }

    /// Stop every running node in reverse startup order, each with up to its
    /// share of `timeout` before the runtime force-abandons its threads.
    pub fn stop_all(&mut self, timeout: Duration) {
        for running in self.running.drain(..).rev() {
            info!(node = %running.name, "stopping node");
            running.runtime.stop(timeout);
        }
    }

    pub fn node_statuses(&self) -> HashMap<String, &'static str> {
        self.running
            .iter()
            .map(|r| (r.name.clone(), status_str(&r.runtime)))
            .collect()
    }
}

fn status_str(runtime: &NodeRuntime) -> &'static str {
    use crate::runtime::NodeStatus;
    match runtime.status() {
        NodeStatus::Initializing => "initializing",
        NodeStatus::Running => "running",
        NodeStatus::Stopping => "stopping",
        NodeStatus::Stopped => "stopped",
        NodeStatus::Error => "error",
    }
}

/// Blocks until SIGINT or SIGTERM is received. On non-Unix targets, blocks on
/// Ctrl-C only.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => warn!("received SIGTERM"),
        _ = sigint.recv() => warn!("received SIGINT"),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    warn!("received ctrl-c");
}
