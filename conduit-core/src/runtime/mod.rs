//! Node lifecycle and declarative topic wiring.
//!
//! A `Node` implementation supplies three hooks (`initialize`, `main_loop`,
//! `cleanup`) plus a static list of callback names it knows how to dispatch.
//! `NodeRuntime` owns everything else: wiring subscriptions from a
//! [`NodeDescriptor`], spawning the three cooperating workers, and enforcing
//! the error-threshold / heartbeat / shutdown machinery every node gets for
//! free.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bus::{Message, MessageBus, Priority, SubscriberQueue};
use crate::config::NodeDescriptor;

const MAIN_LOOP_ERROR_THRESHOLD: u64 = 10;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const MESSAGE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAIN_LOOP_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("node '{node}' has no callback named '{callback}' for topic '{topic}'")]
    UnknownCallback {
        node: String,
        topic: String,
        callback: String,
    },

    #[error("node '{0}' failed to initialize: {1}")]
    InitFailed(String, String),

    #[error("node '{0}' is already running")]
    AlreadyRunning(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Initializing,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl NodeStatus {
    fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Initializing => "initializing",
            NodeStatus::Running => "running",
            NodeStatus::Stopping => "stopping",
            NodeStatus::Stopped => "stopped",
            NodeStatus::Error => "error",
        }
    }
}

/// User-supplied node behavior. `dispatch` is invoked serially per node (one
/// message worker) so implementations never need internal locking against
/// concurrent callback calls.
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    /// Names this node can wire a `subscribes` entry's `callback` field to.
    /// Declaring a callback not in this list fails wiring before the node
    /// ever starts.
    fn known_callbacks(&self) -> &'static [&'static str];

    fn initialize(&self) -> Result<(), String>;

    /// Called repeatedly by the main worker until shutdown or the error
    /// threshold trips. A single iteration's unit of work — not a loop
    /// itself.
    fn main_loop(&self) -> Result<(), String>;

    fn cleanup(&self);

    fn dispatch(&self, callback: &str, message: &Message);
}

struct Subscription {
    topic: String,
    callback: String,
    queue: SubscriberQueue,
}

struct Workers {
    main: Option<JoinHandle<()>>,
    message: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// State shared between `NodeRuntime` and its spawned workers. Kept separate
/// from `NodeRuntime` itself so workers can hold an `Arc<Shared>` without
/// needing the runtime handle (and its `JoinHandle`s) to be `Clone`.
struct Shared {
    node: Arc<dyn Node>,
    bus: Arc<MessageBus>,
    published_topics: HashSet<String>,
    subscriptions: Mutex<Vec<Subscription>>,
    status: Mutex<NodeStatus>,
    error_count: AtomicU64,
    shutdown: AtomicBool,
    start_time: Mutex<Option<Instant>>,
}

pub struct NodeRuntime {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
}

impl NodeRuntime {
    /// Wire `node` against `descriptor`: allocate bounded queues for every
    /// declared subscription and verify each callback name is one the node
    /// actually implements.
    pub fn new(
        node: Arc<dyn Node>,
        descriptor: &NodeDescriptor,
        bus: Arc<MessageBus>,
    ) -> Result<Self, RuntimeError> {
        let name = node.name().to_string();
        let known = node.known_callbacks();

        let mut subscriptions = Vec::with_capacity(descriptor.subscribes.len());
        for sub in &descriptor.subscribes {
            if !known.contains(&sub.callback.as_str()) {
                return Err(RuntimeError::UnknownCallback {
                    node: name.clone(),
                    topic: sub.topic.clone(),
                    callback: sub.callback.clone(),
                });
            }
            let queue = bus.subscribe(&name, &sub.topic);
            subscriptions.push(Subscription {
                topic: sub.topic.clone(),
                callback: sub.callback.clone(),
                queue,
            });
        }

        let published_topics = descriptor
            .publishes
            .iter()
            .map(|p| p.topic.clone())
            .collect();

        Ok(Self {
            shared: Arc::new(Shared {
                node,
                bus,
                published_topics,
                subscriptions: Mutex::new(subscriptions),
                status: Mutex::new(NodeStatus::Initializing),
                error_count: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                start_time: Mutex::new(None),
            }),
            workers: Mutex::new(Workers {
                main: None,
                message: None,
                heartbeat: None,
            }),
        })
    }

    pub fn status(&self) -> NodeStatus {
        *self.shared.status.lock()
    }

    pub fn error_count(&self) -> u64 {
        self.shared.error_count.load(Ordering::Relaxed)
    }

    /// Publish on `topic`, failing with a logged `NotDeclared`-style false if
    /// the node never declared it in its `publishes` set.
    pub fn publish(&self, topic: &str, data: serde_json::Value, priority: Priority) -> bool {
        if !self.shared.published_topics.contains(topic) {
            warn!(
                node = self.shared.node.name(),
                topic, "publish to undeclared topic"
            );
            return false;
        }
        let message = Message::new(topic, data, self.shared.node.name(), priority);
        self.shared.bus.publish(message)
    }

    pub fn start(&self) -> Result<(), RuntimeError> {
        {
            let mut status = self.shared.status.lock();
            if *status == NodeStatus::Running {
                return Err(RuntimeError::AlreadyRunning(
                    self.shared.node.name().to_string(),
                ));
            }
            *status = NodeStatus::Running;
        }
        *self.shared.start_time.lock() = Some(Instant::now());

        self.shared
            .node
            .initialize()
            .map_err(|e| RuntimeError::InitFailed(self.shared.node.name().to_string(), e))?;

        let heartbeat_enabled = self.shared.published_topics.contains("system_heartbeat");

        let main_handle = {
            let shared = Arc::clone(&self.shared);
            let name = shared.node.name().to_string();
            std::thread::Builder::new()
                .name(format!("{name}-main"))
                .spawn(move || main_worker(shared))
                .expect("failed to spawn main worker")
        };

        let message_handle = {
            let shared = Arc::clone(&self.shared);
            let name = shared.node.name().to_string();
            std::thread::Builder::new()
                .name(format!("{name}-messages"))
                .spawn(move || message_worker(shared))
                .expect("failed to spawn message worker")
        };

        let heartbeat_handle = if heartbeat_enabled {
            let shared = Arc::clone(&self.shared);
            let name = shared.node.name().to_string();
            Some(
                std::thread::Builder::new()
                    .name(format!("{name}-heartbeat"))
                    .spawn(move || heartbeat_worker(shared))
                    .expect("failed to spawn heartbeat worker"),
            )
        } else {
            None
        };

        let mut workers = self.workers.lock();
        workers.main = Some(main_handle);
        workers.message = Some(message_handle);
        workers.heartbeat = heartbeat_handle;

        info!(node = self.shared.node.name(), "node started");
        Ok(())
    }

    pub fn stop(&self, timeout: Duration) {
        info!(node = self.shared.node.name(), "stopping node");
        *self.shared.status.lock() = NodeStatus::Stopping;
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.node.cleanup();

        let mut workers = self.workers.lock();
        let per_thread_timeout = timeout / 2;
        for handle in [workers.main.take(), workers.message.take()]
            .into_iter()
            .flatten()
        {
            let thread_name = handle.thread().name().unwrap_or("?").to_string();
            if !join_with_timeout(handle, per_thread_timeout) {
                warn!(thread = %thread_name, "worker did not stop within timeout");
            }
        }
        if let Some(handle) = workers.heartbeat.take() {
            let _ = join_with_timeout(handle, Duration::from_millis(100));
        }

        if *self.shared.status.lock() != NodeStatus::Error {
            *self.shared.status.lock() = NodeStatus::Stopped;
        }
        info!(node = self.shared.node.name(), "node stopped");
    }
}

fn main_worker(shared: Arc<Shared>) {
    let name = shared.node.name().to_string();
    while !shared.shutdown.load(Ordering::Relaxed) {
        if let Err(e) = shared.node.main_loop() {
            let count = shared.error_count.fetch_add(1, Ordering::Relaxed) + 1;
            error!(node = %name, error = %e, count, "error in main loop");
            if count >= MAIN_LOOP_ERROR_THRESHOLD {
                error!(node = %name, "error threshold exceeded, entering ERROR state");
                *shared.status.lock() = NodeStatus::Error;
                break;
            }
            std::thread::sleep(MAIN_LOOP_BACKOFF);
        }
    }
}

fn message_worker(shared: Arc<Shared>) {
    let name = shared.node.name().to_string();
    while !shared.shutdown.load(Ordering::Relaxed) {
        let subs = shared.subscriptions.lock();
        for sub in subs.iter() {
            while let Ok(message) = sub.queue.try_recv() {
                debug!(node = %name, topic = %sub.topic, callback = %sub.callback, "dispatching message");
                shared.node.dispatch(&sub.callback, &message);
            }
        }
        drop(subs);
        std::thread::sleep(MESSAGE_POLL_INTERVAL);
    }
}

fn heartbeat_worker(shared: Arc<Shared>) {
    let name = shared.node.name().to_string();
    while !shared.shutdown.load(Ordering::Relaxed) {
        let status = shared.status.lock().as_str();
        let uptime = shared
            .start_time
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let payload = json!({
            "node_name": name,
            "status": status,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "error_count": shared.error_count.load(Ordering::Relaxed),
            "uptime": uptime,
        });
        shared.bus.publish(Message::new(
            "system_heartbeat",
            payload,
            &name,
            Priority::Low,
        ));
        std::thread::sleep(HEARTBEAT_INTERVAL);
    }
}

/// `JoinHandle` has no built-in timed join; approximate it by polling
/// `is_finished` since the worker loops check `shutdown` every
/// [`MESSAGE_POLL_INTERVAL`] or less.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    handle.is_finished()
}
