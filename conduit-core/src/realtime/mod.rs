//! Persistent bidirectional session to the external streaming LLM endpoint.
//!
//! A single background task owns the socket and a strict outbound queue;
//! every other component talks to it only through [`RealtimeConnection::send_sync`]
//! and [`RealtimeConnection::on`] — never by sharing mutable state directly,
//! which is how the cyclic-reference and coroutine-tangle failure modes this
//! core replaces were avoided.

pub mod backoff;
pub mod events;

pub use events::{
    ClientEvent, ConversationItem, ContentPart, InputAudioTranscription, ResponseCreateParams,
    ServerError, ServerEvent, SessionConfig, TurnDetection,
};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use backoff::Backoff;

const OUTBOUND_QUEUE_CAP: usize = 256;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("no authentication credential configured")]
    AuthMissing,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone)]
pub enum Auth {
    ApiKey(String),
    EphemeralToken(String),
}

impl Auth {
    fn bearer(&self) -> &str {
        match self {
            Auth::ApiKey(key) => key,
            Auth::EphemeralToken(token) => token,
        }
    }
}

type Handler = Box<dyn Fn(&ServerEvent) + Send + Sync>;

struct Inner {
    url: String,
    auth: Auth,
    session_config: SessionConfig,
    state: Mutex<ConnectionState>,
    outbound: Mutex<VecDeque<ClientEvent>>,
    notify: Notify,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
    response_in_progress: AtomicBool,
    response_started_at: Mutex<Option<Instant>>,
    reconnect_attempts: AtomicU32,
    max_reconnect_attempts: u32,
    connect_timeout: Duration,
    shutdown: AtomicBool,
    messages_sent: AtomicU32,
    messages_received: AtomicU32,
}

/// Persistent bidirectional session handle. Cheap to clone (an `Arc` wrapper);
/// every clone shares the same underlying connection.
#[derive(Clone)]
pub struct RealtimeConnection {
    inner: Arc<Inner>,
}

impl RealtimeConnection {
    pub fn new(url: impl Into<String>, auth: Auth, session_config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                auth,
                session_config,
                state: Mutex::new(ConnectionState::Disconnected),
                outbound: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                handlers: Mutex::new(HashMap::new()),
                response_in_progress: AtomicBool::new(false),
                response_started_at: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                shutdown: AtomicBool::new(false),
                messages_sent: AtomicU32::new(0),
                messages_received: AtomicU32::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn response_in_progress(&self) -> bool {
        self.inner.response_in_progress.load(Ordering::Relaxed)
    }

    /// How long the current response has been in progress, if any.
    pub fn response_age(&self) -> Option<Duration> {
        self.inner
            .response_started_at
            .lock()
            .map(|t| t.elapsed())
    }

    /// Manually clear a stuck response. The AI core calls this after
    /// confirming the age exceeds its own self-heal threshold.
    pub fn clear_stuck_response(&self) {
        self.inner.response_in_progress.store(false, Ordering::Relaxed);
        *self.inner.response_started_at.lock() = None;
    }

    /// Register a callback for one server event kind (see [`ServerEvent::kind`]).
    pub fn on(&self, event_type: &str, handler: Handler) {
        self.inner
            .handlers
            .lock()
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Enqueue `event` for delivery. Always accepted: while disconnected (or
    /// while the socket is momentarily busy) the event joins a bounded FIFO
    /// that is flushed in order once (re)connected; on overflow the oldest
    /// queued event is dropped, never the newest.
    pub fn send_sync(&self, event: ClientEvent) -> bool {
        let mut outbound = self.inner.outbound.lock();
        if outbound.len() >= OUTBOUND_QUEUE_CAP {
            outbound.pop_front();
            warn!("outbound queue full, dropped oldest buffered event");
        }
        outbound.push_back(event);
        drop(outbound);
        self.inner.notify.notify_one();
        true
    }

    /// Spawn the connection's background task. Safe to call once; subsequent
    /// calls are no-ops (guarded by the Disconnected→Connecting transition
    /// inside the task loop itself).
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run(inner).await;
        });
    }

    pub fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::Relaxed);
        self.inner.notify.notify_one();
    }

    pub fn stats(&self) -> RealtimeStats {
        RealtimeStats {
            state: self.state(),
            messages_sent: self.inner.messages_sent.load(Ordering::Relaxed),
            messages_received: self.inner.messages_received.load(Ordering::Relaxed),
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeStats {
    pub state: ConnectionState,
    pub messages_sent: u32,
    pub messages_received: u32,
    pub reconnect_attempts: u32,
}

enum PumpOutcome {
    Disconnected,
    ShuttingDown,
}

async fn run(inner: Arc<Inner>) {
    let mut backoff = Backoff::new(Duration::from_millis(500));

    loop {
        if inner.shutdown.load(Ordering::Relaxed) {
            *inner.state.lock() = ConnectionState::Disconnected;
            return;
        }

        *inner.state.lock() = ConnectionState::Connecting;
        match connect_once(&inner).await {
            Ok((write, read)) => {
                *inner.state.lock() = ConnectionState::Connected;
                backoff.reset();
                inner.reconnect_attempts.store(0, Ordering::Relaxed);
                info!("realtime connection established");

                match pump(&inner, write, read).await {
                    PumpOutcome::ShuttingDown => {
                        *inner.state.lock() = ConnectionState::Disconnected;
                        return;
                    }
                    PumpOutcome::Disconnected => {
                        *inner.state.lock() = ConnectionState::Reconnecting;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "realtime connect failed");
                *inner.state.lock() = ConnectionState::Reconnecting;
            }
        }

        if inner.shutdown.load(Ordering::Relaxed) {
            *inner.state.lock() = ConnectionState::Disconnected;
            return;
        }

        let attempts = inner.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if attempts > inner.max_reconnect_attempts {
            error!("max reconnect attempts exceeded, giving up");
            *inner.state.lock() = ConnectionState::Failed;
            emit(
                &inner,
                &ServerEvent::Error {
                    error: ServerError {
                        code: Some("max_reconnect_attempts_exceeded".to_string()),
                        message: "giving up after repeated reconnect failures".to_string(),
                    },
                },
            );
            return;
        }

        let delay = backoff.next_delay();
        tokio::time::sleep(delay).await;
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsWrite = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

async fn connect_once(inner: &Arc<Inner>) -> Result<(WsWrite, WsRead), RealtimeError> {
    let request = tokio_tungstenite::tungstenite::http::Request::builder()
        .uri(&inner.url)
        .header("Authorization", format!("Bearer {}", inner.auth.bearer()))
        .body(())
        .map_err(|e| RealtimeError::Transport(e.to_string()))?;

    let connect = tokio_tungstenite::connect_async(request);
    let (stream, _response) = tokio::time::timeout(inner.connect_timeout, connect)
        .await
        .map_err(|_| RealtimeError::Transport("connect timed out".to_string()))?
        .map_err(|e| RealtimeError::Transport(e.to_string()))?;

    let (mut write, read) = stream.split();

    let update = ClientEvent::SessionUpdate {
        session: inner.session_config.clone(),
    };
    send_frame(&mut write, &update)
        .await
        .map_err(RealtimeError::Transport)?;

    Ok((write, read))
}

async fn pump(inner: &Arc<Inner>, mut write: WsWrite, mut read: WsRead) -> PumpOutcome {
    if let Err(e) = flush_outbound(inner, &mut write).await {
        warn!(error = %e, "flush failed immediately after connect");
        return PumpOutcome::Disconnected;
    }

    loop {
        if inner.shutdown.load(Ordering::Relaxed) {
            let _ = write.close().await;
            return PumpOutcome::ShuttingDown;
        }

        tokio::select! {
            _ = inner.notify.notified() => {
                if inner.shutdown.load(Ordering::Relaxed) {
                    let _ = write.close().await;
                    return PumpOutcome::ShuttingDown;
                }
                if let Err(e) = flush_outbound(inner, &mut write).await {
                    warn!(error = %e, "send failed, reconnecting");
                    return PumpOutcome::Disconnected;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        inner.messages_received.fetch_add(1, Ordering::Relaxed);
                        handle_incoming(inner, &text);
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("realtime connection closed by server");
                        return PumpOutcome::Disconnected;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "realtime read error");
                        return PumpOutcome::Disconnected;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn flush_outbound(inner: &Arc<Inner>, write: &mut WsWrite) -> Result<(), String> {
    loop {
        let next = inner.outbound.lock().pop_front();
        let Some(event) = next else { break };
        send_frame(write, &event).await?;
        inner.messages_sent.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

async fn send_frame(write: &mut WsWrite, event: &ClientEvent) -> Result<(), String> {
    let json = serde_json::to_string(event).map_err(|e| e.to_string())?;
    write
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| e.to_string())
}

fn handle_incoming(inner: &Arc<Inner>, text: &str) {
    let event: ServerEvent = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "could not parse server event, discarding");
            return;
        }
    };

    match &event {
        ServerEvent::ResponseCreated { .. } => {
            inner.response_in_progress.store(true, Ordering::Relaxed);
            *inner.response_started_at.lock() = Some(Instant::now());
        }
        ServerEvent::ResponseDone { .. } => {
            inner.response_in_progress.store(false, Ordering::Relaxed);
            *inner.response_started_at.lock() = None;
        }
        ServerEvent::Error { error } => {
            if !error.is_active_response_conflict() {
                inner.response_in_progress.store(false, Ordering::Relaxed);
                *inner.response_started_at.lock() = None;
            }
        }
        _ => {}
    }

    emit(inner, &event);
}

fn emit(inner: &Arc<Inner>, event: &ServerEvent) {
    let handlers = inner.handlers.lock();
    if let Some(callbacks) = handlers.get(event.kind()) {
        for callback in callbacks {
            callback(event);
        }
    }
}
