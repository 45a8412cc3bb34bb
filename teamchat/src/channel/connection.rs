//! The long-lived realtime connection.
//!
//! A single background task owns the websocket. It reconnects on its own
//! after any drop and only stops when [`RealtimeChannel::disconnect`] is
//! called or the channel is dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use super::events::{ChannelError, InboundMessage};
use super::frame::Packet;
use super::handlers::{HandlerRegistry, Subscription};
use crate::config::ClientConfig;
use crate::storage::{BackupEntry, BackupLog, PersistentStore, SOCKET_BACKUP_KEY};

/// Event carrying agent replies.
pub const AGENT_RESPONSE_EVENT: &str = "agent_response";
/// Event announcing the client is ready to receive.
pub const CLIENT_READY_EVENT: &str = "client_ready";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Full websocket URL including the socket.io path and query.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub backup_limit: usize,
}

impl ChannelConfig {
    pub fn from_client(config: &ClientConfig) -> Self {
        Self {
            url: config.socket_url(),
            reconnect: config.reconnect,
            connect_timeout: config.connect_timeout,
            backup_limit: config.socket_backup_limit,
        }
    }
}

struct Shared {
    config: ChannelConfig,
    messages: HandlerRegistry<InboundMessage>,
    errors: HandlerRegistry<ChannelError>,
    connected: HandlerRegistry<()>,
    disconnected: HandlerRegistry<()>,
    backup: BackupLog<InboundMessage>,
    state: watch::Sender<ConnectionState>,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Reconnecting socket.io client for agent events.
pub struct RealtimeChannel {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

enum SessionEnd {
    Shutdown,
    Dropped { was_connected: bool },
}

enum Step {
    Continue,
    Reply(String),
    Close,
}

impl RealtimeChannel {
    /// `store` receives the log of recently received messages.
    pub fn new(config: ChannelConfig, store: PersistentStore) -> Self {
        let backup = BackupLog::new(store, SOCKET_BACKUP_KEY, config.backup_limit);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                messages: HandlerRegistry::new(),
                errors: HandlerRegistry::new(),
                connected: HandlerRegistry::new(),
                disconnected: HandlerRegistry::new(),
                backup,
                state,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the connection task. Idempotent while a task is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("connect ignored, already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::clone(&self.shared), shutdown_rx));
        *worker = Some(Worker { shutdown, handle });
    }

    /// Stop the connection task and wait for it to close the socket.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Worker { shutdown, mut handle }) = worker else {
            return;
        };

        let _ = shutdown.send(true);
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
            warn!("connection task did not stop in time, aborting");
            handle.abort();
        }
        self.shared.state.send_replace(ConnectionState::Disconnected);
    }

    /// Tear down and start over immediately.
    pub async fn reconnect(&self) {
        self.disconnect().await;
        self.connect();
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn on_message(
        &self,
        handler: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.messages.register(handler)
    }

    pub fn on_error(&self, handler: impl Fn(&ChannelError) + Send + Sync + 'static) -> Subscription {
        self.shared.errors.register(handler)
    }

    pub fn on_connected(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.shared.connected.register(move |()| handler())
    }

    pub fn on_disconnected(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.shared.disconnected.register(move |()| handler())
    }

    /// Messages received recently, oldest first.
    pub fn recent_messages(&self) -> Vec<BackupEntry<InboundMessage>> {
        self.shared.backup.entries()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.handle.abort();
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn report(&self, err: ChannelError) {
        warn!(error = %err, "channel error");
        self.errors.dispatch(&err);
    }

    fn deliver(&self, data: Option<&Value>) {
        let message = InboundMessage::parse(data.unwrap_or(&Value::Null));
        debug!(agent = %message.agent_name, "agent response received");
        self.backup.append(&message);

        let panicked = self.messages.dispatch(&message);
        if panicked > 0 {
            self.report(ChannelError::Handler(format!(
                "{panicked} message handler(s) panicked"
            )));
        }
    }

    fn on_packet(&self, packet: Packet, connected: &mut bool, attempt: u32) -> Step {
        match packet {
            Packet::Open(info) => {
                debug!(sid = %info.sid, "transport open");
                Step::Reply(Packet::Connect(None).encode())
            }
            Packet::Ping => Step::Reply(Packet::Pong.encode()),
            Packet::Connect(_) => {
                *connected = true;
                self.set_state(ConnectionState::Connected);
                if attempt > 0 {
                    info!(attempts = attempt, "reconnected");
                } else {
                    info!(url = %self.config.url, "connected");
                }
                self.connected.dispatch(&());
                Step::Reply(Packet::event(CLIENT_READY_EVENT, None).encode())
            }
            Packet::Event { name, data } => {
                match name.as_str() {
                    AGENT_RESPONSE_EVENT => self.deliver(data.as_ref()),
                    "error" | "connect_error" => {
                        self.report(ChannelError::from_payload(data.as_ref()));
                    }
                    other => debug!(event = other, "ignoring event"),
                }
                Step::Continue
            }
            Packet::ConnectError(data) => {
                self.report(ChannelError::from_payload(Some(&data)));
                Step::Close
            }
            Packet::Close | Packet::Disconnect => Step::Close,
            Packet::Pong | Packet::Noop => Step::Continue,
        }
    }
}

async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);
        if attempt > 0 {
            info!(attempt, "reconnect attempt");
        }

        match run_session(&shared, &mut shutdown, attempt).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Dropped { was_connected } => {
                if was_connected {
                    attempt = 0;
                }
                attempt = attempt.saturating_add(1);
                shared.set_state(ConnectionState::Disconnected);

                let delay = shared.config.reconnect.next_delay(attempt);
                debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "waiting to reconnect"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    shared.set_state(ConnectionState::Disconnected);
}

async fn run_session(
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
    attempt: u32,
) -> SessionEnd {
    let connecting = tokio::time::timeout(
        shared.config.connect_timeout,
        tokio_tungstenite::connect_async(shared.config.url.as_str()),
    );

    let ws = tokio::select! {
        _ = shutdown.changed() => return SessionEnd::Shutdown,
        result = connecting => match result {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                shared.report(ChannelError::Connect(e.to_string()));
                return SessionEnd::Dropped { was_connected: false };
            }
            Err(_) => {
                shared.report(ChannelError::Connect("connection timed out".to_string()));
                return SessionEnd::Dropped { was_connected: false };
            }
        },
    };

    let (mut sink, mut stream) = ws.split();
    let mut connected = false;
    let mut liveness: Option<Duration> = None;
    let mut last_frame = Instant::now();

    let end = loop {
        let deadline = liveness.map(|window| last_frame + window);
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(WsMessage::text(Packet::Disconnect.encode())).await;
                let _ = sink.close().await;
                break SessionEnd::Shutdown;
            }
            () = expire(deadline) => {
                warn!("no frames from server within the ping window");
                shared.report(ChannelError::Connect("ping timeout".to_string()));
                break SessionEnd::Dropped { was_connected: connected };
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    last_frame = Instant::now();
                    let step = match Packet::decode(text.as_str()) {
                        Ok(packet) => {
                            if let Packet::Open(info) = &packet {
                                liveness = info.liveness_window();
                            }
                            shared.on_packet(packet, &mut connected, attempt)
                        }
                        Err(e) => {
                            shared.report(ChannelError::Protocol(e.to_string()));
                            Step::Continue
                        }
                    };
                    match step {
                        Step::Continue => {}
                        Step::Reply(reply) => {
                            if let Err(e) = sink.send(WsMessage::text(reply)).await {
                                debug!(error = %e, "send failed");
                                break SessionEnd::Dropped { was_connected: connected };
                            }
                        }
                        Step::Close => break SessionEnd::Dropped { was_connected: connected },
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    break SessionEnd::Dropped { was_connected: connected };
                }
                Some(Ok(_)) => last_frame = Instant::now(),
                Some(Err(e)) => {
                    shared.report(ChannelError::Connect(e.to_string()));
                    break SessionEnd::Dropped { was_connected: connected };
                }
            },
        }
    };

    if connected {
        info!("disconnected");
        shared.set_state(ConnectionState::Disconnected);
        shared.disconnected.dispatch(&());
    }

    end
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
