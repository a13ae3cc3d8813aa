use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use estima_core::notifications::Notification;
use estima_core::validation::issue_token;
use estima_core::ParticipantId;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ConnectionContext, Outbound};

/// What the socket tasks hand to the dispatcher.
#[derive(Debug)]
pub enum ConnectionEvent {
    Frame { context: ConnectionContext, text: String },
    Closed { connection_id: ParticipantId },
}

/// A connected WebSocket client.
pub struct Client {
    pub context: ConnectionContext,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(context: ConnectionContext, tx: mpsc::Sender<String>) -> Self {
        Self {
            context,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ParticipantId, Arc<Client>>,
    max_send_queue: usize,
    pong_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, pong_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            pong_timeout,
        }
    }

    /// Register a new connection with a fresh identity and token.
    pub fn register(&self) -> (ConnectionContext, mpsc::Receiver<String>) {
        let context = ConnectionContext {
            connection_id: ParticipantId::new(),
            token: issue_token(),
        };
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(
            context.connection_id.clone(),
            Arc::new(Client::new(context.clone(), tx)),
        );
        (context, rx)
    }

    pub fn unregister(&self, id: &ParticipantId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    /// Queue a message for one client. Dropped if the queue is full.
    pub fn send_to(&self, id: &ParticipantId, message: String) -> bool {
        let Some(client) = self.clients.get(id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        if !client.is_connected() {
            return false;
        }
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Serialize once and queue for every recipient. Returns how many
    /// recipients accepted it.
    pub fn deliver(&self, outbound: &Outbound) -> usize {
        if outbound.recipients.is_empty() {
            return 0;
        }
        let json = match serde_json::to_string(&outbound.notification) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(kind = outbound.notification.kind(), error = %e, "failed to serialize notification");
                return 0;
            }
        };
        outbound
            .recipients
            .iter()
            .filter(|id| self.send_to(id, json.clone()))
            .count()
    }

    pub fn send_notification(&self, id: &ParticipantId, notification: Notification) -> bool {
        self.deliver(&Outbound::to(id.clone(), notification)) == 1
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn record_pong(&self, id: &ParticipantId) {
        if let Some(client) = self.clients.get(id) {
            client.record_pong();
        }
    }

    /// Remove clients that haven't answered a ping within the timeout.
    ///
    /// Dropping the registry's sender ends the client's writer, which in turn
    /// closes the socket and reports the connection as closed.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ParticipantId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(self.pong_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(connection_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage lifecycle with heartbeat.
///
/// Always finishes by unregistering the client and reporting
/// [`ConnectionEvent::Closed`], after any frames it already forwarded.
pub async fn handle_ws_connection(
    socket: WebSocket,
    context: ConnectionContext,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_event: mpsc::Sender<ConnectionEvent>,
    ping_interval: Duration,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let connection_id = context.connection_id.clone();

    // Writer task: forward messages from channel to WebSocket + periodic ping
    let writer_cid = connection_id.clone();
    let writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "sent ping");
                }
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // Reader task: forward text frames to the dispatcher, track pongs
    let reader_registry = Arc::clone(&registry);
    let reader_events = on_event.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let frame = ConnectionEvent::Frame {
                        context: context.clone(),
                        text: text.to_string(),
                    };
                    if reader_events.send(frame).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_registry.record_pong(&context.connection_id),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    let (writer_abort, reader_abort) = (writer.abort_handle(), reader.abort_handle());
    tokio::select! {
        _ = writer => reader_abort.abort(),
        _ = reader => writer_abort.abort(),
        () = cancel.cancelled() => {
            reader_abort.abort();
            writer_abort.abort();
        }
    }

    registry.unregister(&connection_id);
    tracing::info!(connection_id = %connection_id, "websocket client disconnected");
    let _ = on_event.send(ConnectionEvent::Closed { connection_id }).await;
}

/// Start a background task that periodically cleans up dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead_clients();
                    if removed > 0 {
                        tracing::info!(removed, "dead client cleanup");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}
