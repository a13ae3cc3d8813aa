use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use estima_core::notifications::Notification;
use estima_core::SessionError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry, ConnectionEvent};
use crate::config::ServerConfig;
use crate::protocol::{InboundEnvelope, Outbound};
use crate::router::EventRouter;
use crate::storage::{FileStore, StoreError};
use crate::sweeper;

const EVENT_QUEUE_CAPACITY: usize = 1024;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<EventRouter>,
    pub clients: Arc<ClientRegistry>,
    pub store: Arc<dyn FileStore>,
    pub events_tx: mpsc::Sender<ConnectionEvent>,
    pub ping_interval: Duration,
    pub max_message_size: usize,
    pub cancel: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route(
            "/upload-avatar",
            post(upload_avatar_handler).layer(DefaultBodyLimit::max(config.max_avatar_bytes)),
        )
        .nest_service("/uploads", ServeDir::new(&config.upload_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    router: Arc<EventRouter>,
    store: Arc<dyn FileStore>,
) -> Result<ServerHandle, std::io::Error> {
    let cancel = CancellationToken::new();
    let clients = Arc::new(ClientRegistry::new(config.max_send_queue, config.ping_timeout));

    let cleanup = client::start_cleanup_task(Arc::clone(&clients), config.ping_interval, cancel.clone());
    let sweeper = sweeper::start_sweeper(
        Arc::clone(&router),
        Arc::clone(&clients),
        config.sweep_interval,
        cancel.clone(),
    );

    let (events_tx, events_rx) = mpsc::channel::<ConnectionEvent>(EVENT_QUEUE_CAPACITY);
    let dispatcher = tokio::spawn(process_connection_events(
        events_rx,
        Arc::clone(&router),
        Arc::clone(&clients),
        cancel.clone(),
    ));

    let state = AppState {
        router: Arc::clone(&router),
        clients: Arc::clone(&clients),
        store,
        events_tx,
        ping_interval: config.ping_interval,
        max_message_size: config.max_message_size,
        cancel: cancel.clone(),
    };
    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "estima server started");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        let shutdown = async move { server_cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        cancel,
        tasks: vec![server, dispatcher, sweeper, cleanup],
    })
}

/// Handle returned by `start()`. Dropping it leaves the tasks running; call
/// [`ServerHandle::shutdown`] to stop them.
pub struct ServerHandle {
    pub port: u16,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every task and wait for them, up to a fixed timeout.
    pub async fn shutdown(self) {
        tracing::info!("shutting down server");
        self.cancel.cancel();
        let join_all = futures::future::join_all(self.tasks);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all).await.is_err() {
            tracing::warn!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "shutdown timed out, abandoning tasks");
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (context, rx) = state.clients.register();
    tracing::info!(connection_id = %context.connection_id, "websocket client connected");

    state.clients.send_notification(
        &context.connection_id,
        Notification::Connected {
            connection_id: context.connection_id.clone(),
            token: context.token.clone(),
        },
    );

    client::handle_ws_connection(
        socket,
        context,
        rx,
        state.clients,
        state.events_tx,
        state.ping_interval,
        state.cancel,
    )
    .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.router.sessions().len(),
        "connections": state.clients.count(),
    }))
}

/// Store a raw avatar body and return its public path.
async fn upload_avatar_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "No file uploaded" })));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let store = Arc::clone(&state.store);
    let stored = tokio::task::spawn_blocking(move || store.store(&body, &content_type)).await;
    match stored {
        Ok(Ok(path)) => (StatusCode::OK, Json(serde_json::json!({ "path": path }))),
        Ok(Err(err)) => {
            let status = match err {
                StoreError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                StoreError::InvalidType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::warn!(error = %err, "avatar upload rejected");
            let err = SessionError::from(err);
            (status, Json(serde_json::json!({ "error": err.to_string(), "code": err.code() })))
        }
        Err(e) => {
            tracing::error!(error = %e, "avatar store task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "upload failed" })),
            )
        }
    }
}

/// Route connection events one at a time and deliver what they emit.
async fn process_connection_events(
    mut rx: mpsc::Receiver<ConnectionEvent>,
    router: Arc<EventRouter>,
    clients: Arc<ClientRegistry>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            () = cancel.cancelled() => break,
        };
        let mut deliver = |outbound: Outbound| {
            clients.deliver(&outbound);
        };
        match event {
            ConnectionEvent::Frame { context, text } => match serde_json::from_str::<InboundEnvelope>(&text) {
                Ok(envelope) => router.dispatch(&context, envelope, &mut deliver),
                Err(e) => {
                    tracing::warn!(connection_id = %context.connection_id, error = %e, "unparseable frame");
                    let err = SessionError::invalid_request(e.to_string());
                    deliver(Outbound::to(context.connection_id, Notification::error(&err)));
                }
            },
            ConnectionEvent::Closed { connection_id } => router.disconnect(&connection_id, &mut deliver),
        }
    }
    tracing::debug!("connection event processor stopped");
}
