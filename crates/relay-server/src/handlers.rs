//! Connection handlers for the relay server.
//!
//! This module handles the connection lifecycle and message processing.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use relay_core::{Dispatch, Dispatcher};
use relay_transport::{Connection, ConnectionId, OutboundQueue, QueuedConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Frame dispatcher owning the registry and presence tracker.
    pub dispatcher: Arc<Dispatcher>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(config.dispatcher_config())),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let sweep_interval = config.presence.sweep_interval();
    state
        .dispatcher
        .spawn_sweeper_with(sweep_interval, |evicted, tracked| {
            metrics::record_sweep(evicted.len(), tracked);
        });

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );
    info!(
        timeout_ms = config.presence.timeout_ms,
        sweep_ms = sweep_interval.as_millis() as u64,
        "Presence sweeper started"
    );

    serve(listener, state).await
}

/// Serve the application on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.dispatcher.registry().stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "channels": stats.channel_count,
        "subscriptions": stats.total_subscriptions,
        "tracked_identities": state.dispatcher.presence().len(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, remote, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, remote: SocketAddr, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (conn, queue) = QueuedConnection::new(ConnectionId::generate());
    let conn = Arc::new(conn.with_remote_addr(remote));
    let connection_id = conn.id().clone();

    state.dispatcher.connect(conn.clone());
    debug!(connection = %connection_id, remote = %remote, "WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let mut writer = tokio::spawn(write_outbound(sender, queue, connection_id.clone()));

    loop {
        tokio::select! {
            // Writer exits once the socket rejects a send.
            _ = &mut writer => {
                debug!(connection = %connection_id, "Writer stopped");
                break;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state, &conn, text.as_bytes());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_inbound(&state, &conn, &data);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Control frames are answered by the socket.
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: stop delivery, then drop every subscription
    conn.close();
    writer.abort();

    let channels = state.dispatcher.disconnect(&connection_id);
    metrics::set_active_channels(state.dispatcher.registry().stats().channel_count);

    debug!(
        connection = %connection_id,
        channels = channels.len(),
        "WebSocket disconnected"
    );
}

/// Dispatch one inbound message and record its outcome.
fn handle_inbound(state: &AppState, conn: &QueuedConnection, data: &[u8]) {
    let start = Instant::now();
    metrics::record_message(data.len(), "inbound");

    let outcome = state.dispatcher.handle(conn, data);
    metrics::record_dispatch(&outcome);

    if matches!(
        outcome,
        Dispatch::Subscribed { added: true } | Dispatch::Unsubscribed { removed: true }
    ) {
        metrics::set_active_channels(state.dispatcher.registry().stats().channel_count);
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Drain a connection's outbound queue into its socket.
async fn write_outbound(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut queue: OutboundQueue,
    connection_id: ConnectionId,
) {
    while let Some(text) = queue.recv().await {
        metrics::record_message(text.len(), "outbound");
        if let Err(e) = sender.send(Message::Text(text.to_string())).await {
            debug!(connection = %connection_id, error = %e, "Failed to write frame");
            break;
        }
    }

    let _ = sender.close().await;
}
