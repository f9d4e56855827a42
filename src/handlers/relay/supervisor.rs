//! Session supervisor
//!
//! One relay session per accepted WebSocket. The supervisor allocates the
//! session id, wires the handler, the upstream bridge and the client writer
//! together with bounded queues, and tears all three down together.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handler::{ClientHandler, HandlerLimits};
use super::messages::RelayMessageRoute;
use crate::core::live::UpstreamBridge;
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// How long the writer may take to flush its queue after the session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay WebSocket handler
///
/// Upgrades the connection and runs one relay session on it.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ClientIp(ip))| ip);
    debug!(ip = ?client_ip, "Relay WebSocket upgrade requested");

    let max_message_size = state.config.max_turn_bytes.max(MAX_WS_FRAME_SIZE);
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| run_session(socket, state, client_ip))
}

/// Serve one relay session to completion.
pub async fn run_session(socket: WebSocket, state: Arc<AppState>, client_ip: Option<IpAddr>) {
    let session_id = Uuid::new_v4().to_string();
    let capacity = state.config.session_queue_capacity;
    info!(session_id = %session_id, ip = ?client_ip, "Relay session started");

    let (sender, receiver) = socket.split();
    let (client_tx, client_rx) = mpsc::channel::<RelayMessageRoute>(capacity);
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let cancel = CancellationToken::new();

    let writer_task = tokio::spawn(write_client(sender, client_rx, session_id.clone()));

    let bridge = UpstreamBridge::new(
        session_id.clone(),
        Arc::clone(&state.issuer),
        Arc::clone(&state.connector),
        command_rx,
        event_tx,
        cancel.clone(),
    );
    let bridge_task = tokio::spawn(bridge.run());

    let handler = ClientHandler::new(
        session_id.clone(),
        HandlerLimits {
            upstream_frame_bytes: state.config.upstream_frame_bytes,
            max_turn_bytes: state.config.max_turn_bytes,
            idle_timeout: state.config.idle_timeout(),
        },
        state.converter,
        cancel.clone(),
        client_tx,
        command_tx,
    );
    let end = handler.run(receiver, event_rx).await;

    // Teardown: the handler is gone, so its queues are closed. Cancelling stops
    // the bridge and any conversion still running on the blocking pool.
    cancel.cancel();

    match bridge_task.await {
        Ok(bridge_state) => {
            debug!(session_id = %session_id, state = %bridge_state, "Bridge stopped");
        }
        Err(e) => error!(session_id = %session_id, "Bridge task failed: {}", e),
    }

    let mut writer_task = writer_task;
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task)
        .await
        .is_err()
    {
        warn!(session_id = %session_id, "Client writer did not drain, aborting");
        writer_task.abort();
    }

    if let Some(ip) = client_ip {
        state.release_connection(ip);
    }

    info!(
        session_id = %session_id,
        reason = ?end,
        active = state.ws_connection_count(),
        "Relay session terminated"
    );
}

/// Drain the session's outgoing queue into the client socket, then close it.
async fn write_client(
    mut sender: SplitSink<WebSocket, Message>,
    mut client_rx: mpsc::Receiver<RelayMessageRoute>,
    session_id: String,
) {
    while let Some(route) = client_rx.recv().await {
        if let Err(e) = sender.send(route.into_message()).await {
            debug!(session_id = %session_id, "Client socket write failed: {}", e);
            return;
        }
    }

    // Only reached once every producer is gone, so this is the single close.
    if let Err(e) = sender.send(Message::Close(None)).await {
        debug!(session_id = %session_id, "Client close frame not sent: {}", e);
    }
}
