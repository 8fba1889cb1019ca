//! Axum WebSocket handler
//!
//! Bridges one WebSocket connection to one [`SessionController`]: text frames are parsed
//! into session commands, binary frames are microphone audio, and everything the session
//! emits is written back by a dedicated sender task.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

use crate::core::session::protocol::MAX_TEXT_FRAME_SIZE;
use crate::core::session::{
    ClientCommand, IncomingMessage, MessageRoute, OutgoingMessage, SessionController,
    SessionHandle,
};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Channel buffer between the session and the socket writer
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How long teardown waits for the session task and the writer to drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// WebSocket voice session handler
///
/// Upgrades the HTTP connection and runs a coaching session over it. When the
/// connection-limit middleware admitted the request, its slot is released once the
/// socket closes.
pub async fn ws_session_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ip)| ip);
    info!(ip = ?client_ip, "WebSocket session upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_session_socket(socket, state, client_ip))
}

/// Handle one session connection from upgrade to close
async fn handle_session_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    client_ip: Option<ClientIp>,
) {
    info!("WebSocket session connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, MessageRoute::Close);

            let result = match route {
                MessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                MessageRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                MessageRoute::Close => sender.send(Message::Close(None)).await,
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    let (session, session_task) = SessionController::spawn(
        app_state.services.clone(),
        app_state.session_settings.clone(),
        app_state.sessions.clone(),
        message_tx.clone(),
    );

    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(msg) => {
                if !process_message(msg, &session, &message_tx).await {
                    break;
                }
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Tear the session down before the writer so its final messages are flushed
    session.disconnect().await;
    drop(session);
    if timeout(SHUTDOWN_GRACE, session_task).await.is_err() {
        warn!("Session task did not stop in time");
    }

    let _ = message_tx.send(MessageRoute::Close).await;
    drop(message_tx);
    if timeout(SHUTDOWN_GRACE, &mut sender_task).await.is_err() {
        sender_task.abort();
    }

    if let Some(ClientIp(ip)) = client_ip {
        app_state.release_connection(ip);
    }

    info!("WebSocket session connection terminated");
}

/// Route one WebSocket frame. Returns false when the connection should close.
async fn process_message(
    msg: Message,
    session: &SessionHandle,
    message_tx: &mpsc::Sender<MessageRoute>,
) -> bool {
    match msg {
        Message::Text(text) => {
            debug!("Received text message: {} bytes", text.len());

            if text.len() > MAX_TEXT_FRAME_SIZE {
                warn!(size = text.len(), "Rejecting oversized text frame");
                let _ = message_tx
                    .send(MessageRoute::Outgoing(OutgoingMessage::error(
                        "Message too large",
                        Some(format!("text frames are limited to {MAX_TEXT_FRAME_SIZE} bytes")),
                    )))
                    .await;
                return true;
            }

            let incoming: IncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse incoming message: {}", e);
                    let _ = message_tx
                        .send(MessageRoute::Outgoing(OutgoingMessage::error(
                            "Invalid message format",
                            Some(e.to_string()),
                        )))
                        .await;
                    return true;
                }
            };

            session.command(incoming.into()).await
        }
        Message::Binary(data) => {
            debug!("Received binary audio: {} bytes", data.len());
            session.command(ClientCommand::AudioChunk(data)).await
        }
        Message::Ping(_) => {
            // Answered automatically by axum
            true
        }
        Message::Pong(_) => session.command(ClientCommand::Pong).await,
        Message::Close(_) => {
            info!("WebSocket close received");
            false
        }
    }
}
