//! WebSocket transport.
//!
//! The gate runs on the upgrade request, so an unauthenticated client never
//! gets a socket. Once admitted, a connection is a read loop that handles
//! `message-in` frames one at a time plus a send task draining the session's
//! outbox.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::server::AppState;
use crate::session::{ClientEvent, ExchangeOrchestrator, ServerEvent, Session};
use crate::store::types::Identity;

/// `GET {socket_path}`: admit, then upgrade.
pub async fn socket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match state.gate.admit(&headers).await {
        Ok(identity) => ws
            .on_upgrade(move |socket| serve_connection(socket, state, identity))
            .into_response(),
        Err(reason) => {
            tracing::info!(%reason, "handshake rejected");
            reason.into_response()
        }
    }
}

async fn serve_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let session = state.registry.register(identity, tx);

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&state.exchange, &session, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            // Pings are answered by the protocol layer.
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection = %session.id, error = %e, "socket read failed");
                break;
            }
        }
    }

    state.registry.release(session.id);
    // Last sender gone: the send task drains what is queued and exits.
    drop(session);
    if let Err(e) = send_task.await {
        tracing::debug!(error = %e, "send task ended abnormally");
    }
}

/// Handle one inbound text frame. Frames that are not a known event are
/// dropped.
pub async fn dispatch(exchange: &ExchangeOrchestrator, session: &Session, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::MessageIn(message)) => exchange.handle(session, message).await,
        Err(e) => {
            tracing::debug!(connection = %session.id, error = %e, "dropping unrecognised frame");
        }
    }
}
