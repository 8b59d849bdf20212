//! WebSocket connection loop.
//!
//! Handles the read/write loop for a single browser WebSocket, applying
//! subscribe/unsubscribe frames to its [`DownstreamSession`] and writing
//! queued ticks out as JSON.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;

use super::messages::{ClientFrame, error_frame};
use super::session::DownstreamSession;
use crate::domain::{SessionId, SubscriptionKey, SubscriptionRegistry};

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads `subscribe`/`unsubscribe` frames from the client.
/// - Forwards ticks for subscribed keys, in feed order.
/// - Drops the session from the registry as soon as the transport closes.
pub async fn run_connection(
    socket: WebSocket,
    registry: Arc<SubscriptionRegistry>,
    queue_capacity: usize,
    initial: Option<SubscriptionKey>,
) {
    let (mut session, mut tick_rx) = DownstreamSession::open(registry, queue_capacity);
    let session_id = session.id();
    let (mut ws_tx, mut ws_rx) = socket.split();

    if let Some(key) = initial {
        session.subscribe(key).await;
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text_message(text.as_str(), &mut session).await
                            && ws_tx.send(Message::text(reply)).await.is_err() {
                                break;
                            }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "ws transport error");
                        break;
                    }
                    _ => {}
                }
            }
            tick = tick_rx.recv() => {
                match tick {
                    Ok(tick) => {
                        let Some(json) = outbound_json(session_id, &*tick) else {
                            continue;
                        };
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(session_id = %session_id, dropped = n, "ws client lagged; oldest ticks dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    session.close().await;
    tracing::debug!(session_id = %session_id, "ws connection closed");
}

/// Applies a client frame, returning an error frame to send back if it
/// was rejected.
async fn handle_text_message(text: &str, session: &mut DownstreamSession) -> Option<String> {
    match ClientFrame::parse(text) {
        Ok(ClientFrame::Subscribe { key }) => {
            session.subscribe(key).await;
            None
        }
        Ok(ClientFrame::Unsubscribe { key }) => {
            session.unsubscribe(&key).await;
            None
        }
        Err(error) => {
            tracing::debug!(session_id = %session.id(), message = %error.error.message, "rejected client frame");
            Some(error_frame(&error))
        }
    }
}

/// Serializes an outbound frame. A value that fails to serialize is
/// logged and skipped rather than sent as an empty text frame.
fn outbound_json<T: Serialize + ?Sized>(session_id: SessionId, value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "outbound frame not serializable; skipped");
            None
        }
    }
}
