//! WebSocket channel for real-time job events.
//!
//! Each connection gets its own subscription to the event broadcaster, so a
//! client only sees events published after it connected. A client that falls
//! behind loses its oldest events without slowing anyone else down.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // Subscribe before the upgrade completes so no event slips through the gap
    let subscription = state.events().subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, subscription))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, mut subscription: streamgrab_core::Subscription) {
    let (mut sender, mut receiver) = socket.split();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!("WebSocket client connected");

    let send_task = tokio::spawn(async move {
        let mut reported_dropped = 0;

        while let Some(event) = subscription.recv().await {
            let dropped = subscription.dropped();
            if dropped > reported_dropped {
                warn!(
                    "WebSocket client lagged, skipped {} events",
                    dropped - reported_dropped
                );
                WS_LAG_EVENTS.inc_by(dropped - reported_dropped);
                reported_dropped = dropped;
            }

            WS_MESSAGES_SENT.with_label_values(&[event.kind()]).inc();

            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize job event: {}", e);
                }
            }
        }
        debug!("Event broadcaster closed");
    });

    // The channel is one-way; incoming frames only matter for close detection
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring client text message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
