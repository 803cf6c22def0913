//! WebSocket handler for real-time updates.

use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::state::AppState;

/// Keepalive cadence; lets both ends notice a dead peer.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket upgrade handler.
///
/// Once upgraded, streams ChangeEvents from the notifier to the client.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an active WebSocket connection.
///
/// Each socket is one notifier subscription. Client text frames are
/// ignored; close or error ends the subscription.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.notifier().subscribe();
    info!(
        "WebSocket client connected ({} subscribers)",
        state.notifier().subscriber_count()
    );

    let mut ping = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Receive messages from client
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Ignoring client frame: {}", text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            // Send updates to client
            update = rx.recv() => {
                let event = match update {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket subscriber lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        error!("Failed to serialize change event: {}", e);
                        continue;
                    }
                };

                if let Err(e) = socket.send(Message::Text(json.into())).await {
                    error!("Failed to send change event: {}", e);
                    break;
                }
            }

            _ = ping.tick() => {
                if let Err(e) = socket.send(Message::Ping(Vec::new().into())).await {
                    debug!("Ping failed, dropping client: {}", e);
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
