// =============================================================================
// Push Socket — named dashboard events over WebSocket
// =============================================================================
//
// Clients connect to `/ws` and receive:
//   1. `bot_status` and a replay of the console ring on connect.
//   2. The current `account_update` snapshot.
//   3. Every subsequent push event (account/trades/screener/position/console/
//      success/error) forwarded from the broadcast channel.
//
// Incoming text frames are treated as heartbeats; Ping frames are answered
// with Pong. Slow clients that fall behind the broadcast buffer are
// disconnected and can simply reconnect for a fresh snapshot.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::app_state::{AppState, PushMessage};

/// Axum handler for the push-socket upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    info!("dashboard client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.emitter.subscribe();

    // Initial state: status, console replay, account snapshot.
    let hello = [
        PushMessage {
            event: "bot_status".to_string(),
            data: json!({ "running": state.current_status().is_trading() }),
        },
        PushMessage {
            event: "account_update".to_string(),
            data: serde_json::to_value(&*state.account.read()).unwrap_or_default(),
        },
    ];
    for msg in hello {
        if send(&mut sender, &msg).await.is_err() {
            return;
        }
    }
    let console: Vec<_> = state.console.read().iter().cloned().collect();
    for line in console {
        let msg = PushMessage {
            event: "console_log".to_string(),
            data: serde_json::to_value(&line).unwrap_or_default(),
        };
        if send(&mut sender, &msg).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(msg) => {
                        if send(&mut sender, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dashboard client lagged — disconnecting");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "dashboard heartbeat");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "dashboard receive error");
                        break;
                    }
                }
            }
        }
    }

    info!("dashboard client disconnected");
}

async fn send<S>(sender: &mut S, msg: &PushMessage) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let payload = serde_json::to_string(msg).unwrap_or_default();
    sender.send(Message::Text(payload)).await
}
