//! Websocket fan-out endpoint.
//!
//! Each connection task owns its subscription set and its own receiver on
//! the event bus, so a slow or dead client lags only itself. The set dies
//! with the task; there is no central client registry to clean up.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::MonitoringEngine;
use crate::events::Channel;

pub fn router(engine: Arc<MonitoringEngine>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<MonitoringEngine>>,
) -> Response {
    let client_id = Uuid::new_v4();
    info!(client_id = %client_id, "New websocket client connecting.");
    ws.on_upgrade(move |socket| handle_socket(socket, engine, client_id))
}

async fn handle_socket(socket: WebSocket, engine: Arc<MonitoringEngine>, client_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = engine.bus().subscribe();
    let mut subscriptions: HashSet<Channel> = HashSet::new();

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let ack = handle_client_message(text.as_str(), &mut subscriptions);
                        if sender.send(Message::Text(ack.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by axum; binary frames are not part
                    // of the protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, error = %e, "Websocket receive error.");
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !subscriptions.contains(&event.channel()) {
                            continue;
                        }
                        let message = event.to_message().to_string();
                        if sender.send(Message::Text(message.into())).await.is_err() {
                            debug!(client_id = %client_id, "Client gone mid-send.");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client_id = %client_id, skipped, "Client fell behind the event stream.");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!(client_id = %client_id, "Websocket client disconnected.");
}

/// Applies one inbound control message to the connection's subscription
/// set and returns the acknowledgement to send back. Malformed input gets
/// an error ack on this connection only.
fn handle_client_message(text: &str, subscriptions: &mut HashSet<Channel>) -> serde_json::Value {
    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return error_ack("invalid message: expected a JSON object with a type field"),
    };
    let Some(message_type) = parsed.get("type").and_then(|t| t.as_str()) else {
        return error_ack("invalid message: expected a JSON object with a type field");
    };

    if let Some(channel_name) = message_type.strip_prefix("subscribe:") {
        return match Channel::parse(channel_name) {
            Some(channel) => {
                subscriptions.insert(channel);
                json!({
                    "type": "subscribed",
                    "channel": channel.as_str(),
                    "timestamp": Utc::now(),
                })
            }
            None => error_ack(&format!("unknown channel: {channel_name}")),
        };
    }
    if let Some(channel_name) = message_type.strip_prefix("unsubscribe:") {
        return match Channel::parse(channel_name) {
            Some(channel) => {
                subscriptions.remove(&channel);
                json!({
                    "type": "unsubscribed",
                    "channel": channel.as_str(),
                    "timestamp": Utc::now(),
                })
            }
            None => error_ack(&format!("unknown channel: {channel_name}")),
        };
    }

    error_ack(&format!("unsupported message type: {message_type}"))
}

fn error_ack(message: &str) -> serde_json::Value {
    json!({
        "type": "error",
        "message": message,
        "timestamp": Utc::now(),
    })
}
