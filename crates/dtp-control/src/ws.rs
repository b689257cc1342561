//! `WS /ws` — pushes `{"type":"metrics", data: ...}` roughly every 100 ms,
//! answers client `"ping"` with `"pong"`, and sends a keepalive after 30 s
//! of client silence.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{interval, Instant};

use crate::state::AppState;

const PUSH_INTERVAL: Duration = Duration::from_millis(100);
const KEEPALIVE_AFTER_SILENCE: Duration = Duration::from_secs(30);

pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut tick = interval(PUSH_INTERVAL);
    let mut last_client_activity = Instant::now();

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let payload = match state.status_snapshot() {
                    Some(snapshot) => json!({ "type": "metrics", "data": snapshot }),
                    None => json!({ "type": "metrics", "data": null }),
                };
                if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
                if last_client_activity.elapsed() >= KEEPALIVE_AFTER_SILENCE {
                    let keepalive = json!({ "type": "keepalive" }).to_string();
                    if sender.send(Message::Text(keepalive.into())).await.is_err() {
                        break;
                    }
                    last_client_activity = Instant::now();
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_client_activity = Instant::now();
                        if text == "ping" {
                            if sender.send(Message::Text("pong".into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        last_client_activity = Instant::now();
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
