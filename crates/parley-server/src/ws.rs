// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! WebSocket bridge — one socket per client, JSON text frames.
//!
//! Inbound frames are [`CommandFrame`]s; responses echo the frame's
//! correlation id.  Stream events and broadcasts arrive on the client's
//! outbound queue as `{topic, event}` frames, interleaved with RPC
//! responses.  On disconnect every watch and subscription of the client is
//! torn down.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::service::{error_code, handle_command, AppState, CommandFrame};

const OUTBOUND_BUFFER: usize = 1024;

pub fn router(state: AppState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4().to_string();
    info!(client = %client_id, "client connected");
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    state.watchers.register_client(&client_id, out_tx);

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = dispatch(&state, &client_id, &text).await;
                        if socket.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!(client = %client_id, "socket recv error: {e}");
                        break;
                    }
                }
            }
            event = out_rx.recv() => {
                match event {
                    Some(frame) => {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.watchers.unregister_client(&client_id);
    info!(client = %client_id, "client disconnected");
}

async fn dispatch(state: &AppState, client_id: &str, text: &str) -> String {
    let frame: CommandFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(client = %client_id, "invalid command frame: {e}");
            return json!({
                "error": { "code": "invalid", "message": format!("invalid command: {e}") }
            })
            .to_string();
        }
    };
    let id = frame.id;
    match handle_command(state, client_id, frame.command).await {
        Ok(result) => json!({ "id": id, "ok": result }).to_string(),
        Err(e) => json!({
            "id": id,
            "error": { "code": error_code(&e), "message": e.to_string() }
        })
        .to_string(),
    }
}
