// crates/server/src/routes/progress.rs
//! `GET /ws/jobs/{id}` — progress stream for a generation job (spec.md 4.K).
//!
//! Grounded on the terminal WebSocket handler's multiplex-loop shape: one
//! `tokio::select!` over upstream frames, client messages, and a heartbeat
//! tick. Here "upstream" is the job's broadcast channel rather than a file
//! watcher, and the client-facing keepalive is a JSON frame rather than a
//! protocol Ping, since spec.md 4.K specifies a literal 30-second keepalive
//! frame a subscriber can see in application data, not a transport Pong.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::progress::{ClientMessage, ProgressFrame};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/{id}", get(ws_progress_handler))
}

async fn ws_progress_handler(State(state): State<Arc<AppState>>, Path(job_id): Path<String>, ws: WebSocketUpgrade) -> Response {
    if state.scheduler.get(&job_id).is_none() {
        return ws.on_upgrade(move |mut socket| async move {
            let err = serde_json::json!({ "type": "error", "message": format!("job '{job_id}' not found") });
            let _ = socket.send(Message::Text(err.to_string().into())).await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: 4004,
                    reason: "job not found".into(),
                })))
                .await;
        });
    }

    let rx = state.progress_hub.subscribe(&job_id);
    ws.on_upgrade(move |socket| async move {
        handle_progress_ws(socket, job_id, rx).await;
    })
}

async fn handle_progress_ws(mut socket: WebSocket, job_id: String, mut rx: tokio::sync::broadcast::Receiver<ProgressFrame>) {
    let mut keepalive = tokio::time::interval(Duration::from_secs(30));
    keepalive.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        let text = serde_json::to_string(&frame).unwrap_or_default();
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            tracing::debug!(job_id, "client disconnected during progress stream");
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(job_id, skipped, "progress subscriber lagged, resuming");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        tracing::debug!(job_id, "progress channel closed");
                        return;
                    }
                }
            }
            client_msg = socket.recv() => {
                match client_msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(msg) = serde_json::from_str::<ClientMessage>(&text) {
                            if msg.kind == "ping" {
                                let pong = serde_json::json!({ "type": "pong" });
                                let _ = socket.send(Message::Text(pong.to_string().into())).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(job_id, "progress websocket closed by client");
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(job_id, error = %e, "progress websocket receive error");
                        return;
                    }
                    _ => {}
                }
            }
            _ = keepalive.tick() => {
                let frame = serde_json::to_string(&ProgressFrame::Keepalive).unwrap_or_default();
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    tracing::debug!(job_id, "client disconnected during keepalive");
                    return;
                }
            }
        }
    }
}
