use super::state::AppState;
use crate::session::InterviewSession;
use crate::transport::{ClientFrame, InboundFrame, OutboundFrame, SocketHalves};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartInterviewRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartInterviewResponse {
    pub session_id: String,
    pub status: String,
    /// Path the candidate client should open a WebSocket to
    pub ws_path: String,
}

#[derive(Debug, Serialize)]
pub struct StopInterviewResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /interviews/start
/// Create a session and start it waiting for the candidate's socket
pub async fn start_interview(
    State(state): State<AppState>,
    Json(req): Json<StartInterviewRequest>,
) -> impl IntoResponse {
    let session_id = req
        .session_id
        .unwrap_or_else(|| format!("interview-{}", uuid::Uuid::new_v4()));

    info!("Starting interview session: {}", session_id);

    {
        let sessions = state.sessions.read().await;
        if sessions.contains_key(&session_id) {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: format!("Session {} already exists", session_id),
                }),
            )
                .into_response();
        }
    }

    // No realtime link on this path; the negotiator falls back to the
    // WebSocket transport and waits for the candidate to attach.
    let session = InterviewSession::new(
        session_id.clone(),
        Arc::clone(&state.config),
        state.services.clone(),
        None,
    );

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(session_id.clone(), Arc::clone(&session));
    }

    // start() blocks until the meta frame arrives, so it runs off the
    // request path. A companion watcher reaps the session when done.
    {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if let Err(e) = session.start().await {
                error!("Session {} failed to start: {}", session.id(), e);
                session.stop(false).await;
            }
        });
    }
    {
        let session = Arc::clone(&session);
        let sessions = Arc::clone(&state.sessions);
        tokio::spawn(async move {
            session.done().notified().await;
            session.stop(false).await;
            sessions.write().await.remove(session.id());
            info!("Session {} reaped", session.id());
        });
    }

    (
        StatusCode::OK,
        Json(StartInterviewResponse {
            session_id: session_id.clone(),
            status: "waiting".to_string(),
            ws_path: format!("/interviews/{}/ws", session_id),
        }),
    )
        .into_response()
}

/// POST /interviews/:session_id/stop
/// Tear a session down and persist whatever it accumulated
pub async fn stop_interview(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping interview session: {}", session_id);

    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    match session {
        Some(session) => {
            session.stop(true).await;
            (
                StatusCode::OK,
                Json(StopInterviewResponse {
                    session_id: session_id.clone(),
                    status: "stopped".to_string(),
                    message: "Interview stopped".to_string(),
                }),
            )
                .into_response()
        }
        None => {
            error!("Session {} not found", session_id);
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("Session {} not found", session_id),
                }),
            )
                .into_response()
        }
    }
}

/// GET /interviews/:session_id/status
pub async fn get_interview_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => (StatusCode::OK, Json(session.status().await)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /interviews/:session_id/transcript
/// Get transcript for an interview (accumulated so far)
pub async fn get_interview_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => (StatusCode::OK, Json(session.transcript().await)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /interviews/:session_id/ws
/// Upgrade to the candidate WebSocket and plug it into the session's
/// fallback transport
pub async fn interview_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let session = {
        let sessions = state.sessions.read().await;
        sessions.get(&session_id).cloned()
    };

    match session {
        Some(session) => ws
            .on_upgrade(move |socket| run_socket(socket, session))
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// ============================================================================
// WebSocket pump
// ============================================================================

/// Bridge one socket's lifetime into the session's fallback transport.
/// A candidate re-attaching after a network blip lands here again with
/// the same session.
async fn run_socket(socket: WebSocket, session: Arc<InterviewSession>) {
    let (to_socket_tx, mut to_socket_rx) = mpsc::channel::<OutboundFrame>(64);
    let (from_socket_tx, from_socket_rx) = mpsc::channel::<InboundFrame>(256);

    if session
        .fallback_handle()
        .attach(SocketHalves {
            to_socket: to_socket_tx,
            from_socket: from_socket_rx,
        })
        .await
        .is_err()
    {
        warn!("Socket arrived for a session that is gone");
        return;
    }
    // Wake the negotiator in case it was waiting out a backoff.
    session.poke().await;

    let (mut ws_tx, mut ws_rx) = socket.split();

    let write_task = tokio::spawn(async move {
        while let Some(frame) = to_socket_rx.recv().await {
            let message = match frame {
                OutboundFrame::Control(server_frame) => {
                    match serde_json::to_string(&server_frame) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            error!("Failed to serialize server frame: {}", e);
                            continue;
                        }
                    }
                }
                // Question text already rides the control frame on this
                // path; the bare text is only for the realtime channel.
                OutboundFrame::Text(_) => continue,
                OutboundFrame::Audio(bytes) => Message::Binary(bytes),
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut close_sent = false;
    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(m) => m,
            Err(e) => {
                warn!("WebSocket read error: {}", e);
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => {
                    if from_socket_tx
                        .send(InboundFrame::Control(frame))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => warn!("Unparseable client frame ignored: {}", e),
            },
            Message::Binary(bytes) => {
                if from_socket_tx
                    .send(InboundFrame::Audio(bytes))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Message::Close(frame) => {
                let code = frame.map(|f| u16::from(f.code));
                let _ = from_socket_tx.send(InboundFrame::Closed { code }).await;
                close_sent = true;
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    if !close_sent {
        let _ = from_socket_tx.send(InboundFrame::Closed { code: None }).await;
    }
    write_task.abort();
    info!("Socket pump for session {} finished", session.id());
}
