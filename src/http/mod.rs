//! HTTP API server for interview control
//!
//! This module provides a REST + WebSocket surface for driving interviews:
//! - POST /interviews/start - Create a session and start waiting for a client
//! - GET  /interviews/:id/ws - Candidate WebSocket (audio + control frames)
//! - POST /interviews/:id/stop - Tear a session down
//! - GET  /interviews/:id/status - Query session status
//! - GET  /interviews/:id/transcript - Get accumulated transcript
//! - GET  /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
