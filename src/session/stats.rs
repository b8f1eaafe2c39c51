use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of a session for the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub connected: bool,
    pub gates: GateSnapshot,
    pub main_question_index: u32,
    pub followup_count: u32,
    pub transcript_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSnapshot {
    pub preinterview_ready: bool,
    pub recording_on: bool,
    pub interview_active: bool,
    pub tts_playback_active: bool,
}
