//! Per-interview session orchestration: speaking gates, status
//! snapshots and the session owner that wires transport, audio,
//! transcription and the turn machine together.

mod gates;
mod session;
mod stats;

pub use gates::GateSet;
pub use session::{CandidateMeta, InterviewSession, SessionServices};
pub use stats::{GateSnapshot, SessionStatus};
