//! The turn state machine and its gating heuristics

pub mod guards;
mod machine;
mod transcript;

pub use machine::{InterviewSummary, TurnMachine, TurnStats};
pub use transcript::{TranscriptEntry, TranscriptLog};

use chrono::{DateTime, Utc};

/// Everything that can influence a session's turn state, funneled into
/// one queue with a single consumer so ordering stays testable.
#[derive(Debug)]
pub enum SessionEvent {
    /// Gates are up; greet the candidate.
    Started,
    /// A transcription (or manual text) attributed to the candidate.
    CandidateTranscript {
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// Evidence of candidate speech before any transcript exists
    /// (streamed deltas from the realtime channel). Carries the partial
    /// text so the echo guard applies before it can trigger barge-in.
    SpeechEnergy { text: String },
    PlaybackStarted { text: String },
    PlaybackEnded { text: String, completed: bool },
    /// The decide-next-utterance computation resolved.
    UtteranceReady { text: String },
    UtteranceFailed { error: String },
    /// The silence window after a fully-played question elapsed.
    SilenceTimeout,
    /// The minimum answer duration elapsed since the first non-trivial
    /// token of the current answer.
    AnswerWindowElapsed,
    /// The overall session time budget is spent.
    TimeLimit,
    /// Explicit shutdown control signal or session teardown.
    Shutdown,
}
