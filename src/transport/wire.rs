use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::Codec;

/// JSON control frames arriving from the client over the fallback channel.
///
/// Binary WebSocket frames carry raw audio chunks and never pass through
/// this enum; the WS pump turns them into [`super::InboundFrame::Audio`]
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Meta {
        codec: Codec,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        language: String,
        #[serde(rename = "candidateName", default, skip_serializing_if = "Option::is_none")]
        candidate_name: Option<String>,
        #[serde(rename = "candidatePhone", default, skip_serializing_if = "Option::is_none")]
        candidate_phone: Option<String>,
    },
    /// The candidate's speaking turn ended (client-side VAD) or recording
    /// stopped; forces a transcription attempt on whatever is buffered.
    Flush,
    /// Typed fallback for candidates whose microphone fails mid-interview.
    ManualText { text: String },
    Control {
        #[serde(default)]
        shutdown_request: bool,
    },
}

/// JSON frames we send to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Question { data: QuestionPayload },
    Transcript { data: TranscriptPayload },
    Error { message: String },
    Ping { ts: i64 },
    InterviewComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question: String,
    #[serde(rename = "isGreeting", default, skip_serializing_if = "Option::is_none")]
    pub is_greeting: Option<bool>,
    #[serde(rename = "isClosing", default, skip_serializing_if = "Option::is_none")]
    pub is_closing: Option<bool>,
    #[serde(rename = "questionNumber", default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<u32>,
    #[serde(rename = "totalQuestions", default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptPayload {
    pub text: String,
    pub speaker: Speaker,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Candidate,
    Interviewer,
}
