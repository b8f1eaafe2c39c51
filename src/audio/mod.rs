//! Server-side audio handling: ingestion windowing and session recording

pub mod ingest;
pub mod recorder;

pub use ingest::{AudioWindow, IngestBuffer, PushOutcome};
pub use recorder::{RecorderConfig, SessionRecorder};

use serde::{Deserialize, Serialize};

/// Codecs the client may declare in its meta frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// Raw 16-bit little-endian PCM
    Pcm16,
    Opus,
    WebmOpus,
}

impl Codec {
    /// Uncompressed codecs window by estimated duration; compressed ones
    /// by byte count, since their byte rate says nothing about time.
    pub fn is_uncompressed(&self) -> bool {
        matches!(self, Codec::Pcm16)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Pcm16 => "pcm16",
            Codec::Opus => "opus",
            Codec::WebmOpus => "webm_opus",
        }
    }
}
