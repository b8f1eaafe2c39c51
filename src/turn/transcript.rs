use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::transport::Speaker;

/// One line of the interview transcript. Never mutated once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only interview transcript, shared between the turn machine
/// (writer) and the HTTP status surface (reader).
#[derive(Clone, Default)]
pub struct TranscriptLog {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, speaker: Speaker, text: impl Into<String>) -> TranscriptEntry {
        let entry = TranscriptEntry {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        };
        self.entries.lock().await.push(entry.clone());
        entry
    }

    pub async fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
