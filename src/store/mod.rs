//! Persistence adapter for completed interviews
//!
//! Persistence is an external collaborator: the engine publishes one
//! record per finished session and moves on. Failure is logged and
//! surfaced as a warning; it never blocks teardown.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::turn::TranscriptEntry;

/// One row per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub candidate_name: Option<String>,
    pub candidate_phone: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub questions: Vec<String>,
    pub responses: Vec<String>,
    pub transcript: Vec<TranscriptEntry>,
}

/// Consumed interface only: hand over the finished record.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, record: &SessionRecord) -> Result<()>;
}

/// Publishes finished interview records to NATS for the downstream
/// recruiting backend to pick up.
pub struct NatsStore {
    client: async_nats::Client,
}

impl NatsStore {
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }
}

#[async_trait]
impl SessionStore for NatsStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let subject = format!("interview.completed.{}", record.session_id);
        let payload = serde_json::to_vec(record)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish interview record")?;

        info!(
            "Published interview record to {} ({} questions, {} transcript entries)",
            subject,
            record.questions.len(),
            record.transcript.len()
        );

        Ok(())
    }
}

/// In-memory store for tests and local runs without NATS.
#[derive(Default)]
pub struct MemoryStore {
    records: tokio::sync::Mutex<Vec<SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
