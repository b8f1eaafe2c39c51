//! Interviewer utterance generation via the external completion service

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// One prior exchange in the interview, as the completion service sees it.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Interviewer,
    Candidate,
}

/// Everything the completion service needs to produce the next utterance.
#[derive(Debug, Clone, Serialize)]
pub struct InterviewContext {
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    pub history: Vec<HistoryTurn>,
    pub main_question_index: u32,
    pub total_questions: u32,
    /// The interview is past its last question; ask for a wrap-up.
    pub closing: bool,
}

/// Opaque "ask for the next utterance given history" call.
#[async_trait]
pub trait UtteranceGenerator: Send + Sync {
    async fn next_utterance(&self, ctx: &InterviewContext) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    text: String,
}

/// HTTP client for the completion service.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    service_url: String,
}

impl HttpCompletionClient {
    pub fn new(service_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create completion HTTP client")?;
        Ok(Self {
            client,
            service_url,
        })
    }
}

#[async_trait]
impl UtteranceGenerator for HttpCompletionClient {
    async fn next_utterance(&self, ctx: &InterviewContext) -> Result<String> {
        let url = format!("{}/next-utterance", self.service_url);
        let response = self
            .client
            .post(&url)
            .json(ctx)
            .send()
            .await
            .context("Completion request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!("Completion service returned {}: {}", status, body);
            bail!("Completion service returned {}", status);
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse completion response")?;
        Ok(parsed.text)
    }
}
