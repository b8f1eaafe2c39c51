//! Speech synthesis via the external text-to-speech service

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Synthesized audio plus enough format detail to estimate play time.
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    /// Raw 16-bit mono PCM
    pub audio: Vec<u8>,
    pub sample_rate: u32,
}

impl SynthesizedSpeech {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let samples = self.audio.len() as u64 / 2;
        Duration::from_millis(samples * 1000 / self.sample_rate as u64)
    }
}

/// Opaque "text → audio bytes" call.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<SynthesizedSpeech>;
}

#[derive(Debug, Serialize)]
struct TtsRequest {
    text: String,
    language: String,
}

/// HTTP client for the speech-synthesis service. The response body is
/// the raw audio; the sample rate rides on a response header with a
/// sensible default.
pub struct HttpTtsClient {
    client: reqwest::Client,
    service_url: String,
}

impl HttpTtsClient {
    pub fn new(service_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create TTS HTTP client")?;
        Ok(Self {
            client,
            service_url,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpTtsClient {
    async fn synthesize(&self, text: &str, language: &str) -> Result<SynthesizedSpeech> {
        let url = format!("{}/synthesize", self.service_url);
        let response = self
            .client
            .post(&url)
            .json(&TtsRequest {
                text: text.to_string(),
                language: language.to_string(),
            })
            .send()
            .await
            .context("TTS request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!("TTS service returned {}: {}", status, body);
            bail!("TTS service returned {}", status);
        }

        let sample_rate = response
            .headers()
            .get("x-sample-rate")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(24_000);

        let audio = response
            .bytes()
            .await
            .context("Failed to read TTS audio body")?
            .to_vec();

        Ok(SynthesizedSpeech { audio, sample_rate })
    }
}
