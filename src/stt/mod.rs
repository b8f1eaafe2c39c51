//! Transcription bridge: one audio window in, one transcript out
//!
//! The speech-to-text service is an external collaborator. Failures are
//! not retried here; the candidate's continued speech produces the next
//! window, and that is the retry.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::audio::AudioWindow;

/// Opaque "audio window → text" call.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, window: &AudioWindow, language: &str) -> Result<String>;
}

/// Wrap a raw PCM window in a WAV container so the transcription
/// service gets the sample rate with the samples. Compressed codecs
/// ship as-is; their container already carries the format.
fn package_window(window: &AudioWindow) -> Result<Vec<u8>> {
    if !window.codec.is_uncompressed() {
        return Ok(window.to_bytes());
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: window.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to start WAV container")?;
        for pair in window.to_bytes().chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .context("Failed to write WAV sample")?;
        }
        writer.finalize().context("Failed to finalize WAV container")?;
    }
    Ok(cursor.into_inner())
}

#[derive(Debug, Serialize)]
struct SttRequest {
    audio_b64: String,
    codec: String,
    sample_rate: u32,
    language: String,
}

#[derive(Debug, Deserialize)]
struct SttResponse {
    text: String,
}

/// HTTP client for the transcription service.
pub struct HttpSttClient {
    client: reqwest::Client,
    service_url: String,
}

impl HttpSttClient {
    pub fn new(service_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create STT HTTP client")?;
        Ok(Self {
            client,
            service_url,
        })
    }
}

#[async_trait]
impl SpeechToText for HttpSttClient {
    async fn transcribe(&self, window: &AudioWindow, language: &str) -> Result<String> {
        let request = SttRequest {
            audio_b64: BASE64.encode(package_window(window)?),
            codec: window.codec.as_str().to_string(),
            sample_rate: window.sample_rate,
            language: language.to_string(),
        };

        let url = format!("{}/transcribe", self.service_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("STT request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!("STT service returned {}: {}", status, body);
            bail!("STT service returned {}", status);
        }

        let parsed: SttResponse = response
            .json()
            .await
            .context("Failed to parse STT response")?;

        info!(
            "Transcribed {} bytes (~{}ms) into {} chars",
            window.byte_len,
            window.duration_ms,
            parsed.text.len()
        );
        Ok(parsed.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Codec;

    fn pcm_window(bytes: Vec<u8>) -> AudioWindow {
        AudioWindow {
            byte_len: bytes.len(),
            chunks: vec![bytes],
            duration_ms: 0,
            codec: Codec::Pcm16,
            sample_rate: 16_000,
        }
    }

    #[test]
    fn pcm_windows_get_a_wav_container() {
        let window = pcm_window(vec![0u8; 640]);
        let packaged = package_window(&window).unwrap();
        assert_eq!(&packaged[0..4], b"RIFF");
        assert_eq!(&packaged[8..12], b"WAVE");
        assert!(packaged.len() > 640);
    }

    #[test]
    fn compressed_windows_ship_raw() {
        let window = AudioWindow {
            chunks: vec![vec![1, 2, 3]],
            byte_len: 3,
            duration_ms: 0,
            codec: Codec::Opus,
            sample_rate: 48_000,
        };
        assert_eq!(package_window(&window).unwrap(), vec![1, 2, 3]);
    }
}
