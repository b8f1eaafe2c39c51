use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub services: ExternalServices,
    #[serde(default)]
    pub interview: InterviewConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Endpoints and timeouts for the three external AI services plus NATS.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalServices {
    pub stt_url: String,
    pub completion_url: String,
    pub tts_url: String,
    pub nats_url: String,
    /// Per-request timeout for all three HTTP services, in seconds
    pub request_timeout_secs: u64,
}

/// Turn-taking heuristics. Every threshold here is deliberately tunable;
/// the similarity cutoffs in particular are empirical, not principled.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterviewConfig {
    /// Total number of main questions per interview
    pub total_questions: u32,
    /// Maximum follow-ups per main question
    pub max_followups: u32,
    /// Utterances at or below this word count are follow-ups, not main questions
    pub followup_word_ceiling: usize,
    /// Token-overlap ratio above which a candidate transcript is treated as self-echo
    pub echo_similarity_threshold: f64,
    /// Normalized-levenshtein ratio above which a new question is a near-duplicate
    pub duplicate_question_threshold: f64,
    /// An answer is not complete enough to respond to before this elapses
    pub min_answer_duration_ms: u64,
    /// Silence after a fully-played question before the single re-ask
    pub silence_reask_ms: u64,
    /// Two barge-ins closer together than this collapse into one
    pub barge_in_cooldown_ms: u64,
    /// Trailing delay before the TTS-active gate drops after playback ends
    pub tts_debounce_ms: u64,
    /// Hard wall-clock budget for the whole interview
    pub session_time_limit_secs: u64,
    /// Abrupt disconnects persist the record only past this duration
    pub min_persist_secs: u64,
}

/// Audio windowing thresholds for the ingestion buffer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Minimum estimated duration before an uncompressed window is ready
    pub min_window_ms: u64,
    /// Maximum estimated duration before an uncompressed window is forced
    pub max_window_ms: u64,
    /// Minimum accumulated bytes before a compressed window is ready
    pub min_window_bytes: usize,
    /// Maximum accumulated bytes before a compressed window is forced
    pub max_window_bytes: usize,
    /// Absolute ceiling for either family; flushes regardless of soft thresholds
    pub hard_ceiling_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Initial reconnect backoff for the fallback transport
    pub reconnect_base_ms: u64,
    /// Backoff cap
    pub reconnect_max_ms: u64,
    /// Give up after this many reconnect attempts
    pub reconnect_attempts: u32,
    /// Heartbeat ping interval while connected
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Write candidate audio to rotating WAV chunks for recruiter review
    pub enabled: bool,
    pub output_dir: String,
    /// Duration of each WAV chunk before rotating files
    pub chunk_duration_secs: u64,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VOXHIRE").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            total_questions: 6,
            max_followups: 2,
            followup_word_ceiling: 18,
            echo_similarity_threshold: 0.8,
            duplicate_question_threshold: 0.85,
            min_answer_duration_ms: 10_000,
            silence_reask_ms: 5_000,
            barge_in_cooldown_ms: 1_500,
            tts_debounce_ms: 400,
            session_time_limit_secs: 900,
            min_persist_secs: 30,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_window_ms: 2_500,
            max_window_ms: 10_000,
            min_window_bytes: 24_000,
            max_window_bytes: 120_000,
            hard_ceiling_bytes: 600_000,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            reconnect_attempts: 6,
            heartbeat_secs: 15,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: "recordings".to_string(),
            chunk_duration_secs: 300,
        }
    }
}
