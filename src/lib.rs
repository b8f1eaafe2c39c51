pub mod audio;
pub mod config;
pub mod http;
pub mod llm;
pub mod playback;
pub mod session;
pub mod store;
pub mod stt;
pub mod transport;
pub mod tts;
pub mod turn;

pub use audio::{AudioWindow, Codec, IngestBuffer, PushOutcome, SessionRecorder};
pub use config::Config;
pub use http::{create_router, AppState};
pub use llm::{HttpCompletionClient, InterviewContext, UtteranceGenerator};
pub use playback::{PlaybackItem, PlaybackQueue, PlaybackSignal};
pub use session::{InterviewSession, SessionServices, SessionStatus};
pub use store::{MemoryStore, NatsStore, SessionRecord, SessionStore};
pub use stt::{HttpSttClient, SpeechToText};
pub use transport::{ClientFrame, ServerFrame, Speaker, TransportNegotiator};
pub use tts::{HttpTtsClient, SpeechSynthesizer, SynthesizedSpeech};
pub use turn::{SessionEvent, TranscriptEntry, TurnMachine};
