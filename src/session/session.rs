use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audio::{Codec, IngestBuffer, PushOutcome, RecorderConfig, SessionRecorder};
use crate::config::Config;
use crate::llm::UtteranceGenerator;
use crate::playback::{PlaybackQueue, PlaybackSignal};
use crate::session::{GateSnapshot, GateSet, SessionStatus};
use crate::store::{SessionRecord, SessionStore};
use crate::stt::SpeechToText;
use crate::transport::{
    ClientFrame, FallbackHandle, FallbackTransport, InboundFrame, RealtimeEvent, RealtimeLink,
    RealtimeTransport, ServerFrame, Speaker, TransportNegotiator,
};
use crate::tts::SpeechSynthesizer;
use crate::turn::{InterviewSummary, SessionEvent, TranscriptLog, TurnMachine, TurnStats};

/// How long `start` waits for the client's meta frame before declaring
/// the session dead on arrival.
const META_TIMEOUT: Duration = Duration::from_secs(30);

/// External collaborators a session talks to.
#[derive(Clone)]
pub struct SessionServices {
    pub stt: Arc<dyn SpeechToText>,
    pub generator: Arc<dyn UtteranceGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub store: Arc<dyn SessionStore>,
}

/// Candidate-declared stream parameters from the meta frame.
#[derive(Debug, Clone)]
pub struct CandidateMeta {
    pub codec: Codec,
    pub sample_rate: u32,
    pub language: String,
    pub candidate_name: Option<String>,
    pub candidate_phone: Option<String>,
}

/// One interview attempt. Owns every piece of per-session state; nothing
/// here is shared across sessions.
pub struct InterviewSession {
    id: String,
    config: Arc<Config>,
    services: SessionServices,
    gates: Arc<GateSet>,
    stats: Arc<TurnStats>,
    transcript: TranscriptLog,
    negotiator: Arc<TransportNegotiator>,
    fallback: FallbackHandle,
    started_at: chrono::DateTime<chrono::Utc>,

    inbound_rx: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    meta: Mutex<Option<CandidateMeta>>,
    playback: Mutex<Option<Arc<PlaybackQueue>>>,
    machine_handle: Mutex<Option<JoinHandle<InterviewSummary>>>,
    events_tx: Mutex<Option<mpsc::Sender<SessionEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,

    stopped: AtomicBool,
    /// The terminal control event went out; the interview finished
    /// normally rather than by disconnect.
    completed: Arc<AtomicBool>,
    /// Signalled when the session is ready to be reaped.
    done: Arc<Notify>,
}

impl InterviewSession {
    /// Create a session. `realtime` carries the peer data channel when
    /// one was established; `None` makes the negotiator fall back.
    pub fn new(
        id: String,
        config: Arc<Config>,
        services: SessionServices,
        realtime: Option<RealtimeLink>,
    ) -> Arc<Self> {
        let fallback_transport = FallbackTransport::new(META_TIMEOUT);
        let fallback = fallback_transport.handle();

        let (negotiator, inbound_rx) = TransportNegotiator::new(
            Some(Box::new(RealtimeTransport::new(realtime))),
            Box::new(fallback_transport),
            config.transport.clone(),
        );

        Arc::new(Self {
            id,
            config,
            services,
            gates: Arc::new(GateSet::new()),
            stats: Arc::new(TurnStats::default()),
            transcript: TranscriptLog::new(),
            negotiator,
            fallback,
            started_at: Utc::now(),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            meta: Mutex::new(None),
            playback: Mutex::new(None),
            machine_handle: Mutex::new(None),
            events_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            completed: Arc::new(AtomicBool::new(false)),
            done: Arc::new(Notify::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attachment handle for the WebSocket layer.
    pub fn fallback_handle(&self) -> FallbackHandle {
        self.fallback.clone()
    }

    /// Signalled once the session should be reaped from the registry.
    pub fn done(&self) -> Arc<Notify> {
        Arc::clone(&self.done)
    }

    /// Opportunistic liveness probe (network regained, tab visible).
    pub async fn poke(self: &Arc<Self>) {
        self.negotiator.poke().await;
    }

    /// Bring the session up: connect a transport, wait for the meta
    /// frame, then wire playback, ingestion and the turn machine.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.negotiator.start().await {
            bail!("no transport reached connected");
        }

        let mut inbound_rx = self
            .inbound_rx
            .lock()
            .await
            .take()
            .context("session already started")?;

        let meta = self.wait_for_meta(&mut inbound_rx).await?;
        info!(
            "Session {} ready: codec={} rate={} lang={}",
            self.id,
            meta.codec.as_str(),
            meta.sample_rate,
            meta.language
        );

        self.gates.set_preinterview_ready(true);
        self.gates.set_recording_on(true);
        self.gates.set_interview_active(true);
        *self.meta.lock().await = Some(meta.clone());

        let (out_tx, out_rx) = mpsc::channel::<ServerFrame>(64);
        let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(256);
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (signal_tx, signal_rx) = mpsc::channel::<PlaybackSignal>(64);

        let playback = Arc::new(PlaybackQueue::new(
            Arc::clone(&self.services.synthesizer),
            meta.language.clone(),
            audio_tx,
            signal_tx,
        ));
        *self.playback.lock().await = Some(Arc::clone(&playback));

        let machine = TurnMachine::new(
            self.config.interview.clone(),
            meta.language.clone(),
            meta.candidate_name.clone(),
            Arc::clone(&self.services.generator),
            playback,
            Arc::clone(&self.gates),
            self.transcript.clone(),
            out_tx,
            events_tx.clone(),
            Arc::clone(&self.stats),
        );
        *self.machine_handle.lock().await = Some(tokio::spawn(machine.run(events_rx)));
        *self.events_tx.lock().await = Some(events_tx.clone());

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_outbound_pump(out_rx));
        tasks.push(self.spawn_audio_pump(audio_rx));
        tasks.push(self.spawn_signal_pump(signal_rx, events_tx.clone()));
        tasks.push(self.spawn_inbound_pump(inbound_rx, events_tx.clone(), meta));
        tasks.push(self.spawn_time_limit(events_tx.clone()));
        drop(tasks);

        events_tx
            .send(SessionEvent::Started)
            .await
            .context("turn machine is gone")?;

        info!("Session {} started", self.id);
        Ok(())
    }

    async fn wait_for_meta(
        &self,
        inbound_rx: &mut mpsc::Receiver<InboundFrame>,
    ) -> Result<CandidateMeta> {
        let deadline = tokio::time::Instant::now() + META_TIMEOUT;
        loop {
            let frame = tokio::time::timeout_at(deadline, inbound_rx.recv())
                .await
                .context("timed out waiting for meta frame")?
                .context("transport closed before meta frame")?;

            match frame {
                InboundFrame::Control(ClientFrame::Meta {
                    codec,
                    sample_rate,
                    language,
                    candidate_name,
                    candidate_phone,
                }) => {
                    return Ok(CandidateMeta {
                        codec,
                        sample_rate,
                        language,
                        candidate_name,
                        candidate_phone,
                    });
                }
                InboundFrame::Closed { code } => {
                    bail!("transport closed before meta frame (code {:?})", code);
                }
                other => {
                    warn!("Frame before meta ignored: {}", frame_kind(&other));
                }
            }
        }
    }

    /// Machine frames out to the client; questions additionally go to
    /// the realtime channel as text so the provider can voice them.
    fn spawn_outbound_pump(self: &Arc<Self>, mut out_rx: mpsc::Receiver<ServerFrame>) -> JoinHandle<()> {
        let negotiator = Arc::clone(&self.negotiator);
        let completed = Arc::clone(&self.completed);
        let done = Arc::clone(&self.done);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let ServerFrame::Question { data } = &frame {
                    negotiator.send_text(data.question.clone()).await;
                }
                let terminal = matches!(frame, ServerFrame::InterviewComplete);
                negotiator.send_control(frame).await;
                if terminal {
                    completed.store(true, Ordering::SeqCst);
                    done.notify_waiters();
                }
            }
        })
    }

    fn spawn_audio_pump(self: &Arc<Self>, mut audio_rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
        let negotiator = Arc::clone(&self.negotiator);
        tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                negotiator.send_audio_chunk(chunk).await;
            }
        })
    }

    /// Keeps the TTS-active gate honest: up immediately on start, down
    /// only after a short trailing debounce, cancelled if playback
    /// restarts in between.
    fn spawn_signal_pump(
        self: &Arc<Self>,
        mut signal_rx: mpsc::Receiver<PlaybackSignal>,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> JoinHandle<()> {
        let gates = Arc::clone(&self.gates);
        let debounce = Duration::from_millis(self.config.interview.tts_debounce_ms);
        tokio::spawn(async move {
            let mut debounce_task: Option<JoinHandle<()>> = None;
            while let Some(signal) = signal_rx.recv().await {
                match signal {
                    PlaybackSignal::Started { text } => {
                        if let Some(handle) = debounce_task.take() {
                            handle.abort();
                        }
                        gates.set_tts_playback_active(true);
                        let _ = events_tx.send(SessionEvent::PlaybackStarted { text }).await;
                    }
                    PlaybackSignal::Ended { text, completed } => {
                        let _ = events_tx
                            .send(SessionEvent::PlaybackEnded { text, completed })
                            .await;
                        let gates = Arc::clone(&gates);
                        debounce_task = Some(tokio::spawn(async move {
                            tokio::time::sleep(debounce).await;
                            gates.set_tts_playback_active(false);
                        }));
                    }
                }
            }
            if let Some(handle) = debounce_task.take() {
                handle.abort();
            }
        })
    }

    /// Transport frames in: audio into the ingestion buffer, control
    /// frames into session events, realtime events mapped through the
    /// same guards as everything else.
    fn spawn_inbound_pump(
        self: &Arc<Self>,
        mut inbound_rx: mpsc::Receiver<InboundFrame>,
        events_tx: mpsc::Sender<SessionEvent>,
        meta: CandidateMeta,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ingest = IngestBuffer::new(
                this.config.ingest.clone(),
                meta.codec,
                meta.sample_rate,
            );
            let mut recorder = this.make_recorder(&meta);
            let mut stt_task: Option<JoinHandle<()>> = None;
            let mut pending: Option<crate::audio::AudioWindow> = None;

            while let Some(frame) = inbound_rx.recv().await {
                let stt_idle = stt_task.as_ref().map(|h| h.is_finished()).unwrap_or(true);

                // Drain the backlog left behind by a completed call.
                if stt_idle {
                    if let Some(window) = pending.take() {
                        stt_task = Some(this.spawn_transcription(window, meta.language.clone(), events_tx.clone()));
                    } else if ingest.is_overdue() {
                        if let Some(window) = ingest.force_flush() {
                            stt_task = Some(this.spawn_transcription(window, meta.language.clone(), events_tx.clone()));
                        }
                    }
                }
                let stt_idle = stt_task.as_ref().map(|h| h.is_finished()).unwrap_or(true);

                match frame {
                    InboundFrame::Audio(bytes) => {
                        if let Some(rec) = recorder.as_mut() {
                            if let Err(e) = rec.write_pcm(&bytes) {
                                warn!("Recorder write failed: {}", e);
                            }
                        }
                        match ingest.push(bytes, stt_idle) {
                            PushOutcome::Buffered => {}
                            PushOutcome::Ready(window) => {
                                stt_task =
                                    Some(this.spawn_transcription(window, meta.language.clone(), events_tx.clone()));
                            }
                            PushOutcome::Forced(window) => {
                                if stt_idle {
                                    stt_task =
                                        Some(this.spawn_transcription(window, meta.language.clone(), events_tx.clone()));
                                } else {
                                    // One-deep slot; newest forced window wins.
                                    pending = Some(window);
                                }
                            }
                        }
                    }
                    InboundFrame::Control(ClientFrame::Flush) => {
                        if let Some(window) = ingest.force_flush() {
                            if stt_idle {
                                stt_task =
                                    Some(this.spawn_transcription(window, meta.language.clone(), events_tx.clone()));
                            } else {
                                pending = Some(window);
                            }
                        }
                    }
                    InboundFrame::Control(ClientFrame::ManualText { text }) => {
                        let _ = events_tx
                            .send(SessionEvent::CandidateTranscript {
                                text,
                                timestamp: Utc::now(),
                            })
                            .await;
                    }
                    InboundFrame::Control(ClientFrame::Control { shutdown_request }) => {
                        if shutdown_request {
                            let _ = events_tx.send(SessionEvent::Shutdown).await;
                        }
                    }
                    InboundFrame::Control(ClientFrame::Meta { .. }) => {
                        // Re-attached client re-announcing itself; state
                        // already exists, nothing to redo.
                    }
                    InboundFrame::Realtime(event) => {
                        this.map_realtime(event, &events_tx).await;
                    }
                    InboundFrame::Closed { code } => {
                        // Only surfaces once the negotiator has given up.
                        warn!("Session {} transport gone (code {:?})", this.id, code);
                        let _ = events_tx.send(SessionEvent::Shutdown).await;
                        this.done.notify_waiters();
                        break;
                    }
                }
            }

            if let Some(rec) = recorder.take() {
                if let Err(e) = rec.finish() {
                    warn!("Recorder finalize failed: {}", e);
                }
            }
        })
    }

    async fn map_realtime(&self, event: RealtimeEvent, events_tx: &mpsc::Sender<SessionEvent>) {
        match event {
            RealtimeEvent::TranscriptDelta { delta } => {
                let _ = events_tx.send(SessionEvent::SpeechEnergy { text: delta }).await;
            }
            RealtimeEvent::TranscriptDone { text } => {
                let _ = events_tx
                    .send(SessionEvent::CandidateTranscript {
                        text,
                        timestamp: Utc::now(),
                    })
                    .await;
            }
            RealtimeEvent::ResponseDone { text: Some(text) } => {
                // The provider voiced this itself; log it so the record
                // is complete.
                self.transcript.append(Speaker::Interviewer, text).await;
            }
            RealtimeEvent::Error { message } => {
                warn!("Realtime channel error: {}", message);
                self.negotiator
                    .send_control(ServerFrame::Error { message })
                    .await;
            }
            RealtimeEvent::SessionCreated
            | RealtimeEvent::SessionEnded
            | RealtimeEvent::ResponseStarted
            | RealtimeEvent::ResponseDone { text: None } => {}
        }
    }

    fn spawn_transcription(
        self: &Arc<Self>,
        window: crate::audio::AudioWindow,
        language: String,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> JoinHandle<()> {
        let stt = Arc::clone(&self.services.stt);
        let negotiator = Arc::clone(&self.negotiator);

        tokio::spawn(async move {
            match stt.transcribe(&window, &language).await {
                Ok(text) if !text.trim().is_empty() => {
                    let _ = events_tx
                        .send(SessionEvent::CandidateTranscript {
                            text,
                            timestamp: Utc::now(),
                        })
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    // Window already discarded; the candidate's next
                    // speech is the retry.
                    warn!("Transcription failed: {}", e);
                    negotiator
                        .send_control(ServerFrame::Error {
                            message: "transcription hiccup, please continue".to_string(),
                        })
                        .await;
                }
            }
        })
    }

    fn spawn_time_limit(self: &Arc<Self>, events_tx: mpsc::Sender<SessionEvent>) -> JoinHandle<()> {
        let limit = Duration::from_secs(self.config.interview.session_time_limit_secs);
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let _ = events_tx.send(SessionEvent::TimeLimit).await;
        })
    }

    fn make_recorder(&self, meta: &CandidateMeta) -> Option<SessionRecorder> {
        if !self.config.recording.enabled || !meta.codec.is_uncompressed() {
            return None;
        }
        match SessionRecorder::new(RecorderConfig {
            chunk_duration_secs: self.config.recording.chunk_duration_secs,
            output_dir: self.config.recording.output_dir.clone().into(),
            session_id: self.id.clone(),
            sample_rate: meta.sample_rate,
        }) {
            Ok(rec) => Some(rec),
            Err(e) => {
                warn!("Recorder disabled: {}", e);
                None
            }
        }
    }

    /// Tear the session down and persist the record. Idempotent.
    pub async fn stop(self: &Arc<Self>, manual: bool) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping session {} (manual={})", self.id, manual);

        if let Some(events_tx) = self.events_tx.lock().await.take() {
            let _ = events_tx.send(SessionEvent::Shutdown).await;
        }

        let summary = match self.machine_handle.lock().await.take() {
            Some(handle) => match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(summary)) => Some(summary),
                Ok(Err(e)) => {
                    error!("Turn machine panicked: {}", e);
                    None
                }
                Err(_) => {
                    warn!("Turn machine did not settle in time");
                    None
                }
            },
            None => None,
        };

        if let Some(playback) = self.playback.lock().await.take() {
            playback.destroy().await;
        }

        self.negotiator.disconnect(manual).await;

        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }

        self.persist(summary).await;
        self.done.notify_waiters();
        info!("Session {} stopped", self.id);
    }

    /// Persist once at normal end; best-effort on abrupt disconnect past
    /// the minimum duration. Never blocks teardown.
    async fn persist(&self, summary: Option<InterviewSummary>) {
        let ended_at = Utc::now();
        let duration = ended_at
            .signed_duration_since(self.started_at)
            .num_seconds()
            .max(0) as u64;

        let normal_end = self.completed.load(Ordering::SeqCst);
        if !normal_end && duration < self.config.interview.min_persist_secs {
            info!(
                "Session {} too short ({}s) for best-effort persistence",
                self.id, duration
            );
            return;
        }

        let meta = self.meta.lock().await.clone();
        let summary = summary.unwrap_or(InterviewSummary {
            questions: Vec::new(),
            responses: Vec::new(),
        });

        let record = SessionRecord {
            session_id: self.id.clone(),
            candidate_name: meta.as_ref().and_then(|m| m.candidate_name.clone()),
            candidate_phone: meta.as_ref().and_then(|m| m.candidate_phone.clone()),
            started_at: self.started_at,
            ended_at,
            duration_seconds: duration,
            questions: summary.questions,
            responses: summary.responses,
            transcript: self.transcript.snapshot().await,
        };

        if let Err(e) = self.services.store.save(&record).await {
            warn!("Failed to persist session {}: {}", self.id, e);
        }
    }

    pub async fn status(&self) -> SessionStatus {
        use std::sync::atomic::Ordering::SeqCst;
        SessionStatus {
            session_id: self.id.clone(),
            started_at: self.started_at,
            duration_secs: Utc::now()
                .signed_duration_since(self.started_at)
                .num_milliseconds() as f64
                / 1000.0,
            connected: self.negotiator.is_connected(),
            gates: GateSnapshot {
                preinterview_ready: self.gates.preinterview_ready(),
                recording_on: self.gates.recording_on(),
                interview_active: self.gates.interview_active(),
                tts_playback_active: self.gates.tts_playback_active(),
            },
            main_question_index: self.stats.main_question_index.load(SeqCst),
            followup_count: self.stats.followup_count.load(SeqCst),
            transcript_entries: self.transcript.len().await,
        }
    }

    pub async fn transcript(&self) -> Vec<crate::turn::TranscriptEntry> {
        self.transcript.snapshot().await
    }
}

fn frame_kind(frame: &InboundFrame) -> &'static str {
    match frame {
        InboundFrame::Control(_) => "control",
        InboundFrame::Audio(_) => "audio",
        InboundFrame::Realtime(_) => "realtime",
        InboundFrame::Closed { .. } => "closed",
    }
}
