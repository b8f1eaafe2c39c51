use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::InterviewConfig;
use crate::llm::{HistoryTurn, InterviewContext, Role, UtteranceGenerator};
use crate::playback::{PlaybackItem, PlaybackQueue};
use crate::session::GateSet;
use crate::transport::{QuestionPayload, ServerFrame, Speaker, TranscriptPayload};

use super::guards;
use super::{SessionEvent, TranscriptLog};

/// Interview phases. `Greeting` can only be entered once, from `Idle`,
/// which is what makes the greeting unrepeatable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Greeting requested or playing; consumed on the first utterance.
    Greeting,
    /// A main question (or follow-up) cycle is running.
    Asking,
    /// Past the last question; wrap-up utterance in flight.
    Closing,
    /// Terminal. The machine stays silent permanently.
    Done,
}

/// Live counters mirrored for the status endpoint; the machine is the
/// only writer.
#[derive(Debug, Default)]
pub struct TurnStats {
    pub main_question_index: AtomicU32,
    pub followup_count: AtomicU32,
}

/// What the machine hands back when its event stream ends; the session
/// folds this into the persisted record.
#[derive(Debug, Clone)]
pub struct InterviewSummary {
    pub questions: Vec<String>,
    pub responses: Vec<String>,
}

/// The interview brain: a single consumer over the session event queue.
///
/// All decisions are serialized through `run`; at most one
/// decide-next-utterance computation is in flight at a time, and
/// barge-in aborts it.
pub struct TurnMachine {
    cfg: InterviewConfig,
    language: String,
    candidate_name: Option<String>,
    generator: Arc<dyn UtteranceGenerator>,
    playback: Arc<PlaybackQueue>,
    gates: Arc<GateSet>,
    transcript: TranscriptLog,
    out_tx: mpsc::Sender<ServerFrame>,
    events_tx: mpsc::Sender<SessionEvent>,
    stats: Arc<TurnStats>,

    phase: Phase,
    next_main_index: u32,
    issued_indices: HashSet<u32>,
    followups: u32,
    questions: Vec<String>,
    responses: Vec<String>,
    history: Vec<HistoryTurn>,
    echo_memory: Option<String>,
    last_question: Option<String>,
    current_question: Option<String>,
    closing_text: Option<String>,

    pending_answer: Vec<String>,
    answer_started: Option<Instant>,
    answer_timer: Option<JoinHandle<()>>,
    silence_timer: Option<JoinHandle<()>>,
    reasked: bool,
    last_barge_in: Option<Instant>,
    generation: Option<JoinHandle<()>>,
}

impl TurnMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: InterviewConfig,
        language: String,
        candidate_name: Option<String>,
        generator: Arc<dyn UtteranceGenerator>,
        playback: Arc<PlaybackQueue>,
        gates: Arc<GateSet>,
        transcript: TranscriptLog,
        out_tx: mpsc::Sender<ServerFrame>,
        events_tx: mpsc::Sender<SessionEvent>,
        stats: Arc<TurnStats>,
    ) -> Self {
        Self {
            cfg,
            language,
            candidate_name,
            generator,
            playback,
            gates,
            transcript,
            out_tx,
            events_tx,
            stats,
            phase: Phase::Idle,
            next_main_index: 0,
            issued_indices: HashSet::new(),
            followups: 0,
            questions: Vec::new(),
            responses: Vec::new(),
            history: Vec::new(),
            echo_memory: None,
            last_question: None,
            current_question: None,
            closing_text: None,
            pending_answer: Vec::new(),
            answer_started: None,
            answer_timer: None,
            silence_timer: None,
            reasked: false,
            last_barge_in: None,
            generation: None,
        }
    }

    /// Consume session events until the terminal event fires or the
    /// channel closes, then hand back the summary.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> InterviewSummary {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            if self.phase == Phase::Done {
                break;
            }
        }

        self.cancel_timers();
        self.abort_generation();

        InterviewSummary {
            questions: self.questions,
            responses: self.responses,
        }
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started => self.on_started().await,
            SessionEvent::CandidateTranscript { text, timestamp: _ } => {
                self.on_candidate_text(text).await
            }
            SessionEvent::SpeechEnergy { text } => self.on_speech_energy(text).await,
            SessionEvent::PlaybackStarted { .. } => {
                // We are speaking; a stale silence timer would re-ask
                // over our own voice.
                self.cancel_silence_timer();
            }
            SessionEvent::PlaybackEnded { text, completed } => {
                self.on_playback_ended(text, completed).await
            }
            SessionEvent::UtteranceReady { text } => self.on_utterance_ready(text).await,
            SessionEvent::UtteranceFailed { error } => {
                warn!("Utterance generation failed: {}", error);
                self.send_frame(ServerFrame::Error {
                    message: "The interviewer hit a snag; please keep going".to_string(),
                })
                .await;
            }
            SessionEvent::SilenceTimeout => self.on_silence_timeout().await,
            SessionEvent::AnswerWindowElapsed => self.on_answer_window_elapsed().await,
            SessionEvent::TimeLimit => {
                info!("Session time budget spent, closing interview");
                self.terminate().await;
            }
            SessionEvent::Shutdown => self.terminate().await,
        }
    }

    async fn on_started(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        self.phase = Phase::Greeting;
        self.spawn_generation(false);
    }

    async fn on_candidate_text(&mut self, text: String) {
        if guards::is_echo(
            &text,
            self.echo_memory.as_deref(),
            self.cfg.echo_similarity_threshold,
        ) {
            debug!("Discarding self-echo: {:?}", text);
            return;
        }

        if self.gates.tts_playback_active() {
            self.barge_in().await;
        }

        if guards::is_trivial(&text) {
            return;
        }

        self.cancel_silence_timer();

        let entry = self.transcript.append(Speaker::Candidate, text.clone()).await;
        self.send_frame(ServerFrame::Transcript {
            data: TranscriptPayload {
                text: entry.text.clone(),
                speaker: Speaker::Candidate,
                timestamp: entry.timestamp,
            },
        })
        .await;

        self.pending_answer.push(text);

        if self.answer_started.is_none() {
            self.answer_started = Some(Instant::now());
            self.spawn_answer_timer();
        } else if let Some(started) = self.answer_started {
            if started.elapsed() >= Duration::from_millis(self.cfg.min_answer_duration_ms) {
                self.finalize_answer().await;
            }
        }
    }

    /// Streamed partial speech. The same echo guard as for final
    /// transcripts applies; a playback bleed arriving as a delta must
    /// not cancel our own utterance.
    async fn on_speech_energy(&mut self, text: String) {
        if guards::is_echo(
            &text,
            self.echo_memory.as_deref(),
            self.cfg.echo_similarity_threshold,
        ) {
            debug!("Discarding self-echo delta");
            return;
        }
        if self.gates.tts_playback_active() {
            self.barge_in().await;
        }
        self.cancel_silence_timer();
    }

    /// Non-echo speech while our utterance is playing: cancel playback
    /// and any in-flight generation, go back to listening. A cooldown
    /// stops back-to-back triggers.
    async fn barge_in(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_barge_in {
            if now.duration_since(last) < Duration::from_millis(self.cfg.barge_in_cooldown_ms) {
                debug!("Barge-in within cooldown, ignoring");
                return;
            }
        }
        self.last_barge_in = Some(now);

        info!("Barge-in: cancelling playback");
        self.abort_generation();
        self.playback.stop_current().await;
    }

    async fn on_playback_ended(&mut self, text: String, completed: bool) {
        // Whatever just played is what a mic bleed would echo back.
        self.echo_memory = Some(guards::normalize(&text));

        if !completed {
            return;
        }

        if self.phase == Phase::Closing
            && self.closing_text.as_deref() == Some(text.as_str())
        {
            info!("Closing utterance finished, interview complete");
            self.terminate().await;
            return;
        }

        if self.phase == Phase::Asking {
            self.spawn_silence_timer();
        }
    }

    async fn on_utterance_ready(&mut self, text: String) {
        self.generation = None;

        // The TTS-active gate is enforced by the FIFO queue itself; the
        // other three gates must hold before anything may be spoken.
        if !self.gates.preinterview_ready()
            || !self.gates.recording_on()
            || !self.gates.interview_active()
        {
            debug!("Gates closed, suppressing utterance");
            return;
        }

        if guards::is_clarification(&text) {
            // Clarifications never touch the counters.
            self.history.push(HistoryTurn {
                role: Role::Interviewer,
                text: text.clone(),
            });
            self.enqueue_plain(text).await;
            return;
        }

        if self.phase == Phase::Closing {
            self.closing_text = Some(text.clone());
            self.history.push(HistoryTurn {
                role: Role::Interviewer,
                text: text.clone(),
            });
            self.send_frame(ServerFrame::Question {
                data: QuestionPayload {
                    question: text.clone(),
                    is_greeting: None,
                    is_closing: Some(true),
                    question_number: None,
                    total_questions: None,
                },
            })
            .await;
            self.enqueue_plain(text).await;
            return;
        }

        if let Some(previous) = &self.last_question {
            if guards::is_near_duplicate(&text, previous, self.cfg.duplicate_question_threshold) {
                debug!("Suppressing near-duplicate question: {:?}", text);
                return;
            }
        }

        if self.phase == Phase::Greeting {
            self.emit_greeting(text).await;
            return;
        }

        let is_followup = guards::word_count(&text) <= self.cfg.followup_word_ceiling
            && self.followups < self.cfg.max_followups
            && !self.questions.is_empty();

        if is_followup {
            self.emit_followup(text).await;
        } else {
            self.emit_main_question(text).await;
        }
    }

    async fn emit_greeting(&mut self, text: String) {
        info!("Greeting the candidate");
        self.phase = Phase::Asking;
        self.history.push(HistoryTurn {
            role: Role::Interviewer,
            text: text.clone(),
        });
        self.current_question = Some(text.clone());
        self.send_frame(ServerFrame::Question {
            data: QuestionPayload {
                question: text.clone(),
                is_greeting: Some(true),
                is_closing: None,
                question_number: None,
                total_questions: None,
            },
        })
        .await;
        self.enqueue_listening(text).await;
    }

    async fn emit_followup(&mut self, text: String) {
        self.followups += 1;
        self.stats
            .followup_count
            .store(self.followups, Ordering::SeqCst);
        info!(
            "Follow-up {}/{} for question {}",
            self.followups, self.cfg.max_followups, self.next_main_index
        );

        self.history.push(HistoryTurn {
            role: Role::Interviewer,
            text: text.clone(),
        });
        self.questions.push(text.clone());
        self.last_question = Some(text.clone());
        self.current_question = Some(text.clone());
        self.reasked = false;

        self.send_frame(ServerFrame::Question {
            data: QuestionPayload {
                question: text.clone(),
                is_greeting: None,
                is_closing: None,
                question_number: Some(self.next_main_index),
                total_questions: Some(self.cfg.total_questions),
            },
        })
        .await;
        self.enqueue_listening(text).await;
    }

    async fn emit_main_question(&mut self, text: String) {
        let index = self.next_main_index;

        if index >= self.cfg.total_questions {
            // All indices used; this utterance becomes the wrap-up.
            self.phase = Phase::Closing;
            self.spawn_generation(true);
            return;
        }

        // Monotonic-ask guard: one main question per index value, ever.
        if !self.issued_indices.insert(index) {
            warn!("Main question for index {} already issued, suppressing", index);
            return;
        }

        info!(
            "Main question {}/{}",
            index + 1,
            self.cfg.total_questions
        );
        self.next_main_index = index + 1;
        self.followups = 0;
        self.stats
            .main_question_index
            .store(self.next_main_index, Ordering::SeqCst);
        self.stats.followup_count.store(0, Ordering::SeqCst);

        self.history.push(HistoryTurn {
            role: Role::Interviewer,
            text: text.clone(),
        });
        self.questions.push(text.clone());
        self.last_question = Some(text.clone());
        self.current_question = Some(text.clone());
        self.reasked = false;

        self.send_frame(ServerFrame::Question {
            data: QuestionPayload {
                question: text.clone(),
                is_greeting: None,
                is_closing: None,
                question_number: Some(index + 1),
                total_questions: Some(self.cfg.total_questions),
            },
        })
        .await;
        self.enqueue_listening(text).await;
    }

    /// Enqueue an utterance whose completion re-opens the candidate's
    /// turn: recording resumes the moment the question finishes playing.
    async fn enqueue_listening(&mut self, text: String) {
        let gates = Arc::clone(&self.gates);
        self.playback
            .enqueue(PlaybackItem::with_on_complete(
                text,
                Box::new(move || gates.set_recording_on(true)),
            ))
            .await;
    }

    async fn enqueue_plain(&mut self, text: String) {
        self.playback.enqueue(PlaybackItem::new(text)).await;
    }

    async fn on_silence_timeout(&mut self) {
        if self.phase != Phase::Asking {
            return;
        }
        if self.answer_started.is_some() || !self.pending_answer.is_empty() {
            return;
        }
        if self.reasked {
            // One automatic re-ask per turn; after that we wait.
            return;
        }
        let Some(question) = self.current_question.clone() else {
            return;
        };

        info!("Silence window elapsed, re-asking once");
        self.reasked = true;
        self.enqueue_plain(format!("Just to repeat: {}", question)).await;
    }

    async fn on_answer_window_elapsed(&mut self) {
        self.answer_timer = None;
        if self.phase != Phase::Asking {
            return;
        }
        if self.pending_answer.is_empty() {
            self.answer_started = None;
            return;
        }
        self.finalize_answer().await;
    }

    /// The answer is complete enough to respond to. Fold it into the
    /// record and kick off the next decision.
    async fn finalize_answer(&mut self) {
        let answer = self.pending_answer.join(" ");
        self.pending_answer.clear();
        self.answer_started = None;
        self.cancel_answer_timer();
        self.cancel_silence_timer();

        self.responses.push(answer.clone());
        self.history.push(HistoryTurn {
            role: Role::Candidate,
            text: answer,
        });

        // Past the last main question (follow-ups exhausted too): wrap up.
        let closing = self.next_main_index >= self.cfg.total_questions
            && self.followups >= self.cfg.max_followups;
        if closing {
            self.phase = Phase::Closing;
        }
        self.spawn_generation(closing);
    }

    /// At most one generation in flight per session; a second request
    /// while one is pending is dropped, not queued.
    fn spawn_generation(&mut self, closing: bool) {
        if let Some(handle) = &self.generation {
            if !handle.is_finished() {
                debug!("Generation already in flight, skipping");
                return;
            }
        }

        let ctx = InterviewContext {
            language: self.language.clone(),
            candidate_name: self.candidate_name.clone(),
            history: self.history.clone(),
            main_question_index: self.next_main_index,
            total_questions: self.cfg.total_questions,
            closing,
        };
        let generator = Arc::clone(&self.generator);
        let events_tx = self.events_tx.clone();

        self.generation = Some(tokio::spawn(async move {
            let event = match generator.next_utterance(&ctx).await {
                Ok(text) => SessionEvent::UtteranceReady { text },
                Err(e) => SessionEvent::UtteranceFailed {
                    error: e.to_string(),
                },
            };
            let _ = events_tx.send(event).await;
        }));
    }

    fn spawn_answer_timer(&mut self) {
        self.cancel_answer_timer();
        let events_tx = self.events_tx.clone();
        let wait = Duration::from_millis(self.cfg.min_answer_duration_ms);
        self.answer_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = events_tx.send(SessionEvent::AnswerWindowElapsed).await;
        }));
    }

    fn spawn_silence_timer(&mut self) {
        self.cancel_silence_timer();
        let events_tx = self.events_tx.clone();
        let wait = Duration::from_millis(self.cfg.silence_reask_ms);
        self.silence_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = events_tx.send(SessionEvent::SilenceTimeout).await;
        }));
    }

    fn cancel_answer_timer(&mut self) {
        if let Some(handle) = self.answer_timer.take() {
            handle.abort();
        }
    }

    fn cancel_silence_timer(&mut self) {
        if let Some(handle) = self.silence_timer.take() {
            handle.abort();
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_answer_timer();
        self.cancel_silence_timer();
    }

    fn abort_generation(&mut self) {
        if let Some(handle) = self.generation.take() {
            handle.abort();
        }
    }

    /// Emit the single terminal control event and go permanently silent.
    async fn terminate(&mut self) {
        if self.phase == Phase::Done {
            return;
        }
        self.phase = Phase::Done;
        self.gates.set_interview_active(false);
        self.cancel_timers();
        self.abort_generation();
        self.send_frame(ServerFrame::InterviewComplete).await;
        info!("Turn machine terminal: no further events will be emitted");
    }

    async fn send_frame(&self, frame: ServerFrame) {
        if self.out_tx.send(frame).await.is_err() {
            debug!("Outbound channel closed, dropping frame");
        }
    }
}
