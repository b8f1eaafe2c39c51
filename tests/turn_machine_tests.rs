// Integration tests for the turn state machine.
//
// A scripted generator and an instant synthesizer stand in for the
// external services; the playback signal forwarding mirrors what the
// session wiring does in production, minus the trailing gate debounce.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voxhire::config::InterviewConfig;
use voxhire::llm::{InterviewContext, UtteranceGenerator};
use voxhire::playback::{PlaybackQueue, PlaybackSignal};
use voxhire::session::GateSet;
use voxhire::transport::ServerFrame;
use voxhire::tts::{SpeechSynthesizer, SynthesizedSpeech};
use voxhire::turn::{InterviewSummary, SessionEvent, TranscriptLog, TurnMachine, TurnStats};

struct ScriptedGenerator {
    script: Mutex<VecDeque<String>>,
}

impl ScriptedGenerator {
    fn new(lines: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(lines.iter().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait]
impl UtteranceGenerator for ScriptedGenerator {
    async fn next_utterance(&self, _ctx: &InterviewContext) -> Result<String> {
        let line = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "That is everything from my side, thank you.".to_string());
        Ok(line)
    }
}

struct InstantSynth;

#[async_trait]
impl SpeechSynthesizer for InstantSynth {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<SynthesizedSpeech> {
        // 50 ms of silence at 16 kHz; one paced chunk per utterance.
        Ok(SynthesizedSpeech {
            audio: vec![0u8; 1600],
            sample_rate: 16000,
        })
    }
}

struct Harness {
    events_tx: mpsc::Sender<SessionEvent>,
    out_rx: mpsc::Receiver<ServerFrame>,
    signal_rx: mpsc::Receiver<PlaybackSignal>,
    gates: Arc<GateSet>,
    stats: Arc<TurnStats>,
    machine: JoinHandle<InterviewSummary>,
}

fn test_config() -> InterviewConfig {
    InterviewConfig {
        min_answer_duration_ms: 200,
        silence_reask_ms: 5_000,
        barge_in_cooldown_ms: 100,
        ..InterviewConfig::default()
    }
}

fn spawn_machine(cfg: InterviewConfig, script: &[&str]) -> Harness {
    let gates = Arc::new(GateSet::new());
    gates.set_preinterview_ready(true);
    gates.set_recording_on(true);
    gates.set_interview_active(true);

    let stats = Arc::new(TurnStats::default());
    let (out_tx, out_rx) = mpsc::channel(64);
    let (events_tx, events_rx) = mpsc::channel(256);
    let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
    let (signal_tx, mut raw_signal_rx) = mpsc::channel::<PlaybackSignal>(64);
    let (signal_copy_tx, signal_rx) = mpsc::channel::<PlaybackSignal>(64);

    // Sink the outbound audio; these tests only care about control flow.
    tokio::spawn(async move { while audio_rx.recv().await.is_some() {} });

    // Forward playback transitions into the event queue the way the
    // session does, flipping the TTS gate without a debounce.
    {
        let gates = Arc::clone(&gates);
        let events_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(signal) = raw_signal_rx.recv().await {
                let _ = signal_copy_tx.send(signal.clone()).await;
                match signal {
                    PlaybackSignal::Started { text } => {
                        gates.set_tts_playback_active(true);
                        let _ = events_tx.send(SessionEvent::PlaybackStarted { text }).await;
                    }
                    PlaybackSignal::Ended { text, completed } => {
                        gates.set_tts_playback_active(false);
                        let _ = events_tx
                            .send(SessionEvent::PlaybackEnded { text, completed })
                            .await;
                    }
                }
            }
        });
    }

    let playback = Arc::new(PlaybackQueue::new(
        Arc::new(InstantSynth),
        "en".to_string(),
        audio_tx,
        signal_tx,
    ));

    let machine = TurnMachine::new(
        cfg,
        "en".to_string(),
        Some("Dana".to_string()),
        ScriptedGenerator::new(script),
        playback,
        Arc::clone(&gates),
        TranscriptLog::new(),
        out_tx,
        events_tx.clone(),
        Arc::clone(&stats),
    );
    let machine = tokio::spawn(machine.run(events_rx));

    Harness {
        events_tx,
        out_rx,
        signal_rx,
        gates,
        stats,
        machine,
    }
}

async fn recv_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for server frame")
        .expect("outbound channel closed")
}

async fn candidate_says(h: &Harness, text: &str) {
    h.events_tx
        .send(SessionEvent::CandidateTranscript {
            text: text.to_string(),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
}

const GREETING: &str = "Hi Dana, welcome, great to have you here today!";
const QUESTION_ONE: &str = "To start us off, could you walk me through a recent project \
     where you owned the technical direction and tell me what the hardest part turned out to be?";
const QUESTION_TWO: &str = "Switching gears a little, tell me about a disagreement with a \
     colleague about an engineering decision and how the two of you moved past it in the end.";
const ANSWER: &str = "I led the rollout of our new ingestion pipeline and the hardest part \
     was coordinating the cutover without downtime.";

#[tokio::test]
async fn greeting_then_first_question() {
    let mut h = spawn_machine(test_config(), &[GREETING, QUESTION_ONE]);
    h.events_tx.send(SessionEvent::Started).await.unwrap();

    match recv_frame(&mut h.out_rx).await {
        ServerFrame::Question { data } => {
            assert_eq!(data.question, GREETING);
            assert_eq!(data.is_greeting, Some(true));
            assert_eq!(data.question_number, None);
        }
        other => panic!("expected greeting question frame, got {:?}", other),
    }

    candidate_says(&h, ANSWER).await;

    // The candidate's words echo back out as a transcript frame.
    match recv_frame(&mut h.out_rx).await {
        ServerFrame::Transcript { data } => assert_eq!(data.text, ANSWER),
        other => panic!("expected transcript frame, got {:?}", other),
    }

    // After the minimum answer window the first main question goes out.
    match recv_frame(&mut h.out_rx).await {
        ServerFrame::Question { data } => {
            assert_eq!(data.question, QUESTION_ONE);
            assert_eq!(data.question_number, Some(1));
            assert_eq!(data.is_greeting, None);
        }
        other => panic!("expected first main question, got {:?}", other),
    }

    use std::sync::atomic::Ordering;
    assert_eq!(h.stats.main_question_index.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn self_echo_is_discarded() {
    let mut h = spawn_machine(test_config(), &[GREETING, QUESTION_ONE]);
    h.events_tx.send(SessionEvent::Started).await.unwrap();

    let _greeting = recv_frame(&mut h.out_rx).await;

    // Wait for the greeting to finish playing so echo memory is primed.
    loop {
        match tokio::time::timeout(Duration::from_secs(3), h.signal_rx.recv())
            .await
            .expect("timed out waiting for playback signal")
            .expect("signal channel closed")
        {
            PlaybackSignal::Ended { .. } => break,
            PlaybackSignal::Started { .. } => {}
        }
    }

    // The mic picked up our own greeting; it must not become an answer.
    candidate_says(&h, GREETING).await;

    let nothing = tokio::time::timeout(Duration::from_millis(300), h.out_rx.recv()).await;
    assert!(nothing.is_err(), "echoed text must produce no frame");
}

#[tokio::test]
async fn no_advance_before_minimum_answer_duration() {
    let mut h = spawn_machine(test_config(), &[GREETING, QUESTION_ONE]);
    h.events_tx.send(SessionEvent::Started).await.unwrap();
    let _greeting = recv_frame(&mut h.out_rx).await;

    candidate_says(&h, "I think the main thing was planning.").await;
    let _transcript = recv_frame(&mut h.out_rx).await;

    // Well inside the 200 ms minimum window: no question may appear.
    let premature = tokio::time::timeout(Duration::from_millis(100), h.out_rx.recv()).await;
    assert!(premature.is_err(), "question advanced before minimum answer duration");

    // After the window elapses the machine moves on.
    match recv_frame(&mut h.out_rx).await {
        ServerFrame::Question { data } => assert_eq!(data.question, QUESTION_ONE),
        other => panic!("expected first main question, got {:?}", other),
    }
}

#[tokio::test]
async fn silence_reasks_exactly_once() {
    let cfg = InterviewConfig {
        silence_reask_ms: 150,
        ..test_config()
    };
    let mut h = spawn_machine(cfg, &[GREETING]);
    h.events_tx.send(SessionEvent::Started).await.unwrap();
    let _greeting = recv_frame(&mut h.out_rx).await;

    // The candidate says nothing. Count playback starts over several
    // silence windows: the greeting itself, then exactly one re-ask.
    let mut started = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(900);
    loop {
        match tokio::time::timeout_at(deadline, h.signal_rx.recv()).await {
            Ok(Some(PlaybackSignal::Started { text })) => started.push(text),
            Ok(Some(PlaybackSignal::Ended { .. })) => {}
            Ok(None) | Err(_) => break,
        }
    }

    let reasks: Vec<_> = started
        .iter()
        .filter(|t| t.starts_with("Just to repeat:"))
        .collect();
    assert_eq!(reasks.len(), 1, "expected exactly one re-ask, got {:?}", started);
    assert!(reasks[0].contains(GREETING));
}

#[tokio::test]
async fn barge_in_cancels_playback() {
    let mut h = spawn_machine(test_config(), &[GREETING, QUESTION_ONE]);
    h.events_tx.send(SessionEvent::Started).await.unwrap();
    let _greeting = recv_frame(&mut h.out_rx).await;

    // Wait until the greeting is actually playing.
    loop {
        match tokio::time::timeout(Duration::from_secs(3), h.signal_rx.recv())
            .await
            .expect("timed out waiting for playback start")
            .expect("signal channel closed")
        {
            PlaybackSignal::Started { .. } => break,
            PlaybackSignal::Ended { .. } => {}
        }
    }

    // Candidate talks over us with something that is clearly not echo.
    candidate_says(&h, "Sorry, quick question before we start, how long is this?").await;

    // The in-flight item must end as cancelled, not completed.
    loop {
        match tokio::time::timeout(Duration::from_secs(3), h.signal_rx.recv())
            .await
            .expect("timed out waiting for playback end")
            .expect("signal channel closed")
        {
            PlaybackSignal::Ended { completed, .. } => {
                assert!(!completed, "barge-in should cancel, not complete");
                break;
            }
            PlaybackSignal::Started { .. } => {}
        }
    }
}

#[tokio::test]
async fn short_utterance_is_a_followup() {
    let mut h = spawn_machine(
        test_config(),
        &[GREETING, QUESTION_ONE, "Can you say more about the cutover?"],
    );
    h.events_tx.send(SessionEvent::Started).await.unwrap();
    let _greeting = recv_frame(&mut h.out_rx).await;

    candidate_says(&h, ANSWER).await;
    let _transcript = recv_frame(&mut h.out_rx).await;
    let _question_one = recv_frame(&mut h.out_rx).await;

    candidate_says(&h, "The cutover took three weekends to finish.").await;
    let _transcript = recv_frame(&mut h.out_rx).await;

    match recv_frame(&mut h.out_rx).await {
        ServerFrame::Question { data } => {
            // Follow-ups stay on the current question number.
            assert_eq!(data.question, "Can you say more about the cutover?");
            assert_eq!(data.question_number, Some(1));
        }
        other => panic!("expected follow-up frame, got {:?}", other),
    }

    use std::sync::atomic::Ordering;
    assert_eq!(h.stats.followup_count.load(Ordering::SeqCst), 1);
    assert_eq!(h.stats.main_question_index.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn near_duplicate_question_is_suppressed() {
    let duplicate = format!("{} ", QUESTION_ONE);
    let script = [GREETING, QUESTION_ONE, duplicate.as_str(), QUESTION_TWO];
    let mut h = spawn_machine(test_config(), &script);
    h.events_tx.send(SessionEvent::Started).await.unwrap();
    let _greeting = recv_frame(&mut h.out_rx).await;

    candidate_says(&h, ANSWER).await;
    let _transcript = recv_frame(&mut h.out_rx).await;
    let _question_one = recv_frame(&mut h.out_rx).await;

    // The next generated utterance is nearly identical to question one;
    // nothing should be emitted for it.
    candidate_says(&h, "It mostly came down to sequencing the migrations carefully.").await;
    let _transcript = recv_frame(&mut h.out_rx).await;

    let suppressed = tokio::time::timeout(Duration::from_millis(600), h.out_rx.recv()).await;
    assert!(
        suppressed.is_err(),
        "near-duplicate question must be suppressed, got {:?}",
        suppressed
    );
}

#[tokio::test]
async fn full_interview_reaches_single_terminal_event() {
    let cfg = InterviewConfig {
        total_questions: 1,
        max_followups: 0,
        ..test_config()
    };
    let closing = "Thank you so much for your time today Dana, that is everything we needed.";
    let mut h = spawn_machine(cfg, &[GREETING, QUESTION_ONE, closing]);
    h.events_tx.send(SessionEvent::Started).await.unwrap();
    let _greeting = recv_frame(&mut h.out_rx).await;

    candidate_says(&h, ANSWER).await;
    let _transcript = recv_frame(&mut h.out_rx).await;
    let _question_one = recv_frame(&mut h.out_rx).await;

    candidate_says(&h, "That covers it, happy to expand on anything.").await;
    let _transcript = recv_frame(&mut h.out_rx).await;

    match recv_frame(&mut h.out_rx).await {
        ServerFrame::Question { data } => {
            assert_eq!(data.question, closing);
            assert_eq!(data.is_closing, Some(true));
        }
        other => panic!("expected closing frame, got {:?}", other),
    }

    match recv_frame(&mut h.out_rx).await {
        ServerFrame::InterviewComplete => {}
        other => panic!("expected terminal frame, got {:?}", other),
    }

    // Terminal means terminal: the machine settles and emits nothing else.
    let summary = tokio::time::timeout(Duration::from_secs(3), h.machine)
        .await
        .expect("machine did not settle")
        .expect("machine panicked");
    assert_eq!(summary.questions.len(), 1);
    // Both the post-greeting answer and the final answer are recorded.
    assert_eq!(summary.responses.len(), 2);
    assert!(!h.gates.interview_active());

    let nothing = tokio::time::timeout(Duration::from_millis(200), h.out_rx.recv()).await;
    assert!(matches!(nothing, Ok(None) | Err(_)), "frames after terminal event");
}

#[tokio::test]
async fn shutdown_terminates_immediately() {
    let mut h = spawn_machine(test_config(), &[GREETING, QUESTION_ONE]);
    h.events_tx.send(SessionEvent::Started).await.unwrap();
    let _greeting = recv_frame(&mut h.out_rx).await;

    h.events_tx.send(SessionEvent::Shutdown).await.unwrap();

    // Everything still in flight is dropped; only the terminal frame
    // may follow.
    loop {
        match recv_frame(&mut h.out_rx).await {
            ServerFrame::InterviewComplete => break,
            ServerFrame::Question { .. } | ServerFrame::Transcript { .. } => {
                panic!("content frame after shutdown")
            }
            _ => {}
        }
    }

    let summary = tokio::time::timeout(Duration::from_secs(3), h.machine)
        .await
        .expect("machine did not settle")
        .expect("machine panicked");
    assert!(summary.responses.is_empty());
}

#[tokio::test]
async fn echoed_delta_does_not_barge_in() {
    let cfg = InterviewConfig {
        silence_reask_ms: 150,
        ..test_config()
    };
    let mut h = spawn_machine(cfg, &[GREETING]);
    h.events_tx.send(SessionEvent::Started).await.unwrap();
    let _greeting = recv_frame(&mut h.out_rx).await;

    // Let the greeting finish so echo memory holds it, then wait for
    // the silence re-ask to start playing.
    loop {
        match tokio::time::timeout(Duration::from_secs(3), h.signal_rx.recv())
            .await
            .expect("timed out waiting for re-ask to start")
            .expect("signal channel closed")
        {
            PlaybackSignal::Started { text } if text.starts_with("Just to repeat:") => break,
            _ => {}
        }
    }

    // A streamed delta of our own greeting bleeds back mid-playback.
    // It must be discarded as echo, not treated as candidate speech.
    h.events_tx
        .send(SessionEvent::SpeechEnergy {
            text: GREETING.to_string(),
        })
        .await
        .unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(3), h.signal_rx.recv())
            .await
            .expect("timed out waiting for re-ask to end")
            .expect("signal channel closed")
        {
            PlaybackSignal::Ended { completed, .. } => {
                assert!(completed, "echoed delta must not cancel our own utterance");
                break;
            }
            PlaybackSignal::Started { .. } => {}
        }
    }
}

#[tokio::test]
async fn barge_in_cooldown_swallows_second_trigger() {
    let cfg = InterviewConfig {
        barge_in_cooldown_ms: 30_000,
        ..test_config()
    };
    let mut h = spawn_machine(cfg, &[GREETING, QUESTION_ONE]);
    h.events_tx.send(SessionEvent::Started).await.unwrap();
    let _greeting = recv_frame(&mut h.out_rx).await;

    // Wait until the greeting is playing, then talk over it.
    loop {
        match tokio::time::timeout(Duration::from_secs(3), h.signal_rx.recv())
            .await
            .expect("timed out waiting for playback start")
            .expect("signal channel closed")
        {
            PlaybackSignal::Started { .. } => break,
            PlaybackSignal::Ended { .. } => {}
        }
    }
    candidate_says(&h, "Sorry, quick question before we start, how long is this?").await;

    // The first trigger cancels the greeting.
    loop {
        match tokio::time::timeout(Duration::from_secs(3), h.signal_rx.recv())
            .await
            .expect("timed out waiting for greeting cancel")
            .expect("signal channel closed")
        {
            PlaybackSignal::Ended { completed, .. } => {
                assert!(!completed, "first barge-in should cancel the greeting");
                break;
            }
            PlaybackSignal::Started { .. } => {}
        }
    }

    let _transcript = recv_frame(&mut h.out_rx).await;
    let _question_one = recv_frame(&mut h.out_rx).await;

    // Wait for the question to start playing, then talk over it again
    // inside the cooldown window.
    loop {
        match tokio::time::timeout(Duration::from_secs(3), h.signal_rx.recv())
            .await
            .expect("timed out waiting for question start")
            .expect("signal channel closed")
        {
            PlaybackSignal::Started { text } if text == QUESTION_ONE => break,
            _ => {}
        }
    }
    candidate_says(&h, "Also wanted to mention the audio cut out earlier.").await;

    // The second trigger falls inside the cooldown; the question must
    // play through to its natural end.
    loop {
        match tokio::time::timeout(Duration::from_secs(3), h.signal_rx.recv())
            .await
            .expect("timed out waiting for question end")
            .expect("signal channel closed")
        {
            PlaybackSignal::Ended { text, completed } if text == QUESTION_ONE => {
                assert!(completed, "second trigger within cooldown must not cancel");
                break;
            }
            _ => {}
        }
    }
}
