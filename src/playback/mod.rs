//! Sequential speech playback
//!
//! One synthesized utterance plays at a time, in strict FIFO order.
//! `stop_current` exists for barge-in; completion callbacks drive the
//! speak → finish → listen causal chain.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::tts::SpeechSynthesizer;

/// Called back on natural completion of an item. Not invoked when the
/// item is cancelled mid-play.
pub type OnComplete = Box<dyn FnOnce() + Send>;

pub struct PlaybackItem {
    pub text: String,
    pub on_complete: Option<OnComplete>,
}

impl PlaybackItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            on_complete: None,
        }
    }

    pub fn with_on_complete(text: impl Into<String>, on_complete: OnComplete) -> Self {
        Self {
            text: text.into(),
            on_complete: Some(on_complete),
        }
    }
}

/// Start/end transitions, so the TTS-active gate can track reality.
#[derive(Debug, Clone)]
pub enum PlaybackSignal {
    Started { text: String },
    Ended { text: String, completed: bool },
}

enum QueueCmd {
    Enqueue(PlaybackItem),
    StopCurrent,
    Destroy,
}

/// FIFO playback queue backed by a single worker task.
pub struct PlaybackQueue {
    cmd_tx: mpsc::Sender<QueueCmd>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackQueue {
    /// `audio_tx` receives paced PCM chunks for the client; `signal_tx`
    /// receives start/end transitions.
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        language: String,
        audio_tx: mpsc::Sender<Vec<u8>>,
        signal_tx: mpsc::Sender<PlaybackSignal>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let worker = tokio::spawn(run_worker(
            cmd_rx,
            synthesizer,
            language,
            audio_tx,
            signal_tx,
        ));
        Self {
            cmd_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub async fn enqueue(&self, item: PlaybackItem) {
        if self.cmd_tx.send(QueueCmd::Enqueue(item)).await.is_err() {
            warn!("Playback queue is gone, dropping utterance");
        }
    }

    /// Cancel the in-flight item and advance to the next queued one.
    pub async fn stop_current(&self) {
        let _ = self.cmd_tx.send(QueueCmd::StopCurrent).await;
    }

    /// Full teardown: cancel outstanding work, clear the queue, stop the
    /// worker.
    pub async fn destroy(&self) {
        let _ = self.cmd_tx.send(QueueCmd::Destroy).await;
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Playback worker panicked: {}", e);
                }
            }
        }
    }
}

async fn run_worker(
    mut cmd_rx: mpsc::Receiver<QueueCmd>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    language: String,
    audio_tx: mpsc::Sender<Vec<u8>>,
    signal_tx: mpsc::Sender<PlaybackSignal>,
) {
    let mut queue: VecDeque<PlaybackItem> = VecDeque::new();

    'outer: loop {
        let item = match queue.pop_front() {
            Some(item) => item,
            None => match cmd_rx.recv().await {
                Some(QueueCmd::Enqueue(item)) => item,
                Some(QueueCmd::StopCurrent) => continue, // nothing playing
                Some(QueueCmd::Destroy) | None => break,
            },
        };

        let text = item.text.clone();
        let _ = signal_tx
            .send(PlaybackSignal::Started { text: text.clone() })
            .await;

        let play = play_one(&text, &language, synthesizer.as_ref(), &audio_tx);
        tokio::pin!(play);

        let mut completed = false;
        let mut destroyed = false;
        loop {
            tokio::select! {
                done = &mut play => {
                    completed = done;
                    break;
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(QueueCmd::Enqueue(next)) => queue.push_back(next),
                    Some(QueueCmd::StopCurrent) => break,
                    Some(QueueCmd::Destroy) | None => {
                        destroyed = true;
                        break;
                    }
                },
            }
        }

        if completed {
            if let Some(on_complete) = item.on_complete {
                on_complete();
            }
        }
        let _ = signal_tx
            .send(PlaybackSignal::Ended { text: text.clone(), completed })
            .await;

        if destroyed {
            queue.clear();
            break 'outer;
        }
    }

    info!("Playback worker stopped");
}

/// Synthesize one utterance and stream it out in ~100 ms paced chunks,
/// so cancellation lands fast and the client never gets a burst to
/// buffer. Returns whether playback ran to completion.
async fn play_one(
    text: &str,
    language: &str,
    synthesizer: &dyn SpeechSynthesizer,
    audio_tx: &mpsc::Sender<Vec<u8>>,
) -> bool {
    let speech = match synthesizer.synthesize(text, language).await {
        Ok(speech) => speech,
        Err(e) => {
            warn!("Synthesis failed: {}", e);
            return false;
        }
    };

    let bytes_per_chunk = ((speech.sample_rate as usize * 2) / 10).max(2);
    for chunk in speech.audio.chunks(bytes_per_chunk) {
        if audio_tx.send(chunk.to_vec()).await.is_err() {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    true
}
