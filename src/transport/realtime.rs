use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use super::{InboundFrame, OutboundFrame, Transport, TransportError};

/// Events mirrored off the completion service's realtime data channel.
///
/// The engine treats this stream as an opaque pass-through: events are
/// mapped onto session events and run through the same guard logic as
/// fallback traffic before they may touch turn state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.ended")]
    SessionEnded,
    /// Streamed partial of the candidate's speech; evidence of speech
    /// energy long before a final transcript exists.
    #[serde(rename = "transcript.delta")]
    TranscriptDelta { delta: String },
    #[serde(rename = "transcript.done")]
    TranscriptDone { text: String },
    #[serde(rename = "response.started")]
    ResponseStarted,
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// The two channel halves of an established peer data channel.
///
/// The peer connection itself is negotiated between the candidate's
/// browser and the completion service; the engine only ever sees this
/// bridged event stream.
pub struct RealtimeLink {
    pub events: mpsc::Receiver<RealtimeEvent>,
    pub commands: mpsc::Sender<OutboundFrame>,
}

/// Pass-through transport over an established realtime data channel.
pub struct RealtimeTransport {
    link: Mutex<Option<RealtimeLink>>,
    commands: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    open: Arc<AtomicBool>,
}

impl RealtimeTransport {
    /// `link` is `None` when no peer channel could be established; `open`
    /// then fails with a setup error and the negotiator falls back.
    pub fn new(link: Option<RealtimeLink>) -> Self {
        Self {
            link: Mutex::new(link),
            commands: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Transport for RealtimeTransport {
    async fn open(&mut self) -> Result<mpsc::Receiver<InboundFrame>, TransportError> {
        let link = self
            .link
            .lock()
            .await
            .take()
            .ok_or_else(|| TransportError::Setup("no realtime peer channel".to_string()))?;

        let RealtimeLink { mut events, commands } = link;
        *self.commands.lock().await = Some(commands);
        self.open.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        let open = Arc::clone(&self.open);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let ended = matches!(event, RealtimeEvent::SessionEnded);
                if tx.send(InboundFrame::Realtime(event)).await.is_err() {
                    break;
                }
                if ended {
                    break;
                }
            }
            open.store(false, Ordering::SeqCst);
            let _ = tx.send(InboundFrame::Closed { code: None }).await;
        });

        info!("Realtime transport opened");
        Ok(rx)
    }

    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        let commands = self.commands.lock().await;
        let tx = commands.as_ref().ok_or(TransportError::NotOpen)?;
        tx.send(frame).await.map_err(|_| TransportError::NotOpen)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        self.commands.lock().await.take();
        self.link.lock().await.take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "realtime"
    }
}
