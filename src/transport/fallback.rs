use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use super::{InboundFrame, OutboundFrame, Transport, TransportError};

/// Channel halves handed over by the WebSocket pump when a client
/// attaches (or re-attaches) to a session.
pub struct SocketHalves {
    /// Frames the transport wants written to the socket.
    pub to_socket: mpsc::Sender<OutboundFrame>,
    /// Frames the pump decoded off the socket.
    pub from_socket: mpsc::Receiver<InboundFrame>,
}

/// Attachment handle the HTTP layer uses to plug a live socket into a
/// session's fallback transport.
#[derive(Clone)]
pub struct FallbackHandle {
    attach_tx: mpsc::Sender<SocketHalves>,
}

impl FallbackHandle {
    /// Hand a freshly-upgraded socket to the transport. Fails if the
    /// session is gone.
    pub async fn attach(&self, halves: SocketHalves) -> Result<(), TransportError> {
        self.attach_tx
            .send(halves)
            .await
            .map_err(|_| TransportError::Setup("session is gone".to_string()))
    }
}

/// Message-based fallback transport.
///
/// `open` waits (bounded) for a client socket to attach; the reconnect
/// loop in the negotiator re-calls `open` so a candidate whose network
/// blipped can re-attach mid-interview and keep the same session state.
pub struct FallbackTransport {
    attach_rx: mpsc::Receiver<SocketHalves>,
    handle: FallbackHandle,
    to_socket: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    open: Arc<AtomicBool>,
    attach_timeout: Duration,
}

impl FallbackTransport {
    pub fn new(attach_timeout: Duration) -> Self {
        let (attach_tx, attach_rx) = mpsc::channel(1);
        Self {
            attach_rx,
            handle: FallbackHandle { attach_tx },
            to_socket: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            attach_timeout,
        }
    }

    pub fn handle(&self) -> FallbackHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    async fn open(&mut self) -> Result<mpsc::Receiver<InboundFrame>, TransportError> {
        let halves = tokio::time::timeout(self.attach_timeout, self.attach_rx.recv())
            .await
            .map_err(|_| TransportError::Timeout)?
            .ok_or_else(|| TransportError::Setup("attach channel closed".to_string()))?;

        let SocketHalves {
            to_socket,
            mut from_socket,
        } = halves;

        *self.to_socket.lock().await = Some(to_socket);
        self.open.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        let open = Arc::clone(&self.open);

        // Forward socket frames, flipping the open flag the moment the
        // peer disappears so sends start landing in the outbox.
        tokio::spawn(async move {
            let mut close_code = None;
            while let Some(frame) = from_socket.recv().await {
                if let InboundFrame::Closed { code } = &frame {
                    close_code = *code;
                    break;
                }
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            open.store(false, Ordering::SeqCst);
            let _ = tx.send(InboundFrame::Closed { code: close_code }).await;
        });

        info!("Fallback transport opened");
        Ok(rx)
    }

    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let to_socket = self.to_socket.lock().await;
        let tx = to_socket.as_ref().ok_or(TransportError::NotOpen)?;
        tx.send(frame).await.map_err(|_| TransportError::NotOpen)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        self.to_socket.lock().await.take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
