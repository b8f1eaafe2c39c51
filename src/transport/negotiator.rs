use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::TransportConfig;

use super::{
    InboundFrame, Outbox, OutboundFrame, ServerFrame, Transport, TransportError,
    POLICY_CLOSE_CODE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    None,
    Realtime,
    Fallback,
}

struct Inner {
    realtime: Option<Box<dyn Transport>>,
    fallback: Box<dyn Transport>,
    active: Active,
}

/// Owns one live session's connectivity end-to-end.
///
/// Prefers the realtime transport, falls back to the message-based one,
/// and recovers mid-session disconnects via bounded, jittered backoff.
/// All outbound traffic funnels through here so frames sent during a
/// blip land in the outbox and flush in order on reopen.
pub struct TransportNegotiator {
    cfg: TransportConfig,
    inner: Mutex<Inner>,
    starting: AtomicBool,
    connected: AtomicBool,
    manual: AtomicBool,
    outbox: Mutex<Outbox>,
    events_tx: mpsc::Sender<InboundFrame>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

impl TransportNegotiator {
    pub fn new(
        realtime: Option<Box<dyn Transport>>,
        fallback: Box<dyn Transport>,
        cfg: TransportConfig,
    ) -> (Arc<Self>, mpsc::Receiver<InboundFrame>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let negotiator = Arc::new(Self {
            cfg,
            inner: Mutex::new(Inner {
                realtime,
                fallback,
                active: Active::None,
            }),
            starting: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            manual: AtomicBool::new(false),
            outbox: Mutex::new(Outbox::new(512)),
            events_tx,
            heartbeat: Mutex::new(None),
            reconnect: Mutex::new(None),
        });
        (negotiator, events_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Attempt the realtime transport, then the fallback. Returns whether
    /// any transport reached connected. A concurrent `start` while one is
    /// already in flight or connected is a no-op reporting current state.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.is_connected() {
            return true;
        }
        if self.starting.swap(true, Ordering::SeqCst) {
            return self.is_connected();
        }

        let connected = self.connect_any().await;
        self.starting.store(false, Ordering::SeqCst);

        if connected {
            self.spawn_heartbeat().await;
        }
        connected
    }

    async fn connect_any(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock().await;

        if let Some(realtime) = inner.realtime.as_mut() {
            match realtime.open().await {
                Ok(rx) => {
                    inner.active = Active::Realtime;
                    drop(inner);
                    self.on_opened("realtime", rx).await;
                    return true;
                }
                Err(e) => {
                    warn!("Realtime transport failed to open: {}, falling back", e);
                }
            }
        }

        match inner.fallback.open().await {
            Ok(rx) => {
                inner.active = Active::Fallback;
                drop(inner);
                self.on_opened("fallback", rx).await;
                true
            }
            Err(e) => {
                warn!("Fallback transport failed to open: {}", e);
                inner.active = Active::None;
                false
            }
        }
    }

    async fn on_opened(self: &Arc<Self>, name: &str, rx: mpsc::Receiver<InboundFrame>) {
        info!("Connected via {} transport", name);
        self.connected.store(true, Ordering::SeqCst);
        self.flush_outbox().await;
        self.spawn_pump(rx);
    }

    fn spawn_pump(self: &Arc<Self>, mut rx: mpsc::Receiver<InboundFrame>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut close_code = None;
            while let Some(frame) = rx.recv().await {
                if let InboundFrame::Closed { code } = &frame {
                    close_code = *code;
                    break;
                }
                if this.events_tx.send(frame).await.is_err() {
                    return;
                }
            }
            this.on_transport_closed(close_code).await;
        });
    }

    async fn on_transport_closed(self: &Arc<Self>, code: Option<u16>) {
        self.connected.store(false, Ordering::SeqCst);
        {
            let mut inner = self.inner.lock().await;
            inner.active = Active::None;
        }

        if self.manual.load(Ordering::SeqCst) {
            return;
        }

        if code == Some(POLICY_CLOSE_CODE) {
            warn!("Transport closed with policy code {}, not reconnecting", POLICY_CLOSE_CODE);
            let _ = self.events_tx.send(InboundFrame::Closed { code }).await;
            return;
        }

        info!("Transport closed (code {:?}), scheduling reconnect", code);
        self.spawn_reconnect().await;
    }

    async fn spawn_reconnect(self: &Arc<Self>) {
        let mut slot = self.reconnect.lock().await;
        if slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let this = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            this.reconnect_loop().await;
        }));
    }

    /// Exponential backoff with multiplicative jitter, capped, abandoned
    /// after the attempt budget or a policy close.
    async fn reconnect_loop(self: &Arc<Self>) {
        for attempt in 1..=self.cfg.reconnect_attempts {
            let base = self
                .cfg
                .reconnect_base_ms
                .saturating_mul(1u64 << (attempt - 1).min(16))
                .min(self.cfg.reconnect_max_ms);
            let jitter: f64 = rand::thread_rng().gen_range(0.8..=1.2);
            let delay = Duration::from_millis((base as f64 * jitter) as u64);

            tokio::time::sleep(delay).await;

            if self.manual.load(Ordering::SeqCst) {
                return;
            }

            let mut inner = self.inner.lock().await;
            match inner.fallback.open().await {
                Ok(rx) => {
                    inner.active = Active::Fallback;
                    drop(inner);
                    info!("Reconnected on attempt {}", attempt);
                    self.on_opened("fallback", rx).await;
                    return;
                }
                Err(e) if !e.is_retryable() => {
                    warn!("Reconnect abandoned: {}", e);
                    break;
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                }
            }
        }

        warn!("Reconnect budget exhausted");
        let _ = self.events_tx.send(InboundFrame::Closed { code: None }).await;
    }

    /// Opportunistic liveness re-check, for network-regained or
    /// tab-visible signals. No-op while connected or after manual
    /// disconnect.
    pub async fn poke(self: &Arc<Self>) {
        if self.is_connected() || self.manual.load(Ordering::SeqCst) {
            return;
        }
        self.spawn_reconnect().await;
    }

    async fn spawn_heartbeat(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let interval = Duration::from_secs(self.cfg.heartbeat_secs);
        let mut slot = self.heartbeat.lock().await;
        if slot.is_some() {
            return;
        }
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if !this.is_connected() {
                    continue;
                }
                let ts = chrono::Utc::now().timestamp_millis();
                if let Err(e) = this.send_active(OutboundFrame::Control(ServerFrame::Ping { ts })).await {
                    warn!("Heartbeat send failed: {}", e);
                }
            }
        }));
    }

    async fn send_active(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        let inner = self.inner.lock().await;
        match inner.active {
            Active::Realtime => match inner.realtime.as_ref() {
                Some(t) => t.send(frame).await,
                None => Err(TransportError::NotOpen),
            },
            Active::Fallback => inner.fallback.send(frame).await,
            Active::None => Err(TransportError::NotOpen),
        }
    }

    /// Route a frame to the active transport, or buffer it when the
    /// transport is momentarily not open.
    async fn send_or_buffer(&self, frame: OutboundFrame) {
        if self.is_connected() {
            if let Err(e) = self.send_active(frame.clone()).await {
                warn!("Send failed ({}), buffering frame", e);
                self.outbox.lock().await.push(frame);
            }
        } else {
            self.outbox.lock().await.push(frame);
        }
    }

    async fn flush_outbox(&self) {
        let mut pending = self.outbox.lock().await.drain();
        if pending.is_empty() {
            return;
        }
        info!("Flushing {} buffered frames", pending.len());
        while !pending.is_empty() {
            if let Err(e) = self.send_active(pending[0].clone()).await {
                // Keep the unsent tail for the next reopen instead of
                // losing it.
                warn!("Outbox flush interrupted ({}), requeuing {} frames", e, pending.len());
                self.outbox.lock().await.requeue_front(pending);
                return;
            }
            pending.remove(0);
        }
    }

    pub async fn send_text(&self, text: String) {
        self.send_or_buffer(OutboundFrame::Text(text)).await;
    }

    pub async fn send_control(&self, frame: ServerFrame) {
        self.send_or_buffer(OutboundFrame::Control(frame)).await;
    }

    pub async fn send_audio_chunk(&self, bytes: Vec<u8>) {
        self.send_or_buffer(OutboundFrame::Audio(bytes)).await;
    }

    /// Tear down channels and timers. A manual disconnect also suppresses
    /// any further automatic reconnection.
    pub async fn disconnect(&self, manual: bool) {
        if manual {
            self.manual.store(true, Ordering::SeqCst);
        }
        self.connected.store(false, Ordering::SeqCst);

        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.reconnect.lock().await.take() {
            handle.abort();
        }

        let mut inner = self.inner.lock().await;
        inner.active = Active::None;
        if let Some(realtime) = inner.realtime.as_mut() {
            if let Err(e) = realtime.close().await {
                warn!("Realtime close failed: {}", e);
            }
        }
        if let Err(e) = inner.fallback.close().await {
            warn!("Fallback close failed: {}", e);
        }
        info!("Transport negotiator disconnected (manual={})", manual);
    }
}
