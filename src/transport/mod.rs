//! Session transports and the negotiator that owns them
//!
//! Two interchangeable transports sit behind one [`Transport`] trait:
//! - [`RealtimeTransport`]: low-latency data channel, a pass-through of
//!   completion-service realtime events
//! - [`FallbackTransport`]: message-based WebSocket channel carrying the
//!   JSON wire schema plus binary audio frames
//!
//! The [`TransportNegotiator`] establishes exactly one live session,
//! preferring realtime, recovering via the fallback with bounded backoff.

mod fallback;
mod negotiator;
mod outbox;
mod realtime;
pub mod wire;

pub use fallback::{FallbackHandle, FallbackTransport, SocketHalves};
pub use negotiator::TransportNegotiator;
pub use outbox::Outbox;
pub use realtime::{RealtimeEvent, RealtimeLink, RealtimeTransport};
pub use wire::{ClientFrame, QuestionPayload, ServerFrame, Speaker, TranscriptPayload};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Close code signalling a policy/authorization failure; never retried.
pub const POLICY_CLOSE_CODE: u16 = 1008;

/// Frames flowing from a transport into the session.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Control(ClientFrame),
    Audio(Vec<u8>),
    Realtime(RealtimeEvent),
    /// The underlying connection went away; carries the close code if any.
    Closed { code: Option<u16> },
}

/// Frames the session hands to whichever transport is active.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Control(ServerFrame),
    /// Plain text payload; the realtime channel forwards it to the
    /// completion service, the fallback writes it as a bare text message.
    Text(String),
    Audio(Vec<u8>),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("transport is not open")]
    NotOpen,
    #[error("peer closed the connection (code {code:?})")]
    Closed { code: Option<u16> },
    #[error("close code {0} signals a policy failure")]
    PolicyClose(u16),
    #[error("timed out waiting for the peer")]
    Timeout,
}

impl TransportError {
    /// Policy closes must never be retried; everything else may be.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::PolicyClose(_))
    }
}

/// One live channel to the candidate's client.
///
/// Shaped like an audio backend: `open` hands back the receiver inbound
/// frames arrive on, `close` tears the channel down.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open (or re-open) the transport.
    ///
    /// Returns the channel receiver that will receive inbound frames. The
    /// receiver yields a final [`InboundFrame::Closed`] when the peer goes
    /// away, then ends.
    async fn open(&mut self) -> Result<mpsc::Receiver<InboundFrame>, TransportError>;

    /// Send a frame to the peer.
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError>;

    /// Tear the transport down.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the transport currently has a live peer.
    fn is_open(&self) -> bool;

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}
