use tracing::debug;

use super::Codec;
use crate::config::IngestConfig;

/// One bounded accumulation of audio chunks, handed to transcription as
/// a unit and cleared the instant it is taken.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    pub chunks: Vec<Vec<u8>>,
    pub byte_len: usize,
    /// Estimated buffered duration; meaningful only for uncompressed codecs.
    pub duration_ms: u64,
    pub codec: Codec,
    pub sample_rate: u32,
}

impl AudioWindow {
    /// Contiguous bytes of the whole window.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// Outcome of offering one chunk to the buffer.
#[derive(Debug)]
pub enum PushOutcome {
    /// Keep accumulating.
    Buffered,
    /// A soft threshold was met; window is ready for transcription.
    Ready(AudioWindow),
    /// The hard byte ceiling forced this window out regardless of
    /// thresholds or an outstanding transcription call.
    Forced(AudioWindow),
}

/// Decides, per inbound chunk, whether enough audio has accumulated to
/// justify a transcription call.
///
/// Uncompressed audio windows by estimated buffered duration; compressed
/// audio by accumulated byte count. A hard byte ceiling bounds memory
/// for both families if transcription calls stall.
pub struct IngestBuffer {
    cfg: IngestConfig,
    codec: Codec,
    sample_rate: u32,
    chunks: Vec<Vec<u8>>,
    byte_len: usize,
}

impl IngestBuffer {
    pub fn new(cfg: IngestConfig, codec: Codec, sample_rate: u32) -> Self {
        Self {
            cfg,
            codec,
            sample_rate,
            chunks: Vec::new(),
            byte_len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Estimated duration of the buffered audio, for 16-bit mono PCM.
    pub fn duration_ms(&self) -> u64 {
        if !self.codec.is_uncompressed() || self.sample_rate == 0 {
            return 0;
        }
        let bytes_per_ms = (self.sample_rate as u64 * 2) / 1000;
        if bytes_per_ms == 0 {
            return 0;
        }
        self.byte_len as u64 / bytes_per_ms
    }

    /// Offer one chunk. `allow_soft_flush` is false while a transcription
    /// call is outstanding: accumulation continues and only the hard
    /// ceiling can force a window out.
    pub fn push(&mut self, chunk: Vec<u8>, allow_soft_flush: bool) -> PushOutcome {
        self.byte_len += chunk.len();
        self.chunks.push(chunk);

        if self.byte_len >= self.cfg.hard_ceiling_bytes {
            debug!(
                "Hard ceiling hit at {} bytes, forcing window out",
                self.byte_len
            );
            return PushOutcome::Forced(self.take());
        }

        if allow_soft_flush && self.is_ready() {
            PushOutcome::Ready(self.take())
        } else {
            PushOutcome::Buffered
        }
    }

    /// The minimum window threshold has been met.
    pub fn is_ready(&self) -> bool {
        if self.codec.is_uncompressed() {
            self.duration_ms() >= self.cfg.min_window_ms
        } else {
            self.byte_len >= self.cfg.min_window_bytes
        }
    }

    /// The maximum window threshold is exceeded; happens when soft
    /// flushes were suppressed by an outstanding call. Checked when that
    /// call completes so the backlog drains immediately.
    pub fn is_overdue(&self) -> bool {
        if self.codec.is_uncompressed() {
            self.duration_ms() >= self.cfg.max_window_ms
        } else {
            self.byte_len >= self.cfg.max_window_bytes
        }
    }

    /// Take the buffered window if the minimum threshold is met.
    pub fn take_ready(&mut self) -> Option<AudioWindow> {
        if self.is_ready() {
            Some(self.take())
        } else {
            None
        }
    }

    /// Explicit flush (end of the candidate's speaking turn, or recording
    /// stopped): force an attempt even if thresholds are unmet, as long
    /// as anything is buffered.
    pub fn force_flush(&mut self) -> Option<AudioWindow> {
        if self.is_empty() {
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> AudioWindow {
        let window = AudioWindow {
            chunks: std::mem::take(&mut self.chunks),
            byte_len: self.byte_len,
            duration_ms: self.duration_ms(),
            codec: self.codec,
            sample_rate: self.sample_rate,
        };
        self.byte_len = 0;
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> IngestConfig {
        IngestConfig {
            min_window_ms: 2_500,
            max_window_ms: 10_000,
            min_window_bytes: 24_000,
            max_window_bytes: 120_000,
            hard_ceiling_bytes: 600_000,
        }
    }

    #[test]
    fn uncompressed_waits_for_min_duration() {
        // 16 kHz mono 16-bit: 32 bytes per ms; 2.5 s = 80_000 bytes.
        let mut buf = IngestBuffer::new(cfg(), Codec::Pcm16, 16_000);

        for i in 0..20 {
            let outcome = buf.push(vec![0u8; 4_000], true);
            if i < 19 {
                assert!(
                    matches!(outcome, PushOutcome::Buffered),
                    "chunk {} should only buffer",
                    i
                );
            } else {
                match outcome {
                    PushOutcome::Ready(window) => {
                        assert_eq!(window.byte_len, 80_000);
                        assert!(window.duration_ms >= 2_500);
                    }
                    other => panic!("expected Ready on chunk 20, got {:?}", other),
                }
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn compressed_windows_by_bytes() {
        let mut buf = IngestBuffer::new(cfg(), Codec::Opus, 48_000);

        assert!(matches!(buf.push(vec![0u8; 10_000], true), PushOutcome::Buffered));
        match buf.push(vec![0u8; 20_000], true) {
            PushOutcome::Ready(window) => assert_eq!(window.byte_len, 30_000),
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn soft_flush_suppressed_while_call_outstanding() {
        let mut buf = IngestBuffer::new(cfg(), Codec::Pcm16, 16_000);

        // Way past the soft thresholds, but a call is in flight.
        for _ in 0..40 {
            assert!(matches!(buf.push(vec![0u8; 4_000], false), PushOutcome::Buffered));
        }
        assert_eq!(buf.byte_len(), 160_000);
        // 5 s buffered at 16 kHz: ready and not yet overdue (10 s max).
        assert!(buf.is_ready());
        assert!(!buf.is_overdue());

        let window = buf.take_ready().expect("ready window");
        assert_eq!(window.byte_len, 160_000);
        assert!(buf.is_empty());
    }

    #[test]
    fn hard_ceiling_forces_out_regardless() {
        let small = IngestConfig {
            hard_ceiling_bytes: 12_000,
            min_window_bytes: 100_000,
            ..cfg()
        };

        let mut buf = IngestBuffer::new(small, Codec::Opus, 48_000);
        assert!(matches!(buf.push(vec![0u8; 8_000], false), PushOutcome::Buffered));
        match buf.push(vec![0u8; 8_000], false) {
            PushOutcome::Forced(window) => assert_eq!(window.byte_len, 16_000),
            other => panic!("expected Forced, got {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn force_flush_on_nonempty_only() {
        let mut buf = IngestBuffer::new(cfg(), Codec::Pcm16, 16_000);
        assert!(buf.force_flush().is_none());

        buf.push(vec![1, 2, 3, 4], true);
        let window = buf.force_flush().expect("buffered audio should flush");
        assert_eq!(window.byte_len, 4);
        assert_eq!(window.to_bytes(), vec![1, 2, 3, 4]);
        assert!(buf.force_flush().is_none());
    }
}
