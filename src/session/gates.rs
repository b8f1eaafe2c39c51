use std::sync::atomic::{AtomicBool, Ordering};

/// The four readiness flags guarding interviewer speech.
///
/// Mutated by transport events and playback callbacks; the turn
/// machine's decision step only ever reads them.
#[derive(Debug, Default)]
pub struct GateSet {
    preinterview_ready: AtomicBool,
    recording_on: AtomicBool,
    interview_active: AtomicBool,
    tts_playback_active: AtomicBool,
}

impl GateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preinterview_ready(&self) -> bool {
        self.preinterview_ready.load(Ordering::SeqCst)
    }

    pub fn recording_on(&self) -> bool {
        self.recording_on.load(Ordering::SeqCst)
    }

    pub fn interview_active(&self) -> bool {
        self.interview_active.load(Ordering::SeqCst)
    }

    pub fn tts_playback_active(&self) -> bool {
        self.tts_playback_active.load(Ordering::SeqCst)
    }

    pub fn set_preinterview_ready(&self, v: bool) {
        self.preinterview_ready.store(v, Ordering::SeqCst);
    }

    pub fn set_recording_on(&self, v: bool) {
        self.recording_on.store(v, Ordering::SeqCst);
    }

    pub fn set_interview_active(&self, v: bool) {
        self.interview_active.store(v, Ordering::SeqCst);
    }

    pub fn set_tts_playback_active(&self, v: bool) {
        self.tts_playback_active.store(v, Ordering::SeqCst);
    }
}
