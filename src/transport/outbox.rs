use std::collections::VecDeque;
use tracing::warn;

use super::OutboundFrame;

/// Pending frames buffered while the active transport is momentarily
/// closed; flushed in order once it reopens.
pub struct Outbox {
    queue: VecDeque<OutboundFrame>,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Buffer a frame. Oldest frames drop first once the cap is hit;
    /// stale audio is worthless after a reconnect anyway.
    pub fn push(&mut self, frame: OutboundFrame) {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            warn!("Outbox full, dropping oldest buffered frame");
        }
        self.queue.push_back(frame);
    }

    /// Take everything, in arrival order.
    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        self.queue.drain(..).collect()
    }

    /// Put an unsent remainder back at the head, preserving its order
    /// ahead of anything buffered since the drain.
    pub fn requeue_front(&mut self, frames: Vec<OutboundFrame>) {
        for frame in frames.into_iter().rev() {
            self.queue.push_front(frame);
        }
        while self.queue.len() > self.capacity {
            self.queue.pop_back();
            warn!("Outbox full while requeuing, dropping newest buffered frame");
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
