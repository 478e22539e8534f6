//! Deduplicating, rate-limited FIFO for contended side effects.
//!
//! Several keypads may ask for the same scarce action in one tick (toggling a
//! door). Requests are keyed by target: while a target is queued, further
//! requests for it are dropped. The queue releases at most one entry per
//! `min_interval` no matter how fast entries arrive.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAction<R, T, P> {
    pub requester: R,
    pub target: T,
    pub payload: P,
}

#[derive(Debug)]
pub struct ThrottledQueue<R, T, P> {
    entries: VecDeque<QueuedAction<R, T, P>>,
    min_interval_ms: u64,
    next_allowed: u64,
}

impl<R, T: PartialEq, P> ThrottledQueue<R, T, P> {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            min_interval_ms: min_interval.as_millis() as u64,
            next_allowed: 0,
        }
    }

    /// Append unless `target` is already waiting. Returns whether it was queued.
    pub fn enqueue(&mut self, requester: R, target: T, payload: P) -> bool {
        if self.entries.iter().any(|e| e.target == target) {
            trace!("target already queued, dropping duplicate request");
            return false;
        }
        self.entries.push_back(QueuedAction {
            requester,
            target,
            payload,
        });
        true
    }

    /// Pop the head if the interval since the last release has elapsed.
    pub fn drain(&mut self, now: u64) -> Option<QueuedAction<R, T, P>> {
        if self.entries.is_empty() || now < self.next_allowed {
            return None;
        }
        let entry = self.entries.pop_front()?;
        self.next_allowed = now.saturating_add(self.min_interval_ms);
        Some(entry)
    }

    pub fn is_queued(&self, target: &T) -> bool {
        self.entries.iter().any(|e| &e.target == target)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
