//! Hotkey spam detection: too many triggers in a short window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const SPAM_WINDOW: Duration = Duration::from_millis(1500);
pub const SPAM_TRIGGERS: usize = 3;

#[derive(Debug)]
pub struct SpamGuard {
    window: Duration,
    limit: usize,
    recent: VecDeque<Instant>,
}

impl Default for SpamGuard {
    fn default() -> Self {
        Self::new(SPAM_WINDOW, SPAM_TRIGGERS)
    }
}

impl SpamGuard {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            recent: VecDeque::with_capacity(limit),
        }
    }

    /// Record a trigger at `now`. True when it completes a burst of
    /// `limit` triggers inside the window.
    pub fn record(&mut self, now: Instant) -> bool {
        self.recent.push_back(now);
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.len() >= self.limit
    }
}
