//! Fixed-window send limiter, one window per participant.
//!
//! Owned by a single room actor, so plain `HashMap` state is enough.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ws::ParticipantId;

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct SendRateLimiter {
    max_per_window: u32,
    window: Duration,
    windows: HashMap<ParticipantId, Window>,
}

impl SendRateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            windows: HashMap::new(),
        }
    }

    /// Count one send at `now`. False when the participant is over budget.
    pub fn try_acquire(&mut self, participant: &ParticipantId, now: Instant) -> bool {
        let window = self
            .windows
            .entry(participant.clone())
            .or_insert(Window { started: now, count: 0 });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_per_window {
            return false;
        }
        window.count += 1;
        true
    }

    pub fn forget(&mut self, participant: &ParticipantId) {
        self.windows.remove(participant);
    }
}
