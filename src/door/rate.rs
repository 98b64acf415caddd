//! Rolling one-second admission window for door events.

use heapless::Deque;

use crate::config::MAX_DOOR_RATE_PER_SEC;

const WINDOW_MS: u64 = 1000;

/// Admits at most `limit` events in any 1000 ms span.
#[derive(Debug)]
pub struct RateWindow {
    limit: usize,
    accepted: Deque<u64, MAX_DOOR_RATE_PER_SEC>,
}

impl RateWindow {
    /// `limit` is clamped to `1..=MAX_DOOR_RATE_PER_SEC`.
    pub fn new(limit: u8) -> Self {
        Self {
            limit: usize::from(limit).clamp(1, MAX_DOOR_RATE_PER_SEC),
            accepted: Deque::new(),
        }
    }

    /// Record an event at `now_ms` if the window has room.
    pub fn try_admit(&mut self, now_ms: u64) -> bool {
        while let Some(&oldest) = self.accepted.front() {
            if now_ms.saturating_sub(oldest) >= WINDOW_MS {
                self.accepted.pop_front();
            } else {
                break;
            }
        }

        if self.accepted.len() >= self.limit {
            return false;
        }
        self.accepted.push_back(now_ms).is_ok()
    }

    /// Events admitted in the window ending at the last call.
    pub fn in_window(&self) -> usize {
        self.accepted.len()
    }
}
