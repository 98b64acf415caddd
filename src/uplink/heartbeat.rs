//! Heartbeat scheduling with exponential backoff.
//!
//! | Outcome  | Next interval                  |
//! |----------|--------------------------------|
//! | success  | base (10 s)                    |
//! | failure  | previous × 2, capped (600 s)   |
//!
//! The server marks a device offline after about three missed base
//! intervals, so the base must stay short.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSchedule {
    base_ms: u64,
    max_ms: u64,
    interval_ms: u64,
    last_attempt_ms: Option<u64>,
}

impl HeartbeatSchedule {
    pub fn new(base_secs: u32, max_secs: u32) -> Self {
        let base_ms = u64::from(base_secs.max(1)) * 1000;
        let max_ms = (u64::from(max_secs) * 1000).max(base_ms);
        Self {
            base_ms,
            max_ms,
            interval_ms: base_ms,
            last_attempt_ms: None,
        }
    }

    /// Current wait between attempts.
    pub const fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// True when no attempt was made yet or the interval has elapsed.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_attempt_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.interval_ms)
    }

    /// Back to the base interval with an attempt due now.  Used when the
    /// link returns, since attempts skipped offline say nothing about the API.
    pub fn restart(&mut self) {
        self.interval_ms = self.base_ms;
        self.last_attempt_ms = None;
    }

    /// Record an attempt made at `now_ms` and adjust the interval.
    pub fn record(&mut self, now_ms: u64, success: bool) {
        self.last_attempt_ms = Some(now_ms);
        self.interval_ms = if success {
            self.base_ms
        } else {
            self.interval_ms.saturating_mul(2).min(self.max_ms)
        };
    }
}
