//! Door contact debouncer.
//!
//! Three words of state, O(1) per poll, no allocation:
//!
//! | Field             | Meaning                                      |
//! |-------------------|----------------------------------------------|
//! | `stable`          | Last raw value seen                          |
//! | `stable_since_ms` | When `stable` last changed                   |
//! | `reported`        | Last value emitted as a confirmed transition |
//!
//! A transition is confirmed once the raw value has held for the debounce
//! window and differs from the last reported value.  Toggling faster than
//! the window never confirms anything.

/// Debounce filter for a boolean contact.  Starts as "closed since boot".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debouncer {
    window_ms: u64,
    stable: bool,
    stable_since_ms: u64,
    reported: bool,
}

impl Debouncer {
    pub const fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            stable: false,
            stable_since_ms: 0,
            reported: false,
        }
    }

    /// Feed one raw sample.  Returns the new state on a confirmed transition.
    pub fn update(&mut self, raw: bool, now_ms: u64) -> Option<bool> {
        if raw != self.stable {
            self.stable = raw;
            self.stable_since_ms = now_ms;
            return None;
        }

        let held = now_ms.saturating_sub(self.stable_since_ms);
        if held >= self.window_ms && raw != self.reported {
            self.reported = raw;
            return Some(raw);
        }
        None
    }

    /// Last confirmed state.
    pub const fn reported(&self) -> bool {
        self.reported
    }
}
