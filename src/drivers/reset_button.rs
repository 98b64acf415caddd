//! Two-step factory reset sequencer.
//!
//! ## Sequence
//!
//! | Step | Condition                                   | Next state      |
//! |------|---------------------------------------------|-----------------|
//! | 1    | BOOT pressed (edge)                         | `BootPressed`   |
//! | 2    | RESET pressed (edge) within the boot window | `ResetPressing` |
//! | 2'   | boot window expires                         | `Idle`          |
//! | 3    | RESET held for the hold time                | `Triggered`     |
//! | 3'   | RESET released early                        | `Idle`          |
//!
//! ## LED feedback
//!
//! Slow 500 ms blink while waiting for RESET; while RESET is held the
//! blink speeds up from 200 ms to 50 ms, then stays solid once the hold
//! time is reached.
//!
//! `update()` returns `true` exactly once, on entering `Triggered`.  The
//! caller wipes provisioning and restarts; the sequencer stays latched.

use log::{info, warn};

const SLOW_BLINK_MS: u64 = 500;
const FAST_BLINK_START_MS: u64 = 200;
const FAST_BLINK_END_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    Idle,
    BootPressed { since_ms: u64 },
    ResetPressing { since_ms: u64 },
    Triggered,
}

pub struct ResetSequencer {
    boot_window_ms: u64,
    hold_ms: u64,
    state: ResetState,
    boot_was_pressed: bool,
    reset_was_pressed: bool,
}

impl ResetSequencer {
    pub fn new(boot_window_ms: u32, hold_ms: u32) -> Self {
        Self {
            boot_window_ms: u64::from(boot_window_ms),
            hold_ms: u64::from(hold_ms),
            state: ResetState::Idle,
            boot_was_pressed: false,
            reset_was_pressed: false,
        }
    }

    pub const fn state(&self) -> ResetState {
        self.state
    }

    /// Sample both buttons at `now_ms`.  `true` once, when the sequence
    /// completes.
    pub fn update(&mut self, boot_pressed: bool, reset_pressed: bool, now_ms: u64) -> bool {
        let boot_edge = boot_pressed && !self.boot_was_pressed;
        let reset_edge = reset_pressed && !self.reset_was_pressed;
        self.boot_was_pressed = boot_pressed;
        self.reset_was_pressed = reset_pressed;

        match self.state {
            ResetState::Idle => {
                if boot_edge {
                    info!(
                        "Reset: BOOT pressed, press and hold RESET within {} s for factory reset",
                        self.boot_window_ms / 1000
                    );
                    self.state = ResetState::BootPressed { since_ms: now_ms };
                }
                false
            }
            ResetState::BootPressed { since_ms } => {
                if now_ms.saturating_sub(since_ms) > self.boot_window_ms {
                    info!("Reset: no RESET press within window, cancelled");
                    self.state = ResetState::Idle;
                } else if reset_edge {
                    info!("Reset: RESET pressed, hold {} ms", self.hold_ms);
                    self.state = ResetState::ResetPressing { since_ms: now_ms };
                }
                false
            }
            ResetState::ResetPressing { since_ms } => {
                if !reset_pressed {
                    info!(
                        "Reset: RESET released after {} ms, cancelled",
                        now_ms.saturating_sub(since_ms)
                    );
                    self.state = ResetState::Idle;
                    return false;
                }
                if now_ms.saturating_sub(since_ms) >= self.hold_ms {
                    warn!("Reset: factory reset triggered");
                    self.state = ResetState::Triggered;
                    return true;
                }
                false
            }
            ResetState::Triggered => false,
        }
    }

    /// Milliseconds left to press RESET, while waiting for it.
    pub fn boot_window_remaining(&self, now_ms: u64) -> Option<u64> {
        match self.state {
            ResetState::BootPressed { since_ms } => {
                Some(self.boot_window_ms.saturating_sub(now_ms.saturating_sub(since_ms)))
            }
            _ => None,
        }
    }

    /// Feedback LED level for `now_ms`.
    pub fn indicator(&self, now_ms: u64) -> bool {
        match self.state {
            ResetState::Idle => false,
            ResetState::BootPressed { since_ms } => {
                (now_ms.saturating_sub(since_ms) / SLOW_BLINK_MS) % 2 == 0
            }
            ResetState::ResetPressing { since_ms } => {
                let held = now_ms.saturating_sub(since_ms);
                if held >= self.hold_ms {
                    return true;
                }
                let span = FAST_BLINK_START_MS - FAST_BLINK_END_MS;
                let period = FAST_BLINK_START_MS - held * span / self.hold_ms.max(1);
                (held / period.max(1)) % 2 == 0
            }
            ResetState::Triggered => true,
        }
    }

    /// Back to `Idle`, forgetting any partial sequence.
    pub fn reset(&mut self) {
        self.state = ResetState::Idle;
    }
}
