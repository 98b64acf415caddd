//! Door event pipeline.
//!
//! ```text
//!  raw contact ──▶ Debouncer ──▶ seq++ ──▶ capacity? ──▶ rate? ──▶ DoorEventQueue
//!   (50 ms poll)    (50 ms)                 drop          drop         │
//!                                                                      ▼
//!                                      DoorDelivery (retry slot, strict FIFO)
//! ```
//!
//! The producer ([`DoorEventPipeline`]) runs in the door task; the
//! consumer ([`DoorDelivery`]) runs in the uplink task.  They share only
//! the [`DoorEventQueue`].
//!
//! Sequence numbers are assigned when a transition is confirmed, before
//! admission, so a dropped event leaves a gap.  Enqueued events always
//! carry strictly increasing `seq`; once `u32::MAX` is used, further
//! transitions are dropped rather than wrapping back to 1.

pub mod debounce;
pub mod delivery;
pub mod queue;
pub mod rate;

use std::sync::Arc;

use log::{error, info, warn};

pub use debounce::Debouncer;
pub use delivery::{DoorDelivery, DrainReport};
pub use queue::DoorEventQueue;
pub use rate::RateWindow;

/// A confirmed door transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorEvent {
    pub is_open: bool,
    /// UTC ms when the clock is synced, else uptime ms.
    pub timestamp_ms: u64,
    pub seq: u32,
    /// Station RSSI at detection; 0 when offline.
    pub rssi: i32,
    pub uptime_ms: u64,
}

/// What one poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No confirmed transition.
    Idle,
    /// Transition confirmed before the pipeline was armed; not emitted.
    Suppressed,
    Queued(u32),
    DroppedQueueFull(u32),
    DroppedRateLimited(u32),
    /// `seq` reached `u32::MAX`; nothing more is emitted until reboot.
    SeqExhausted,
}

/// Producer side of the door pipeline.
pub struct DoorEventPipeline {
    debouncer: Debouncer,
    rate: RateWindow,
    queue: Arc<DoorEventQueue>,
    last_seq: u32,
    armed: bool,
}

impl DoorEventPipeline {
    pub fn new(queue: Arc<DoorEventQueue>, debounce_ms: u32, rate_limit_per_sec: u8) -> Self {
        Self {
            debouncer: Debouncer::new(u64::from(debounce_ms)),
            rate: RateWindow::new(rate_limit_per_sec),
            queue,
            last_seq: 0,
            armed: false,
        }
    }

    /// Start emitting events.  Called once the first valid climate reading
    /// exists so the server never sees door events from a device that has
    /// not yet reported.
    pub fn arm(&mut self) {
        if !self.armed {
            info!("Door: pipeline armed (door {})", state_label(self.debouncer.reported()));
            self.armed = true;
        }
    }

    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Last confirmed contact state.
    pub const fn door_open(&self) -> bool {
        self.debouncer.reported()
    }

    /// Feed one raw sample taken at monotonic `now_ms`.
    pub fn poll(&mut self, raw: bool, now_ms: u64, timestamp_ms: u64, rssi: i32) -> PollOutcome {
        let Some(is_open) = self.debouncer.update(raw, now_ms) else {
            return PollOutcome::Idle;
        };

        if !self.armed {
            return PollOutcome::Suppressed;
        }

        let Some(seq) = self.last_seq.checked_add(1) else {
            error!("Door: seq exhausted, dropping {} transition", state_label(is_open));
            return PollOutcome::SeqExhausted;
        };
        self.last_seq = seq;
        let event = DoorEvent {
            is_open,
            timestamp_ms,
            seq,
            rssi,
            uptime_ms: now_ms,
        };

        if self.queue.is_full() {
            warn!("Door: queue full, dropping seq={}", event.seq);
            return PollOutcome::DroppedQueueFull(event.seq);
        }
        if !self.rate.try_admit(now_ms) {
            warn!("Door: rate limit hit, dropping seq={}", event.seq);
            return PollOutcome::DroppedRateLimited(event.seq);
        }
        match self.queue.try_push(event) {
            Ok(()) => {
                info!("Door: {} seq={}", state_label(is_open), event.seq);
                PollOutcome::Queued(event.seq)
            }
            Err(ev) => {
                warn!("Door: queue full, dropping seq={}", ev.seq);
                PollOutcome::DroppedQueueFull(ev.seq)
            }
        }
    }
}

pub const fn state_label(is_open: bool) -> &'static str {
    if is_open { "OPEN" } else { "CLOSED" }
}
