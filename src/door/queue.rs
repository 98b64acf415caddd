//! Bounded in-memory door event queue.
//!
//! An `embassy-sync` channel shared by the door poller (producer) and the
//! uplink task (consumer).  Never blocks: a full queue rejects the push.
//!
//! ```text
//! ┌──────────────┐  DoorEvent  ┌──────────────┐
//! │  door task   │────────────▶│ uplink task  │
//! │  (50 ms)     │   depth 32  │  (drain)     │
//! └──────────────┘             └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use super::DoorEvent;
use crate::config::DOOR_QUEUE_CAPACITY;

pub struct DoorEventQueue {
    channel: Channel<CriticalSectionRawMutex, DoorEvent, DOOR_QUEUE_CAPACITY>,
}

impl DoorEventQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Enqueue without blocking.  Hands the event back when full.
    pub fn try_push(&self, event: DoorEvent) -> Result<(), DoorEvent> {
        self.channel.try_send(event).map_err(|e| match e {
            embassy_sync::channel::TrySendError::Full(ev) => ev,
        })
    }

    pub fn pop(&self) -> Option<DoorEvent> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.channel.is_full()
    }

    pub const fn capacity(&self) -> usize {
        DOOR_QUEUE_CAPACITY
    }
}

impl Default for DoorEventQueue {
    fn default() -> Self {
        Self::new()
    }
}
