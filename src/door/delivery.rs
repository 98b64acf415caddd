//! In-order door event delivery with a single retry slot.
//!
//! A failed event parks in the retry slot and blocks everything queued
//! behind it until it goes through, so the server never sees events out
//! of order.
//!
//! Deep backlogs are sent as batches ([`DoorDelivery::drain_batch`]).  A
//! failed batch is held whole and goes out again before anything else.

use log::{debug, warn};

use super::DoorEvent;
use super::queue::DoorEventQueue;
use crate::config::DOOR_BATCH_MAX;

pub type DoorBatch = heapless::Vec<DoorEvent, DOOR_BATCH_MAX>;

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub delivered: usize,
    /// A send failed; the event is held for the next pass.
    pub blocked: bool,
}

/// Consumer side of the door pipeline.  Owned by the uplink task.
#[derive(Debug, Default)]
pub struct DoorDelivery {
    retry: Option<DoorEvent>,
    held: DoorBatch,
}

impl DoorDelivery {
    pub const fn new() -> Self {
        Self {
            retry: None,
            held: heapless::Vec::new(),
        }
    }

    /// The event awaiting redelivery, if any.
    pub fn pending_retry(&self) -> Option<&DoorEvent> {
        self.retry.as_ref()
    }

    /// A failed batch is waiting; only `drain_batch` may run next.
    pub fn holds_batch(&self) -> bool {
        !self.held.is_empty()
    }

    /// Deliver the retry slot first, then the queue head, until the queue
    /// empties or a send fails.
    pub fn drain<F>(&mut self, queue: &DoorEventQueue, mut send: F) -> DrainReport
    where
        F: FnMut(&DoorEvent) -> bool,
    {
        let mut report = DrainReport::default();

        loop {
            let event = match self.retry.take() {
                Some(ev) => ev,
                None => match queue.pop() {
                    Some(ev) => ev,
                    None => break,
                },
            };

            if send(&event) {
                debug!("Door: delivered seq={}", event.seq);
                report.delivered += 1;
            } else {
                warn!("Door: delivery of seq={} failed, holding for retry", event.seq);
                self.retry = Some(event);
                report.blocked = true;
                break;
            }
        }

        report
    }

    /// Batch variant of [`drain`](Self::drain).  `send` returns how many
    /// events of the batch reached the server, `None` on failure.  A batch
    /// counts as delivered when `send` reports at least one event.
    pub fn drain_batch<F>(&mut self, queue: &DoorEventQueue, mut send: F) -> DrainReport
    where
        F: FnMut(&[DoorEvent]) -> Option<usize>,
    {
        let mut report = DrainReport::default();

        loop {
            let batch = if self.held.is_empty() {
                self.next_batch(queue)
            } else {
                core::mem::take(&mut self.held)
            };
            if batch.is_empty() {
                break;
            }

            match send(&batch) {
                Some(n) if n > 0 => {
                    if n < batch.len() {
                        warn!(
                            "Door: batch seq={}..{} partially delivered ({}/{})",
                            batch[0].seq,
                            batch[batch.len() - 1].seq,
                            n,
                            batch.len()
                        );
                    }
                    report.delivered += n;
                }
                _ => {
                    warn!("Door: batch of {} failed, holding for retry", batch.len());
                    self.held = batch;
                    report.blocked = true;
                    break;
                }
            }
        }

        report
    }

    fn next_batch(&mut self, queue: &DoorEventQueue) -> DoorBatch {
        let mut batch = DoorBatch::new();
        if let Some(ev) = self.retry.take() {
            let _ = batch.push(ev);
        }
        while !batch.is_full() {
            match queue.pop() {
                Some(ev) => {
                    let _ = batch.push(ev);
                }
                None => break,
            }
        }
        batch
    }
}
