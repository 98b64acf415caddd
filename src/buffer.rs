//! Persistent offline reading buffer.
//!
//! A bounded FIFO of serialized readings that survives power loss and
//! network outages.  Each record occupies one of `N` fixed NVS slots; the
//! ring position lives in three persisted counters.
//!
//! ```text
//!   namespace "databuffer"
//!   ┌────────┬────────┬────────┬─────┬──────────┐
//!   │ item0  │ item1  │ item2  │ ... │ item{N-1}│   slot = (head + i) % N
//!   └────────┴────────┴────────┴─────┴──────────┘
//!   head ─▶ oldest      tail ─▶ next free      count = live records
//! ```
//!
//! Index arithmetic is confined to [`RingIndex`], which only exposes
//! `push`/`pop`/`peek`/`len`.  The ring is rebuilt from `head` and `count`;
//! `tail` is derived and only range-checked on load.
//!
//! | Operation | Write order                         | Torn state on reload          |
//! |-----------|-------------------------------------|-------------------------------|
//! | `add`     | slot, `count`, `tail`               | orphaned slot, overwritten later |
//! | `remove`  | `head`, `count`, then slot deletes  | trailing gap, trimmed on load |
//!
//! Only counters outside `[0, N]` reset the buffer.

use log::{info, warn};

use crate::app::ports::StoragePort;

pub const BUFFER_NAMESPACE: &str = "databuffer";
const KEY_COUNT: &str = "count";
const KEY_HEAD: &str = "head";
const KEY_TAIL: &str = "tail";

// ───────────────────────────────────────────────────────────────
// Ring index
// ───────────────────────────────────────────────────────────────

/// Bounds-checked head/tail/len arithmetic for a ring of `N` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingIndex<const N: usize> {
    head: usize,
    tail: usize,
    len: usize,
}

impl<const N: usize> RingIndex<N> {
    pub const fn new() -> Self {
        Self { head: 0, tail: 0, len: 0 }
    }

    /// Rebuild from a persisted head and length.  `None` when either is
    /// out of range.
    pub fn from_raw(head: usize, len: usize) -> Option<Self> {
        if N == 0 || head >= N || len > N {
            return None;
        }
        Some(Self {
            head,
            tail: (head + len) % N,
            len,
        })
    }

    /// Drop the newest slot without touching the head.
    fn truncate_last(&mut self) {
        if self.len > 0 {
            self.len -= 1;
            self.tail = (self.tail + N - 1) % N;
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn is_full(&self) -> bool {
        self.len == N
    }

    pub const fn head(&self) -> usize {
        self.head
    }

    pub const fn tail(&self) -> usize {
        self.tail
    }

    /// Claim the next free slot.  `None` when full.
    pub fn push(&mut self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let slot = self.tail;
        self.tail = (self.tail + 1) % N;
        self.len += 1;
        Some(slot)
    }

    /// Release the oldest slot.  `None` when empty.
    pub fn pop(&mut self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let slot = self.head;
        self.head = (self.head + 1) % N;
        self.len -= 1;
        Some(slot)
    }

    /// Physical slot of logical position `i` (0 = oldest).
    pub fn peek(&self, i: usize) -> Option<usize> {
        (i < self.len).then(|| (self.head + i) % N)
    }
}

// ───────────────────────────────────────────────────────────────
// Reading buffer
// ───────────────────────────────────────────────────────────────

/// Bounded FIFO of serialized reading records over a [`StoragePort`].
///
/// One producer (capture task) and one consumer (uplink task) share it
/// behind a mutex; the lock is never held across a transport call.
pub struct ReadingBuffer<S: StoragePort, const N: usize> {
    storage: S,
    ring: RingIndex<N>,
}

impl<S: StoragePort, const N: usize> ReadingBuffer<S, N> {
    /// Load counters from storage.  Counters outside `[0, N]` reset the
    /// buffer to empty; a write torn by power loss is repaired instead.
    pub fn new(storage: S) -> Self {
        let mut buffer = Self {
            storage,
            ring: RingIndex::new(),
        };

        let count = buffer.load_counter(KEY_COUNT);
        let head = buffer.load_counter(KEY_HEAD);
        let tail = buffer.load_counter(KEY_TAIL);

        let restored = if tail < N { RingIndex::from_raw(head, count) } else { None };
        let Some(ring) = restored else {
            warn!(
                "Buffer: corrupt counters (count={}, head={}, tail={}), resetting",
                count, head, tail
            );
            buffer.persist_counters();
            return buffer;
        };

        buffer.ring = ring;
        while let Some(slot) = buffer.ring.peek(buffer.ring.len().wrapping_sub(1)) {
            if buffer.slot_present(slot) {
                break;
            }
            buffer.ring.truncate_last();
        }
        if buffer.ring.len() != count || buffer.ring.tail() != tail {
            warn!(
                "Buffer: repaired torn counters (count {}->{}, tail {}->{})",
                count,
                buffer.ring.len(),
                tail,
                buffer.ring.tail()
            );
            buffer.persist_counters();
        }
        info!("Buffer: restored {} readings (head={})", buffer.ring.len(), head);
        buffer
    }

    /// Append a record.  `false` when the buffer is full or the slot write
    /// failed; the record is dropped and existing contents are untouched.
    pub fn add(&mut self, record: &str) -> bool {
        let mut next = self.ring;
        let Some(slot) = next.push() else {
            warn!("Buffer: full ({} readings), dropping record", N);
            return false;
        };

        if let Err(e) = self.storage.put(BUFFER_NAMESPACE, &slot_key(slot), record) {
            warn!("Buffer: slot {} write failed: {}", slot, e);
            return false;
        }

        self.ring = next;
        self.store_counter(KEY_COUNT, self.ring.len());
        self.store_counter(KEY_TAIL, self.ring.tail());
        true
    }

    /// Record at logical position `i` (0 = oldest).
    pub fn get(&self, i: usize) -> Option<String> {
        let slot = self.ring.peek(i)?;
        match self.storage.get(BUFFER_NAMESPACE, &slot_key(slot)) {
            Ok(value) => value,
            Err(e) => {
                warn!("Buffer: slot {} read failed: {}", slot, e);
                None
            }
        }
    }

    /// Drop the `n` oldest records.  `false` (and no change) when `n` is
    /// zero or exceeds the current count.
    pub fn remove(&mut self, n: usize) -> bool {
        if n == 0 || n > self.ring.len() {
            return false;
        }
        let released: Vec<usize> = (0..n).filter_map(|_| self.ring.pop()).collect();
        self.store_counter(KEY_HEAD, self.ring.head());
        self.store_counter(KEY_COUNT, self.ring.len());
        for slot in released {
            if let Err(e) = self.storage.remove(BUFFER_NAMESPACE, &slot_key(slot)) {
                warn!("Buffer: slot {} delete failed: {}", slot, e);
            }
        }
        true
    }

    pub fn count(&self) -> usize {
        self.ring.len()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Delete every record and zero the counters.
    pub fn clear(&mut self) {
        if let Err(e) = self.storage.erase_namespace(BUFFER_NAMESPACE) {
            warn!("Buffer: clear failed: {}", e);
        }
        self.ring = RingIndex::new();
        self.persist_counters();
        info!("Buffer: cleared");
    }

    fn slot_present(&self, slot: usize) -> bool {
        matches!(self.storage.get(BUFFER_NAMESPACE, &slot_key(slot)), Ok(Some(_)))
    }

    fn load_counter(&self, key: &str) -> usize {
        match self.storage.get(BUFFER_NAMESPACE, key) {
            Ok(Some(v)) => v.trim().parse().unwrap_or(usize::MAX),
            Ok(None) => 0,
            Err(_) => usize::MAX,
        }
    }

    fn store_counter(&mut self, key: &str, value: usize) {
        if let Err(e) = self.storage.put(BUFFER_NAMESPACE, key, &value.to_string()) {
            warn!("Buffer: counter '{}' write failed: {}", key, e);
        }
    }

    fn persist_counters(&mut self) {
        self.store_counter(KEY_HEAD, self.ring.head());
        self.store_counter(KEY_TAIL, self.ring.tail());
        self.store_counter(KEY_COUNT, self.ring.len());
    }
}

fn slot_key(slot: usize) -> String {
    format!("item{slot}")
}
