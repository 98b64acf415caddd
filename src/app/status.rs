//! Device status shared between BootController, the uplink and any
//! status reporter.
//!
//! Writers are BootController (during boot) and TelemetryUplink (while
//! running); there is never more than one writer per update cycle, so a
//! plain mutex around a small `Copy`-friendly struct is enough.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Connectivity and health snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub connected_to_wifi: bool,
    pub connected_to_api: bool,
    /// Last failure description; empty when none.
    pub last_error: heapless::String<64>,
    /// Uptime (ms) of the last successful heartbeat.
    pub last_heartbeat_ms: Option<u64>,
    pub uptime_ms: u64,
}

impl DeviceStatus {
    /// Replace `last_error`, truncating to the buffer size.
    pub fn set_error(&mut self, message: &str) {
        self.last_error.clear();
        let mut end = message.len().min(self.last_error.capacity());
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        let _ = self.last_error.push_str(&message[..end]);
    }

    pub fn clear_error(&mut self) {
        self.last_error.clear();
    }
}

/// Cloneable handle to the shared [`DeviceStatus`].
#[derive(Debug, Clone, Default)]
pub struct SharedStatus(Arc<Mutex<DeviceStatus>>);

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for an update.  A poisoned lock is recovered; status is advisory.
    pub fn lock(&self) -> MutexGuard<'_, DeviceStatus> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current status.
    pub fn snapshot(&self) -> DeviceStatus {
        self.lock().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut DeviceStatus)) {
        f(&mut self.lock());
    }
}
