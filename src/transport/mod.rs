//! Single-flight HTTP transport.
//!
//! Every outbound request in the firmware goes through one
//! [`TransportGate`], which owns the only HTTP client instance.
//!
//! ```text
//!  uplink task ──┐
//!                ├──▶ TransportGate ──▶ [cooldown] ──▶ HttpClient ──▶ teardown
//! command task ──┘     (bounded wait)
//! ```
//!
//! The gate guarantees:
//!
//! - at most one exchange is in flight at any instant;
//! - a minimum gap (the call profile's cooldown) between the end of one
//!   exchange and the start of the next, since the lwIP stack cannot
//!   reliably open a socket right after closing the previous one;
//! - teardown of the connection on every exit path, including unwinding.
//!
//! Lock acquisition never blocks longer than the profile's `lock_wait`;
//! on timeout the caller gets `None` and retries on its next cycle.

#[cfg(target_os = "espidf")]
pub mod esp;

use core::time::Duration;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use log::{debug, warn};

use crate::app::ports::TimePort;
use crate::error::TransportError;

/// Lock poll granularity while waiting for the gate.
const LOCK_POLL_MS: u64 = 10;

// ───────────────────────────────────────────────────────────────
// Client abstraction
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
        }
    }
}

/// A fully built request.  Headers are derived from the fields:
/// `Content-Type: application/json` and `x-device-key`.
#[derive(Debug, Clone, Copy)]
pub struct HttpRequest<'a> {
    pub method: Method,
    pub url: &'a str,
    pub device_key: &'a str,
    pub body: Option<&'a str>,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// 200 or 201.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, 200 | 201)
    }

    /// `Ok(self)` for 200/201, otherwise the classified status.
    pub fn ok(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::from_status(self.status))
        }
    }
}

/// The one HTTP client behind the gate.
pub trait HttpClient: Send {
    /// Perform one exchange.  Non-success statuses are returned as
    /// responses, not errors.
    fn execute(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransportError>;

    /// Close the underlying connection.  Called after every exchange.
    fn teardown(&mut self) {}
}

// ───────────────────────────────────────────────────────────────
// Call profiles
// ───────────────────────────────────────────────────────────────

/// Timing budget of one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallProfile {
    pub name: &'static str,
    /// Maximum wait for the gate.
    pub lock_wait: Duration,
    /// Minimum gap since the previous exchange completed.
    pub cooldown: Duration,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

const fn profile(
    name: &'static str,
    lock_wait_s: u64,
    cooldown_ms: u64,
    connect_s: u64,
    response_s: u64,
) -> CallProfile {
    CallProfile {
        name,
        lock_wait: Duration::from_secs(lock_wait_s),
        cooldown: Duration::from_millis(cooldown_ms),
        connect_timeout: Duration::from_secs(connect_s),
        response_timeout: Duration::from_secs(response_s),
    }
}

impl CallProfile {
    pub const READING: Self = profile("reading", 15, 400, 15, 10);
    pub const HEARTBEAT: Self = profile("heartbeat", 15, 400, 15, 10);
    pub const SETTINGS: Self = profile("settings", 10, 400, 10, 5);
    pub const COMMANDS: Self = profile("commands", 10, 400, 10, 5);
    pub const DOOR_EVENT: Self = profile("door-event", 10, 150, 8, 5);
    pub const DOOR_BATCH: Self = profile("door-batch", 10, 200, 8, 5);
    pub const HEALTH: Self = profile("health", 5, 400, 5, 5);
}

// ───────────────────────────────────────────────────────────────
// Gate
// ───────────────────────────────────────────────────────────────

struct Slot<C> {
    client: C,
    last_completed_ms: Option<u64>,
}

/// Mutual exclusion plus cooldown around the single HTTP client.
pub struct TransportGate<C: HttpClient> {
    slot: Mutex<Slot<C>>,
    clock: Arc<dyn TimePort>,
}

impl<C: HttpClient> TransportGate<C> {
    pub fn new(client: C, clock: Arc<dyn TimePort>) -> Self {
        Self {
            slot: Mutex::new(Slot {
                client,
                last_completed_ms: None,
            }),
            clock,
        }
    }

    pub fn clock(&self) -> &dyn TimePort {
        &*self.clock
    }

    /// Run `f` with exclusive use of the client.  `None` when the gate
    /// could not be acquired within `profile.lock_wait`.
    pub fn with_exclusive_transport<R, F>(&self, profile: &CallProfile, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session<'_, C>) -> R,
    {
        let Some(guard) = self.acquire(profile) else {
            warn!(
                "Transport: gate busy for {} ms, skipping {}",
                profile.lock_wait.as_millis(),
                profile.name
            );
            return None;
        };

        let mut exchange = Exchange {
            slot: guard,
            clock: &*self.clock,
        };
        exchange.wait_cooldown(profile.cooldown);

        let mut session = Session {
            exchange,
            profile,
            sent: false,
        };
        Some(f(&mut session))
    }

    fn acquire(&self, profile: &CallProfile) -> Option<MutexGuard<'_, Slot<C>>> {
        let budget = u64::try_from(profile.lock_wait.as_millis()).unwrap_or(u64::MAX);
        let start = self.clock.uptime_ms();
        loop {
            match self.slot.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if self.clock.uptime_ms().saturating_sub(start) >= budget {
                        return None;
                    }
                    self.clock.delay_ms(LOCK_POLL_MS);
                }
            }
        }
    }
}

/// Held lock plus the clock; tears the connection down when dropped.
struct Exchange<'a, C: HttpClient> {
    slot: MutexGuard<'a, Slot<C>>,
    clock: &'a dyn TimePort,
}

impl<C: HttpClient> Exchange<'_, C> {
    fn wait_cooldown(&self, cooldown: Duration) {
        let Some(last) = self.slot.last_completed_ms else {
            return;
        };
        let gap = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        let elapsed = self.clock.uptime_ms().saturating_sub(last);
        if elapsed < gap {
            self.clock.delay_ms(gap - elapsed);
        }
    }

    fn finish(&mut self) {
        self.slot.client.teardown();
        self.slot.last_completed_ms = Some(self.clock.uptime_ms());
    }
}

impl<C: HttpClient> Drop for Exchange<'_, C> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Exclusive access handed to the closure of
/// [`TransportGate::with_exclusive_transport`].
pub struct Session<'a, C: HttpClient> {
    exchange: Exchange<'a, C>,
    profile: &'a CallProfile,
    sent: bool,
}

impl<C: HttpClient> Session<'_, C> {
    /// Send one request with the profile's timeouts.  A second request in
    /// the same session tears down the first connection and honours the
    /// cooldown before it starts.
    pub fn send(
        &mut self,
        method: Method,
        url: &str,
        device_key: &str,
        body: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        if self.sent {
            self.exchange.finish();
            self.exchange.wait_cooldown(self.profile.cooldown);
        }
        self.sent = true;

        let request = HttpRequest {
            method,
            url,
            device_key,
            body,
            connect_timeout: self.profile.connect_timeout,
            response_timeout: self.profile.response_timeout,
        };
        debug!("Transport: {} {} ({})", method.as_str(), url, self.profile.name);

        let result = self.exchange.slot.client.execute(&request);
        match &result {
            Ok(resp) if !resp.is_success() => {
                warn!(
                    "Transport: {} {} -> {}",
                    self.profile.name,
                    resp.status,
                    TransportError::from_status(resp.status)
                );
            }
            Err(e) => warn!("Transport: {} failed: {}", self.profile.name, e),
            Ok(_) => {}
        }
        result
    }
}
