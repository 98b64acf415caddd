//! Port traits: the hexagonal boundary between the firmware core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ workers / BootController (domain)
//! ```
//!
//! Driven adapters (NVS, WiFi, GPIO, the refrigeration controller link)
//! implement these traits.  The core consumes them via generics or
//! `dyn` references, so nothing in `boot`, `door`, `buffer`, `uplink` or
//! `commands` touches hardware directly and every component runs on the
//! host against fakes.
//!
//! ## Security notes
//!
//! - **StoragePort** implementations SHOULD place the "provision"
//!   namespace on the encrypted NVS partition.
//! - Secrets handed across [`ConfigPortal`] are validated by
//!   [`ProvisioningRecord`](crate::boot::provisioning::ProvisioningRecord)
//!   before anything is persisted.

use core::fmt;
use core::time::Duration;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::boot::provisioning::ApiCredentials;
use crate::commands::types::CommandType;
use crate::error::{ActuatorError, Error};

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Durable key → string store.  Survives power loss.
///
/// Keys are namespaced to prevent collisions between subsystems.  Write
/// operations MUST be atomic per key; the ESP-IDF NVS API guarantees this
/// natively.
pub trait StoragePort {
    /// Read a string value.  `Ok(None)` when the key does not exist.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a string value atomically.
    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Delete every key in a namespace (factory reset).
    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError>;

    /// Read a binary blob.  `Ok(None)` when the key does not exist.
    fn get_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a binary blob atomically.
    fn put_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Time port
// ───────────────────────────────────────────────────────────────

/// Monotonic clock, optional wall clock and blocking delay.
///
/// Shared by every worker thread, hence `Send + Sync`.
pub trait TimePort: Send + Sync {
    /// Milliseconds since boot (monotonic).
    fn uptime_ms(&self) -> u64;

    /// UTC milliseconds, or `None` until the wall clock has been synced.
    fn unix_time_ms(&self) -> Option<u64>;

    /// Block the calling task.
    fn delay_ms(&self, ms: u64);

    /// UTC milliseconds when synced, otherwise uptime milliseconds.
    fn timestamp_ms(&self) -> u64 {
        self.unix_time_ms().unwrap_or_else(|| self.uptime_ms())
    }
}

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// One climate sample plus the door contact at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorSnapshot {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    /// Barometric pressure when a pressure sensor is fitted.
    pub pressure_hpa: Option<f32>,
    pub door_open: bool,
    /// False when the acquisition failed; the other fields are then stale.
    pub valid: bool,
}

/// Supply state at capture time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    pub mains_present: bool,
    pub battery_percent: u8,
    pub battery_voltage: f32,
}

/// Read-side port: the domain calls this to obtain sensor data.
pub trait SensorPort {
    /// Raw (undebounced) door contact; `true` = open.
    fn read_door_raw(&mut self) -> bool;

    /// Full climate acquisition.  May take tens of milliseconds.
    fn read_all(&mut self) -> SensorSnapshot;

    /// Supply and battery state.
    fn read_power(&mut self) -> PowerSample;
}

impl<T: SensorPort> SensorPort for Arc<Mutex<T>> {
    fn read_door_raw(&mut self) -> bool {
        self.lock().unwrap_or_else(std::sync::PoisonError::into_inner).read_door_raw()
    }

    fn read_all(&mut self) -> SensorSnapshot {
        self.lock().unwrap_or_else(std::sync::PoisonError::into_inner).read_all()
    }

    fn read_power(&mut self) -> PowerSample {
        self.lock().unwrap_or_else(std::sync::PoisonError::into_inner).read_power()
    }
}

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → refrigeration controller)
// ───────────────────────────────────────────────────────────────

/// Write-side port: executes remote commands on the refrigeration controller.
pub trait ActuatorPort {
    /// Execute `command` and return its JSON result for the completion report.
    fn write_command(
        &mut self,
        command: CommandType,
        parameters: &Map<String, Value>,
    ) -> Result<Value, ActuatorError>;
}

impl<T: ActuatorPort> ActuatorPort for Arc<Mutex<T>> {
    fn write_command(
        &mut self,
        command: CommandType,
        parameters: &Map<String, Value>,
    ) -> Result<Value, ActuatorError> {
        self.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .write_command(command, parameters)
    }
}

// ───────────────────────────────────────────────────────────────
// Connectivity ports
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    ConnectionFailed,
    Timeout,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be at most 64 bytes)"),
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
            Self::Timeout => write!(f, "WiFi connect timed out"),
        }
    }
}

/// Read-only link status, shared across worker threads.
pub trait ConnectivityPort: Send + Sync {
    fn is_connected(&self) -> bool;

    /// RSSI in dBm; 0 when not connected.
    fn signal_strength(&self) -> i32;

    /// Dotted-quad station address; empty when not connected.
    fn local_address(&self) -> String;
}

impl<T: ConnectivityPort + ?Sized> ConnectivityPort for Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn signal_strength(&self) -> i32 {
        (**self).signal_strength()
    }

    fn local_address(&self) -> String {
        (**self).local_address()
    }
}

/// Station control: owned by one task at a time.
pub trait StationPort {
    /// Join `ssid` within `timeout`.
    fn connect(
        &mut self,
        ssid: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(), ConnectivityError>;

    /// Retry the last successful credentials.
    fn reconnect(&mut self) -> Result<(), ConnectivityError>;

    /// Drop any credentials cached by the WiFi stack.
    fn forget_credentials(&mut self);

    /// Refresh the link status seen through [`ConnectivityPort`].
    fn poll_link(&mut self) {}
}

/// Lets the uplink task and the reset watcher share one station.
impl<T: StationPort> StationPort for Arc<Mutex<T>> {
    fn connect(
        &mut self,
        ssid: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(), ConnectivityError> {
        self.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .connect(ssid, password, timeout)
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        self.lock().unwrap_or_else(std::sync::PoisonError::into_inner).reconnect()
    }

    fn forget_credentials(&mut self) {
        self.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .forget_credentials();
    }

    fn poll_link(&mut self) {
        self.lock().unwrap_or_else(std::sync::PoisonError::into_inner).poll_link();
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration portal
// ───────────────────────────────────────────────────────────────

/// Values delivered by the portal's save action.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct PortalSubmission {
    pub wifi_ssid: String,
    #[serde(default)]
    pub wifi_password: String,
    pub api_url: String,
    pub api_key: String,
    #[serde(default)]
    pub device_serial: String,
}

/// Captive configuration portal.
pub trait ConfigPortal {
    /// Open the portal as SoftAP `ap_name` and block until the user saves
    /// or `timeout` elapses.  `None` on timeout.
    fn start(&mut self, ap_name: &str, timeout: Duration) -> Option<PortalSubmission>;
}

/// Station and portal share one radio, so boot borrows them as one.
pub trait NetworkPort: StationPort + ConfigPortal {}

impl<T: StationPort + ConfigPortal> NetworkPort for T {}

// ───────────────────────────────────────────────────────────────
// Buttons, system, API handshake
// ───────────────────────────────────────────────────────────────

/// Boot and reset buttons plus the feedback LED.
pub trait ButtonPort {
    fn boot_pressed(&mut self) -> bool;
    fn reset_pressed(&mut self) -> bool;
    fn set_indicator(&mut self, on: bool);
}

impl<T: ButtonPort> ButtonPort for Arc<Mutex<T>> {
    fn boot_pressed(&mut self) -> bool {
        self.lock().unwrap_or_else(std::sync::PoisonError::into_inner).boot_pressed()
    }

    fn reset_pressed(&mut self) -> bool {
        self.lock().unwrap_or_else(std::sync::PoisonError::into_inner).reset_pressed()
    }

    fn set_indicator(&mut self, on: bool) {
        self.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .set_indicator(on);
    }
}

/// Runtime resource queries.
pub trait SystemPort: Send + Sync {
    fn free_heap_bytes(&self) -> u32;
}

/// First contact with the API during boot.
pub trait ApiHandshake {
    /// One heartbeat with the freshly loaded credentials.
    fn handshake(&mut self, api: &ApiCredentials, device_serial: &str) -> Result<(), Error>;

    /// `GET /health`, informational only.
    fn health_check(&mut self, _api: &ApiCredentials) -> Result<(), Error> {
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Storage partition is full.
    Full,
    /// Stored value is not valid UTF-8 or exceeds the read buffer.
    Corrupted,
    /// Generic I/O error.
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "storage full"),
            Self::Corrupted => write!(f, "stored value corrupted"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
