//! System configuration parameters
//!
//! All tunable intervals and thresholds for the cold-storage monitor.
//! Values are persisted to NVS as a postcard blob and fall back to the
//! defaults below on first boot.  Remote alarm thresholds live in
//! [`DeviceSettings`], refreshed from the API while running.

use serde::{Deserialize, Serialize};

/// Firmware version reported in heartbeats.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fixed slot count of the persistent reading buffer.
pub const READING_BUFFER_CAPACITY: usize = 100;

/// In-memory door event queue depth.
pub const DOOR_QUEUE_CAPACITY: usize = 32;

/// Largest door-event batch; backlogs at least `DOOR_BATCH_MIN` deep go
/// out as batches.
pub const DOOR_BATCH_MAX: usize = 10;
pub const DOOR_BATCH_MIN: usize = 3;

/// Upper bound for `door_rate_limit_per_sec` (sizes the rate window).
pub const MAX_DOOR_RATE_PER_SEC: usize = 16;

/// SoftAP name advertised while the configuration portal is open.
pub const PORTAL_AP_NAME: &str = "ColdMonitor-Setup";

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Sampling ---
    /// Climate capture interval (seconds)
    pub reading_interval_secs: u32,
    /// Door contact poll interval (milliseconds)
    pub door_poll_interval_ms: u32,
    /// Door contact must be stable this long before an event fires
    pub door_debounce_ms: u32,
    /// Maximum door events accepted per rolling second
    pub door_rate_limit_per_sec: u8,

    // --- Uplink ---
    /// Buffered reading upload interval (seconds)
    pub upload_interval_secs: u32,
    /// Heartbeat interval after a success (seconds)
    pub heartbeat_base_secs: u32,
    /// Heartbeat backoff ceiling (seconds)
    pub heartbeat_max_secs: u32,
    /// Remote settings refresh interval (seconds)
    pub settings_interval_secs: u32,

    // --- Commands ---
    /// Pending command poll interval (seconds)
    pub command_poll_interval_secs: u32,
    /// A command id is never executed twice within this window (seconds)
    pub command_cooldown_secs: u32,
    /// Skip command execution below this free heap (bytes)
    pub min_free_heap_execute: u32,
    /// Skip completion reporting at or below this free heap (bytes)
    pub min_free_heap_report: u32,

    // --- Connectivity ---
    /// Station connect budget at boot (seconds)
    pub wifi_connect_timeout_secs: u32,
    /// Reconnect attempt interval while running (seconds)
    pub wifi_reconnect_interval_secs: u32,
    /// Configuration portal lifetime before giving up (seconds)
    pub portal_timeout_secs: u32,

    // --- Factory reset ---
    /// How long boot listens for the two-step reset (milliseconds)
    pub reset_check_window_ms: u32,
    /// Window for the second button after the first (milliseconds)
    pub reset_boot_window_ms: u32,
    /// Second button hold time to trigger (milliseconds)
    pub reset_hold_ms: u32,

    // --- Identity ---
    /// Fallback device serial when provisioning carries none
    pub device_serial: heapless::String<32>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Sampling
            reading_interval_secs: 60,
            door_poll_interval_ms: 50,
            door_debounce_ms: 50,
            door_rate_limit_per_sec: 5,

            // Uplink
            upload_interval_secs: 300,
            heartbeat_base_secs: 10,
            heartbeat_max_secs: 600,
            settings_interval_secs: 60,

            // Commands
            command_poll_interval_secs: 30,
            command_cooldown_secs: 60,
            min_free_heap_execute: 10_000,
            min_free_heap_report: 5_000,

            // Connectivity
            wifi_connect_timeout_secs: 20,
            wifi_reconnect_interval_secs: 60,
            portal_timeout_secs: 180,

            // Factory reset
            reset_check_window_ms: 12_000,
            reset_boot_window_ms: 10_000,
            reset_hold_ms: 3_000,

            device_serial: heapless::String::new(),
        }
    }
}

impl SystemConfig {
    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.reading_interval_secs == 0 {
            return Err("reading_interval_secs must be > 0");
        }
        if !(10..=1000).contains(&self.door_poll_interval_ms) {
            return Err("door_poll_interval_ms must be 10-1000");
        }
        if self.door_debounce_ms == 0 {
            return Err("door_debounce_ms must be > 0");
        }
        if self.door_rate_limit_per_sec == 0
            || usize::from(self.door_rate_limit_per_sec) > MAX_DOOR_RATE_PER_SEC
        {
            return Err("door_rate_limit_per_sec must be 1-16");
        }
        if self.upload_interval_secs == 0 || self.settings_interval_secs == 0 {
            return Err("upload and settings intervals must be > 0");
        }
        if self.heartbeat_base_secs == 0 || self.heartbeat_max_secs < self.heartbeat_base_secs {
            return Err("heartbeat_max_secs must be >= heartbeat_base_secs > 0");
        }
        if self.command_poll_interval_secs == 0 {
            return Err("command_poll_interval_secs must be > 0");
        }
        if self.min_free_heap_report > self.min_free_heap_execute {
            return Err("min_free_heap_report must be <= min_free_heap_execute");
        }
        if self.wifi_connect_timeout_secs == 0 || self.portal_timeout_secs == 0 {
            return Err("connect and portal timeouts must be > 0");
        }
        if self.reset_hold_ms == 0 || self.reset_boot_window_ms == 0 {
            return Err("reset timings must be > 0");
        }
        Ok(())
    }
}

/// Alarm thresholds fetched from `GET /devices/settings`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub min_temp: f32,
    pub max_temp: f32,
    pub door_alarm_delay_seconds: u32,
}

impl DeviceSettings {
    pub const DEFAULT_DOOR_ALARM_DELAY_SECS: u32 = 300;
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            min_temp: -25.0,
            max_temp: -15.0,
            door_alarm_delay_seconds: Self::DEFAULT_DOOR_ALARM_DELAY_SECS,
        }
    }
}
