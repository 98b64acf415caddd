//! Explicit runtime context handed to every component constructor.
//!
//! Replaces global singletons: the boot result, the loaded config and the
//! shared status/settings handles travel together so each worker can be
//! built against fakes in tests.

use std::sync::{Arc, Mutex, PoisonError};

use crate::app::status::SharedStatus;
use crate::boot::provisioning::ApiCredentials;
use crate::config::{DeviceSettings, FIRMWARE_VERSION, SystemConfig};

/// Remote alarm thresholds, refreshed by the uplink task.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings(Arc<Mutex<DeviceSettings>>);

impl SharedSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> DeviceSettings {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, settings: DeviceSettings) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = settings;
    }
}

#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub config: SystemConfig,
    /// Serial used in API paths and reading payloads.
    pub serial: String,
    /// Station MAC (`AA:BB:CC:DD:EE:FF`), reported in heartbeats.
    pub mac: String,
    pub firmware_version: &'static str,
    pub api: ApiCredentials,
    pub status: SharedStatus,
    pub settings: SharedSettings,
}

impl DeviceContext {
    pub fn new(
        config: SystemConfig,
        serial: String,
        mac: String,
        api: ApiCredentials,
        status: SharedStatus,
    ) -> Self {
        Self {
            config,
            serial,
            mac,
            firmware_version: FIRMWARE_VERSION,
            api,
            status,
            settings: SharedSettings::new(),
        }
    }
}
