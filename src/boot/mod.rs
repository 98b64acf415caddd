//! Boot and provisioning state machine.
//!
//! ```text
//!  BOOT ──▶ LOAD_PERSISTENT ──▶ WIFI_CONNECT ──▶ API_HANDSHAKE ──▶ RUN
//!   │              │                  │
//!   │ reset        │ incomplete       │ connect failed
//!   ▼              ▼                  ▼
//!  RequestRestart  └──────────▶ CONFIG_PORTAL ──▶ saved:   RequestRestart
//!  (FactoryReset)                              └▶ timeout: PortalActive
//! ```
//!
//! [`BootController::run`] runs once.  It never restarts the chip itself:
//! a restart is returned as [`RunMode::RequestRestart`] and performed by
//! the binary, so every branch is testable on the host.
//!
//! A failed API handshake does not block RUN; the heartbeat loop retries
//! it with backoff and `last_error` tells the status reporter why.

pub mod provisioning;

use core::fmt;
use core::time::Duration;

use log::{error, info, warn};

use crate::app::ports::{
    ApiHandshake, ButtonPort, ConfigPortal, NetworkPort, StationPort, StoragePort, TimePort,
};
use crate::app::status::SharedStatus;
use crate::config::{PORTAL_AP_NAME, SystemConfig};
use crate::drivers::reset_button::ResetSequencer;
use crate::uplink::HEARTBEAT_FAILED_TEXT;

use provisioning::{
    ApiCredentials, ProvisioningRecord, ProvisioningStore, WIFI_NAMESPACE, mask_secret,
};

/// Sampling period of the reset buttons during the boot check window.
const RESET_POLL_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Boot,
    LoadPersistent,
    WifiConnect,
    ConfigPortal,
    ApiHandshake,
    Run,
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Boot => "BOOT",
            Self::LoadPersistent => "LOAD_PERSISTENT",
            Self::WifiConnect => "WIFI_CONNECT",
            Self::ConfigPortal => "CONFIG_PORTAL",
            Self::ApiHandshake => "API_HANDSHAKE",
            Self::Run => "RUN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// Two-step reset completed; provisioning and WiFi were wiped.
    FactoryReset,
    /// The portal saved new credentials.
    ProvisioningSaved,
}

/// Everything the workers need once the device is online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSession {
    pub api: ApiCredentials,
    pub serial: String,
    pub record: ProvisioningRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Run(BootSession),
    /// The portal closed without a valid save.
    PortalActive,
    RequestRestart(RestartReason),
}

/// Collaborators used during boot.  Borrowed for the duration of `run`.
pub struct BootPorts<'a> {
    pub storage: &'a mut dyn StoragePort,
    pub buttons: &'a mut dyn ButtonPort,
    pub network: &'a mut dyn NetworkPort,
    pub handshake: &'a mut dyn ApiHandshake,
    pub clock: &'a dyn TimePort,
}

pub struct BootController {
    config: SystemConfig,
    status: SharedStatus,
    hardware_id: String,
    state: BootState,
}

impl BootController {
    pub fn new(config: SystemConfig, status: SharedStatus, hardware_id: impl Into<String>) -> Self {
        Self {
            config,
            status,
            hardware_id: hardware_id.into(),
            state: BootState::Boot,
        }
    }

    pub const fn state(&self) -> BootState {
        self.state
    }

    fn transition(&mut self, next: BootState) {
        info!("Boot: {} -> {}", self.state, next);
        self.state = next;
    }

    pub fn run(&mut self, ports: &mut BootPorts<'_>) -> RunMode {
        info!("Boot: {}", self.state);

        if self.reset_requested(ports) {
            warn!("Boot: factory reset, wiping provisioning and WiFi");
            if let Err(e) = ProvisioningStore::new(&mut *ports.storage).wipe() {
                error!("Boot: wipe failed: {}", e);
            }
            ports.network.forget_credentials();
            return RunMode::RequestRestart(RestartReason::FactoryReset);
        }

        self.transition(BootState::LoadPersistent);
        let record = ProvisioningStore::new(&mut *ports.storage).load();
        info!("Boot: provisioning {:?}", record);

        if !record.is_complete() {
            warn!(
                "Boot: not provisioned (wifi={}, api={}), clearing stale WiFi",
                record.has_wifi(),
                record.has_api()
            );
            ports.network.forget_credentials();
            if let Err(e) = ports.storage.erase_namespace(WIFI_NAMESPACE) {
                warn!("Boot: WiFi namespace wipe failed: {}", e);
            }
            return self.config_portal(ports, &record);
        }

        self.transition(BootState::WifiConnect);
        let timeout = Duration::from_secs(u64::from(self.config.wifi_connect_timeout_secs));
        if let Err(e) = ports
            .network
            .connect(&record.wifi_ssid, &record.wifi_password, timeout)
        {
            warn!("Boot: WiFi '{}' failed: {}", record.wifi_ssid, e);
            self.status.update(|s| {
                s.connected_to_wifi = false;
                s.set_error("WiFi connect failed");
            });
            return self.config_portal(ports, &record);
        }
        self.status.update(|s| s.connected_to_wifi = true);

        self.transition(BootState::ApiHandshake);
        let Some(api) = record.api_credentials() else {
            return self.config_portal(ports, &record);
        };
        let serial = record.effective_serial(&self.config.device_serial, &self.hardware_id);
        info!(
            "Boot: API {} serial {} key {}",
            api.base_url,
            serial,
            mask_secret(&api.device_key)
        );

        match ports.handshake.handshake(&api, &serial) {
            Ok(()) => {
                let now = ports.clock.uptime_ms();
                self.status.update(|s| {
                    s.connected_to_api = true;
                    s.last_heartbeat_ms = Some(now);
                    s.uptime_ms = now;
                    s.clear_error();
                });
                info!("Boot: API online");
                match ports.handshake.health_check(&api) {
                    Ok(()) => info!("Boot: health check OK"),
                    Err(e) => warn!("Boot: health check failed: {}", e),
                }
            }
            Err(e) => {
                warn!("Boot: API handshake failed: {}", e);
                self.status.update(|s| {
                    s.connected_to_api = false;
                    s.set_error(HEARTBEAT_FAILED_TEXT);
                });
            }
        }

        self.transition(BootState::Run);
        RunMode::Run(BootSession {
            api,
            serial,
            record,
        })
    }

    /// Listen for the two-step reset for the configured window.
    fn reset_requested(&self, ports: &mut BootPorts<'_>) -> bool {
        let mut sequencer =
            ResetSequencer::new(self.config.reset_boot_window_ms, self.config.reset_hold_ms);
        let start = ports.clock.uptime_ms();
        let window = u64::from(self.config.reset_check_window_ms);

        info!("Boot: reset check for {} ms", window);
        loop {
            let now = ports.clock.uptime_ms();
            if now.saturating_sub(start) >= window {
                break;
            }
            let boot = ports.buttons.boot_pressed();
            let reset = ports.buttons.reset_pressed();
            let triggered = sequencer.update(boot, reset, now);
            ports.buttons.set_indicator(sequencer.indicator(now));
            if triggered {
                return true;
            }
            ports.clock.delay_ms(RESET_POLL_MS);
        }
        ports.buttons.set_indicator(false);
        false
    }

    fn config_portal(&mut self, ports: &mut BootPorts<'_>, previous: &ProvisioningRecord) -> RunMode {
        self.transition(BootState::ConfigPortal);
        let timeout = Duration::from_secs(u64::from(self.config.portal_timeout_secs));
        info!("Boot: portal '{}' open for {} s", PORTAL_AP_NAME, timeout.as_secs());

        let Some(submission) = ports.network.start(PORTAL_AP_NAME, timeout) else {
            warn!("Boot: portal timed out without a save");
            return RunMode::PortalActive;
        };

        let mut record = match ProvisioningRecord::from_submission(&submission) {
            Ok(r) => r,
            Err(e) => {
                warn!("Boot: portal input rejected: {}", e);
                self.status.update(|s| s.set_error("Provisioning input invalid"));
                return RunMode::PortalActive;
            }
        };
        if record.device_serial.is_empty() {
            record.device_serial.clone_from(&previous.device_serial);
        }

        match ProvisioningStore::new(&mut *ports.storage).save(&record) {
            Ok(()) => {
                info!("Boot: provisioning saved, restarting");
                RunMode::RequestRestart(RestartReason::ProvisioningSaved)
            }
            Err(e) => {
                error!("Boot: saving provisioning failed: {}", e);
                self.status.update(|s| s.set_error("Provisioning save failed"));
                RunMode::PortalActive
            }
        }
    }
}
