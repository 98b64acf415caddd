//! Telemetry uplink: readings, door events, heartbeat, settings.
//!
//! Every call is checked for link and credentials first and fails fast
//! with [`Error::Connectivity`] without touching the transport gate.
//! Everything else goes through [`TransportGate`] with the call's
//! [`CallProfile`].
//!
//! | Operation            | Profile      | Success   |
//! |----------------------|--------------|-----------|
//! | `upload_reading`     | READING      | 200 / 201 |
//! | `upload_door_event`  | DOOR_EVENT   | 200 / 201 |
//! | `upload_door_events_batch` | DOOR_BATCH | 200 / 201, 5xx falls back to singles |
//! | `heartbeat`          | HEARTBEAT    | 200 / 201 |
//! | `fetch_settings`     | SETTINGS     | 200       |
//! | `health_check`       | HEALTH       | 200       |

pub mod heartbeat;
pub mod payloads;

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};

use crate::app::context::DeviceContext;
use crate::app::ports::{ApiHandshake, ConnectivityPort, StoragePort};
use crate::app::status::SharedStatus;
use crate::boot::provisioning::ApiCredentials;
use crate::buffer::ReadingBuffer;
use crate::config::{DeviceSettings, FIRMWARE_VERSION};
use crate::door::DoorEvent;
use crate::error::{Error, TransportError};
use crate::transport::{CallProfile, HttpClient, HttpResponse, Method, TransportGate};

pub use heartbeat::HeartbeatSchedule;
use payloads::{DoorBatchBody, DoorEventBody, DoorEventItem, HeartbeatBody, SettingsResponse, to_json};

/// Last error text recorded when a heartbeat fails.
pub const HEARTBEAT_FAILED_TEXT: &str = "API heartbeat failed";
/// `last_error` while the link or the API credentials are missing.
pub const OFFLINE_TEXT: &str = "No WiFi link or API credentials";

// ───────────────────────────────────────────────────────────────
// Authenticated API access
// ───────────────────────────────────────────────────────────────

/// Credentials, device serial and the shared gate.  Cloned into every
/// component that talks to the API.
pub struct ApiClient<C: HttpClient> {
    gate: Arc<TransportGate<C>>,
    link: Arc<dyn ConnectivityPort>,
    api: ApiCredentials,
    serial: String,
}

impl<C: HttpClient> Clone for ApiClient<C> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            link: self.link.clone(),
            api: self.api.clone(),
            serial: self.serial.clone(),
        }
    }
}

impl<C: HttpClient> ApiClient<C> {
    pub fn new(
        gate: Arc<TransportGate<C>>,
        link: Arc<dyn ConnectivityPort>,
        api: ApiCredentials,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            gate,
            link,
            api,
            serial: serial.into(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn link(&self) -> &dyn ConnectivityPort {
        &*self.link
    }

    pub fn gate(&self) -> &TransportGate<C> {
        &self.gate
    }

    /// Link up and every credential present.
    pub fn ensure_ready(&self) -> Result<(), Error> {
        if !self.link.is_connected()
            || self.api.base_url.is_empty()
            || self.api.device_key.is_empty()
            || self.serial.is_empty()
        {
            return Err(Error::Connectivity);
        }
        Ok(())
    }

    /// One gated exchange.  Only transport failures are errors; the caller
    /// judges the status.
    pub fn exchange(
        &self,
        profile: &CallProfile,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<HttpResponse, Error> {
        self.ensure_ready()?;
        let url = self.api.url(path);
        self.gate
            .with_exclusive_transport(profile, |session| {
                session.send(method, &url, &self.api.device_key, body)
            })
            .ok_or(Error::Transport(TransportError::Busy))?
            .map_err(Error::from)
    }

    /// Exchange that must answer 200/201.
    pub fn exchange_ok(
        &self,
        profile: &CallProfile,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<HttpResponse, Error> {
        Ok(self.exchange(profile, method, path, body)?.ok()?)
    }
}

// ───────────────────────────────────────────────────────────────
// Telemetry uplink
// ───────────────────────────────────────────────────────────────

pub struct TelemetryUplink<C: HttpClient> {
    client: ApiClient<C>,
    mac: String,
    firmware_version: &'static str,
    status: SharedStatus,
}

impl<C: HttpClient> TelemetryUplink<C> {
    pub fn new(
        client: ApiClient<C>,
        mac: impl Into<String>,
        firmware_version: &'static str,
        status: SharedStatus,
    ) -> Self {
        Self {
            client,
            mac: mac.into(),
            firmware_version,
            status,
        }
    }

    pub fn from_context(
        gate: Arc<TransportGate<C>>,
        link: Arc<dyn ConnectivityPort>,
        ctx: &DeviceContext,
    ) -> Self {
        let client = ApiClient::new(gate, link, ctx.api.clone(), ctx.serial.clone());
        Self::new(client, ctx.mac.clone(), ctx.firmware_version, ctx.status.clone())
    }

    pub fn client(&self) -> &ApiClient<C> {
        &self.client
    }

    fn device_path(&self, leaf: &str) -> String {
        format!("/readings/devices/{}/{}", self.client.serial(), leaf)
    }

    /// POST one buffered reading verbatim.
    pub fn upload_reading(&self, record_json: &str) -> Result<(), Error> {
        let path = self.device_path("readings");
        self.client
            .exchange_ok(&CallProfile::READING, Method::Post, &path, Some(record_json))?;
        debug!("Uplink: reading uploaded");
        Ok(())
    }

    pub fn upload_door_event(&self, event: &DoorEvent) -> Result<(), Error> {
        self.client.ensure_ready()?;
        let body = to_json(&DoorEventBody::new(self.client.serial(), event))?;
        let path = self.device_path("door-events");
        self.client
            .exchange_ok(&CallProfile::DOOR_EVENT, Method::Post, &path, Some(&body))?;
        Ok(())
    }

    /// POST a batch.  On a 5xx the same events are retried one by one and
    /// the call succeeds if at least one of them got through.  Returns the
    /// number of events delivered.
    pub fn upload_door_events_batch(&self, events: &[DoorEvent]) -> Result<usize, Error> {
        if events.is_empty() {
            return Ok(0);
        }
        self.client.ensure_ready()?;

        let body = to_json(&DoorBatchBody {
            device_id: self.client.serial(),
            events: events.iter().map(DoorEventItem::from).collect(),
        })?;
        let path = self.device_path("door-events");

        match self
            .client
            .exchange_ok(&CallProfile::DOOR_BATCH, Method::Post, &path, Some(&body))
        {
            Ok(_) => Ok(events.len()),
            Err(Error::Transport(e)) if e.is_server_error() => {
                warn!("Uplink: door batch rejected ({}), sending {} singly", e, events.len());
                let delivered = events
                    .iter()
                    .filter(|ev| match self.upload_door_event(ev) {
                        Ok(()) => true,
                        Err(err) => {
                            warn!("Uplink: fallback seq={} failed: {}", ev.seq, err);
                            false
                        }
                    })
                    .count();
                if delivered > 0 {
                    info!("Uplink: fallback delivered {}/{} door events", delivered, events.len());
                    Ok(delivered)
                } else {
                    Err(Error::Transport(e))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// POST a heartbeat and record the outcome in the shared status.
    pub fn heartbeat(&self, rssi: i32, ip: &str) -> Result<(), Error> {
        let uptime_ms = self.client.gate().clock().uptime_ms();
        let connected = self.client.link().is_connected();

        let result = self.client.ensure_ready().and_then(|()| {
            let body = to_json(&HeartbeatBody {
                device_id: &self.mac,
                firmware_version: self.firmware_version,
                ip,
                rssi,
                uptime: uptime_ms / 1000,
                connected_to_wifi: connected,
            })?;
            self.client
                .exchange_ok(&CallProfile::HEARTBEAT, Method::Post, "/devices/heartbeat", Some(&body))
                .map(|_| ())
        });

        self.status.update(|s| {
            s.connected_to_wifi = connected;
            s.uptime_ms = uptime_ms;
            match &result {
                Ok(()) => {
                    s.connected_to_api = true;
                    s.last_heartbeat_ms = Some(uptime_ms);
                    s.clear_error();
                }
                Err(Error::Connectivity) => {
                    s.connected_to_api = false;
                    s.set_error(OFFLINE_TEXT);
                }
                Err(_) => {
                    s.connected_to_api = false;
                    s.set_error(HEARTBEAT_FAILED_TEXT);
                }
            }
        });

        match &result {
            Ok(()) => debug!("Uplink: heartbeat OK"),
            Err(e) => warn!("Uplink: heartbeat failed: {}", e),
        }
        result
    }

    /// Record a skipped heartbeat while the link is down.
    pub fn note_offline(&self) {
        let uptime_ms = self.client.gate().clock().uptime_ms();
        self.status.update(|s| {
            s.connected_to_wifi = false;
            s.connected_to_api = false;
            s.uptime_ms = uptime_ms;
            s.set_error(OFFLINE_TEXT);
        });
    }

    /// GET the remote alarm thresholds.  Only a 200 with both temperature
    /// bounds is accepted.
    pub fn fetch_settings(&self) -> Result<DeviceSettings, Error> {
        let resp = self
            .client
            .exchange(&CallProfile::SETTINGS, Method::Get, "/devices/settings", None)?;
        if resp.status != 200 {
            return Err(TransportError::from_status(resp.status).into());
        }
        let settings = SettingsResponse::parse(&resp.body)?;
        info!(
            "Uplink: settings min={:.1} max={:.1} door_delay={}s",
            settings.min_temp, settings.max_temp, settings.door_alarm_delay_seconds
        );
        Ok(settings)
    }

    pub fn health_check(&self) -> Result<(), Error> {
        let resp = self
            .client
            .exchange(&CallProfile::HEALTH, Method::Get, "/health", None)?;
        if resp.status == 200 {
            Ok(())
        } else {
            Err(TransportError::from_status(resp.status).into())
        }
    }

    /// Upload buffered readings oldest first, stop at the first failure,
    /// then drop what was delivered.  The buffer lock is never held across
    /// a transport call.  Returns the number of readings removed.
    pub fn upload_backlog<S: StoragePort, const N: usize>(
        &self,
        buffer: &Mutex<ReadingBuffer<S, N>>,
    ) -> usize {
        let pending = lock(buffer).count();
        let mut uploaded = 0;

        for i in 0..pending {
            let Some(record) = lock(buffer).get(i) else {
                warn!("Uplink: buffered reading {} unreadable, discarding", i);
                uploaded += 1;
                continue;
            };
            match self.upload_reading(&record) {
                Ok(()) => uploaded += 1,
                Err(e) => {
                    warn!("Uplink: reading upload stopped at {}/{}: {}", i, pending, e);
                    break;
                }
            }
        }

        if uploaded > 0 && lock(buffer).remove(uploaded) {
            info!("Uplink: uploaded {}/{} buffered readings", uploaded, pending);
        }
        uploaded
    }
}

// ───────────────────────────────────────────────────────────────
// Boot handshake
// ───────────────────────────────────────────────────────────────

/// [`ApiHandshake`] over the shared gate: one heartbeat with the fresh
/// credentials, then an informational health check.
pub struct GatedHandshake<C: HttpClient> {
    gate: Arc<TransportGate<C>>,
    link: Arc<dyn ConnectivityPort>,
    mac: String,
    status: SharedStatus,
}

impl<C: HttpClient> GatedHandshake<C> {
    pub fn new(
        gate: Arc<TransportGate<C>>,
        link: Arc<dyn ConnectivityPort>,
        mac: impl Into<String>,
        status: SharedStatus,
    ) -> Self {
        Self {
            gate,
            link,
            mac: mac.into(),
            status,
        }
    }

    fn uplink(&self, api: &ApiCredentials, serial: &str) -> TelemetryUplink<C> {
        let client = ApiClient::new(self.gate.clone(), self.link.clone(), api.clone(), serial);
        TelemetryUplink::new(client, self.mac.clone(), FIRMWARE_VERSION, self.status.clone())
    }
}

impl<C: HttpClient> ApiHandshake for GatedHandshake<C> {
    fn handshake(&mut self, api: &ApiCredentials, device_serial: &str) -> Result<(), Error> {
        let rssi = self.link.signal_strength();
        let ip = self.link.local_address();
        self.uplink(api, device_serial).heartbeat(rssi, &ip)
    }

    fn health_check(&mut self, api: &ApiCredentials) -> Result<(), Error> {
        // /health is not device-scoped; any non-empty serial passes ensure_ready
        self.uplink(api, &self.mac).health_check()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
