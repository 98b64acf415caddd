//! WiFi adapter: station mode, the provisioning portal and link status.
//!
//! Implements [`StationPort`] and [`ConfigPortal`] on [`WifiAdapter`], and
//! [`ConnectivityPort`] on the shared [`LinkMonitor`] that every worker
//! reads without touching the driver.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `BlockingWifi<EspWifi>` for STA and SoftAP,
//!   `EspHttpServer` for the portal form.
//! - **all other targets**: simulation for host-side tests.  The sim
//!   "joins" any network unless told it is unreachable, and the portal
//!   returns whatever submission was queued.
//!
//! ## Portal
//!
//! The SoftAP serves a small form at `/`; the page POSTs JSON to `/save`.
//! The first valid body ends the portal; the server and AP are torn down
//! before `start` returns.

use core::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};

use crate::app::ports::{
    ConfigPortal, ConnectivityError, ConnectivityPort, PortalSubmission, StationPort,
};
use crate::boot::provisioning::mask_secret;

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() || ssid.len() > 32 {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.len() > 64 {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

/// Largest portal body accepted.
pub const MAX_PORTAL_BODY: usize = 1024;

/// Parse the portal's JSON body.  Field validation happens later in
/// `ProvisioningRecord::from_submission`.
pub fn parse_submission(body: &[u8]) -> Option<PortalSubmission> {
    if body.len() > MAX_PORTAL_BODY {
        return None;
    }
    serde_json::from_slice(body).ok()
}

// ───────────────────────────────────────────────────────────────
// Link monitor
// ───────────────────────────────────────────────────────────────

/// Lock-free link status written by the WiFi owner, read by every worker.
#[derive(Debug, Default)]
pub struct LinkMonitor {
    connected: AtomicBool,
    rssi: AtomicI32,
    address: Mutex<String>,
}

impl LinkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_up(&self, rssi: i32, address: &str) {
        self.rssi.store(rssi, Ordering::Relaxed);
        address.clone_into(&mut self.address.lock().unwrap_or_else(PoisonError::into_inner));
        self.connected.store(true, Ordering::Release);
    }

    pub fn set_rssi(&self, rssi: i32) {
        self.rssi.store(rssi, Ordering::Relaxed);
    }

    pub fn set_down(&self) {
        self.connected.store(false, Ordering::Release);
        self.rssi.store(0, Ordering::Relaxed);
        self.address.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl ConnectivityPort for LinkMonitor {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn signal_strength(&self) -> i32 {
        if self.is_connected() { self.rssi.load(Ordering::Relaxed) } else { 0 }
    }

    fn local_address(&self) -> String {
        self.address.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    #[cfg(target_os = "espidf")]
    wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
    link: Arc<LinkMonitor>,
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    /// Simulation: whether the configured network answers.
    #[cfg(not(target_os = "espidf"))]
    sim_reachable: bool,
    /// Simulation: what the next portal session returns.
    #[cfg(not(target_os = "espidf"))]
    sim_submission: Option<PortalSubmission>,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(
        modem: esp_idf_svc::hal::modem::Modem,
        sysloop: esp_idf_svc::eventloop::EspSystemEventLoop,
        nvs: Option<esp_idf_svc::nvs::EspDefaultNvsPartition>,
        link: Arc<LinkMonitor>,
    ) -> anyhow::Result<Self> {
        use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

        let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        Ok(Self {
            wifi,
            link,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(link: Arc<LinkMonitor>) -> Self {
        Self {
            link,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            sim_reachable: true,
            sim_submission: None,
        }
    }

    pub fn link(&self) -> Arc<LinkMonitor> {
        self.link.clone()
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_reachable(&mut self, reachable: bool) {
        self.sim_reachable = reachable;
        if !reachable {
            self.link.set_down();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_queue_submission(&mut self, submission: PortalSubmission) {
        self.sim_submission = Some(submission);
    }

    /// Refresh RSSI and detect a dropped link.
    fn refresh_link(&mut self) {
        match self.platform_status() {
            Some(rssi) => self.link.set_rssi(rssi),
            None => {
                if self.link.is_connected() {
                    warn!("WiFi: connection lost");
                }
                self.link.set_down();
            }
        }
    }

    fn remember(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.ssid.clear();
        self.ssid.push_str(ssid).map_err(|()| ConnectivityError::InvalidSsid)?;
        self.password.clear();
        self.password
            .push_str(password)
            .map_err(|()| ConnectivityError::InvalidPassword)?;
        Ok(())
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self, timeout: Duration) -> Result<(i32, String), ConnectivityError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        let auth_method = if self.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: self.ssid.as_str().try_into().map_err(|_| ConnectivityError::InvalidSsid)?,
            password: self
                .password
                .as_str()
                .try_into()
                .map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });
        self.wifi
            .set_configuration(&config)
            .map_err(|_| ConnectivityError::ConnectionFailed)?;
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi.start().map_err(|_| ConnectivityError::ConnectionFailed)?;
        }

        let deadline = std::time::Instant::now() + timeout;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.wifi.connect().and_then(|()| self.wifi.wait_netif_up()) {
                Ok(()) => break,
                Err(e) => {
                    warn!("WiFi: attempt {} failed: {:?}", attempt, e);
                    let _ = self.wifi.disconnect();
                    if std::time::Instant::now() >= deadline {
                        return Err(ConnectivityError::Timeout);
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }

        let address = self
            .wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .map(|info| info.ip.to_string())
            .unwrap_or_default();
        Ok((Self::ap_rssi().unwrap_or(0), address))
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self, _timeout: Duration) -> Result<(i32, String), ConnectivityError> {
        if !self.sim_reachable {
            warn!("WiFi(sim): '{}' unreachable", self.ssid);
            return Err(ConnectivityError::Timeout);
        }
        Ok((-58, "192.168.1.50".into()))
    }

    #[cfg(target_os = "espidf")]
    fn ap_rssi() -> Option<i32> {
        // SAFETY: wifi_ap_record_t is plain data; the call fills it in.
        unsafe {
            let mut info: esp_idf_svc::sys::wifi_ap_record_t = core::mem::zeroed();
            if esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut info)
                == esp_idf_svc::sys::ESP_OK as i32
            {
                Some(i32::from(info.rssi))
            } else {
                None
            }
        }
    }

    /// RSSI when associated, `None` when the link is gone.
    #[cfg(target_os = "espidf")]
    fn platform_status(&self) -> Option<i32> {
        if self.wifi.is_connected().unwrap_or(false) {
            Self::ap_rssi()
        } else {
            None
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_status(&self) -> Option<i32> {
        (self.sim_reachable && self.link.is_connected()).then_some(-58)
    }

    #[cfg(target_os = "espidf")]
    fn platform_forget(&mut self) {
        let _ = self.wifi.disconnect();
        // SAFETY: resets the driver's persisted settings; the driver is
        // owned here and not in use by any other task.
        unsafe {
            esp_idf_svc::sys::esp_wifi_restore();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_forget(&mut self) {}

    #[cfg(target_os = "espidf")]
    fn platform_portal(&mut self, ap_name: &str, timeout: Duration) -> Option<PortalSubmission> {
        match self.run_portal(ap_name, timeout) {
            Ok(submission) => submission,
            Err(e) => {
                warn!("WiFi: portal failed: {:#}", e);
                None
            }
        }
    }

    #[cfg(target_os = "espidf")]
    fn run_portal(&mut self, ap_name: &str, timeout: Duration) -> anyhow::Result<Option<PortalSubmission>> {
        use embedded_svc::http::Method;
        use embedded_svc::io::{Read, Write};
        use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpServer};
        use esp_idf_svc::wifi::{AccessPointConfiguration, AuthMethod, Configuration};
        use std::sync::mpsc;

        let _ = self.wifi.disconnect();
        let _ = self.wifi.stop();
        self.wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
            ssid: ap_name
                .try_into()
                .map_err(|_| anyhow::anyhow!("portal AP name too long"))?,
            auth_method: AuthMethod::None,
            channel: 1,
            ..Default::default()
        }))?;
        self.wifi.start()?;
        self.wifi.wait_netif_up()?;
        info!("WiFi: portal AP '{}' up", ap_name);

        let (tx, rx) = mpsc::channel::<PortalSubmission>();
        let mut server = EspHttpServer::new(&HttpConfiguration {
            stack_size: 10 * 1024,
            ..Default::default()
        })?;

        server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
            req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
                .write_all(PORTAL_HTML.as_bytes())?;
            Ok(())
        })?;

        server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
            let len = usize::try_from(req.content_len().unwrap_or(0)).unwrap_or(usize::MAX);
            if len == 0 || len > MAX_PORTAL_BODY {
                req.into_status_response(413)?;
                return Ok(());
            }
            let mut body = vec![0u8; len];
            req.read_exact(&mut body)?;
            match parse_submission(&body) {
                Some(submission) => {
                    let _ = tx.send(submission);
                    req.into_ok_response()?.write_all(b"{\"saved\":true}")?;
                }
                None => {
                    req.into_status_response(400)?
                        .write_all(b"{\"error\":\"invalid form\"}")?;
                }
            }
            Ok(())
        })?;

        let submission = rx.recv_timeout(timeout).ok();
        // Let the browser receive the response before the AP goes away.
        std::thread::sleep(Duration::from_millis(500));
        drop(server);
        let _ = self.wifi.stop();
        Ok(submission)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_portal(&mut self, ap_name: &str, _timeout: Duration) -> Option<PortalSubmission> {
        info!("WiFi(sim): portal '{}' opened", ap_name);
        self.sim_submission.take()
    }
}

#[cfg(target_os = "espidf")]
const PORTAL_HTML: &str = r#"<!doctype html><html><head><meta name="viewport" content="width=device-width">
<title>ColdMonitor setup</title></head><body><h2>ColdMonitor setup</h2>
<form id="f">
<p>WiFi SSID<br><input name="wifi_ssid" maxlength="32" required></p>
<p>WiFi password<br><input name="wifi_password" type="password" maxlength="64"></p>
<p>API URL<br><input name="api_url" maxlength="256" placeholder="https://" required></p>
<p>Device key<br><input name="api_key" maxlength="128" required></p>
<p>Device serial (optional)<br><input name="device_serial" maxlength="32"></p>
<button>Save</button></form><p id="m"></p>
<script>
document.getElementById('f').onsubmit=async e=>{e.preventDefault();
const b=Object.fromEntries(new FormData(e.target));
const r=await fetch('/save',{method:'POST',headers:{'Content-Type':'application/json'},body:JSON.stringify(b)});
document.getElementById('m').textContent=r.ok?'Saved, restarting...':'Invalid input';};
</script></body></html>"#;

// ───────────────────────────────────────────────────────────────
// Port implementations
// ───────────────────────────────────────────────────────────────

impl StationPort for WifiAdapter {
    fn connect(
        &mut self,
        ssid: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(), ConnectivityError> {
        self.remember(ssid, password)?;
        info!(
            "WiFi: connecting to '{}' (password {}, timeout {} s)",
            self.ssid,
            mask_secret(&self.password),
            timeout.as_secs()
        );
        match self.platform_connect(timeout) {
            Ok((rssi, address)) => {
                self.link.set_up(rssi, &address);
                info!("WiFi: connected, ip={} rssi={}", address, rssi);
                Ok(())
            }
            Err(e) => {
                self.link.set_down();
                warn!("WiFi: connect failed: {}", e);
                Err(e)
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        if self.ssid.is_empty() {
            return Err(ConnectivityError::NoCredentials);
        }
        let ssid = self.ssid.clone();
        let password = self.password.clone();
        self.connect(&ssid, &password, Duration::from_secs(10))
    }

    fn forget_credentials(&mut self) {
        self.platform_forget();
        self.ssid.clear();
        self.password.clear();
        self.link.set_down();
        info!("WiFi: stored credentials cleared");
    }

    fn poll_link(&mut self) {
        self.refresh_link();
    }
}

impl ConfigPortal for WifiAdapter {
    fn start(&mut self, ap_name: &str, timeout: Duration) -> Option<PortalSubmission> {
        self.link.set_down();
        self.platform_portal(ap_name, timeout)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
