//! Mock adapters for integration tests.
//!
//! Every mock keeps its state behind `Arc` (or is cheap to inspect before
//! being moved) so a test can hold a handle while the component under
//! test owns a clone.  Nothing here touches GPIO, NVS flash or sockets.

#![allow(dead_code)]

use core::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use coldmonitor::adapters::nvs::NvsAdapter;
use coldmonitor::app::ports::{
    ActuatorPort, ButtonPort, ConfigPortal, ConnectivityError, ConnectivityPort, PortalSubmission,
    PowerSample, SensorPort, SensorSnapshot, StationPort, StorageError, StoragePort, SystemPort,
    TimePort,
};
use coldmonitor::boot::provisioning::ApiCredentials;
use coldmonitor::commands::types::CommandType;
use coldmonitor::error::{ActuatorError, TransportError};
use coldmonitor::transport::{HttpClient, HttpRequest, HttpResponse, Method, TransportGate};
use serde_json::{Map, Value, json};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Clock ─────────────────────────────────────────────────────

/// Manual clock.  `delay_ms` advances time instead of sleeping, so gate
/// cooldowns and boot windows run instantly.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimePort for FakeClock {
    fn uptime_ms(&self) -> u64 {
        self.now()
    }

    fn unix_time_ms(&self) -> Option<u64> {
        None
    }

    fn delay_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

// ── Storage ───────────────────────────────────────────────────

/// Simulated NVS that can be told to reject writes.
#[derive(Clone)]
pub struct MockStorage {
    inner: NvsAdapter,
    fail_writes: Arc<AtomicBool>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self {
            inner: NvsAdapter::new().expect("sim NVS"),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Full)
        } else {
            Ok(())
        }
    }
}

impl StoragePort for MockStorage {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(namespace, key)
    }

    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.put(namespace, key, value)
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.inner.remove(namespace, key)
    }

    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        self.inner.erase_namespace(namespace)
    }

    fn get_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get_blob(namespace, key)
    }

    fn put_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.put_blob(namespace, key, data)
    }
}

// ── Link and radio ────────────────────────────────────────────

/// Link status a test flips by hand.
#[derive(Debug)]
pub struct MockLink {
    connected: AtomicBool,
    rssi: AtomicI32,
    address: Mutex<String>,
}

impl MockLink {
    pub fn online() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            rssi: AtomicI32::new(-61),
            address: Mutex::new("10.0.0.42".into()),
        })
    }

    pub fn offline() -> Arc<Self> {
        let link = Self::online();
        link.set_connected(false);
        link
    }

    pub fn set_connected(&self, up: bool) {
        self.connected.store(up, Ordering::SeqCst);
    }
}

impl ConnectivityPort for MockLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn signal_strength(&self) -> i32 {
        if self.is_connected() {
            self.rssi.load(Ordering::SeqCst)
        } else {
            0
        }
    }

    fn local_address(&self) -> String {
        if self.is_connected() {
            lock(&self.address).clone()
        } else {
            String::new()
        }
    }
}

/// Station plus portal on one fake radio.  Joining brings [`MockLink`] up.
pub struct MockNetwork {
    link: Arc<MockLink>,
    pub reachable: bool,
    pub submission: Option<PortalSubmission>,
    pub joined: Vec<String>,
    pub forgets: usize,
    pub portal_opens: Vec<String>,
    pub reconnects: usize,
    remembered: bool,
}

impl MockNetwork {
    pub fn new(link: Arc<MockLink>) -> Self {
        Self {
            link,
            reachable: true,
            submission: None,
            joined: Vec::new(),
            forgets: 0,
            portal_opens: Vec::new(),
            reconnects: 0,
            remembered: false,
        }
    }

    /// As if an earlier connect had succeeded.
    pub fn remembering(mut self) -> Self {
        self.remembered = true;
        self
    }
}

impl StationPort for MockNetwork {
    fn connect(
        &mut self,
        ssid: &str,
        _password: &str,
        _timeout: Duration,
    ) -> Result<(), ConnectivityError> {
        self.joined.push(ssid.to_string());
        self.link.set_connected(self.reachable);
        if self.reachable {
            self.remembered = true;
            Ok(())
        } else {
            Err(ConnectivityError::Timeout)
        }
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        self.reconnects += 1;
        if !self.remembered {
            return Err(ConnectivityError::NoCredentials);
        }
        self.link.set_connected(self.reachable);
        if self.reachable {
            Ok(())
        } else {
            Err(ConnectivityError::ConnectionFailed)
        }
    }

    fn forget_credentials(&mut self) {
        self.forgets += 1;
        self.remembered = false;
    }
}

impl ConfigPortal for MockNetwork {
    fn start(&mut self, ap_name: &str, _timeout: Duration) -> Option<PortalSubmission> {
        self.portal_opens.push(ap_name.to_string());
        self.submission.take()
    }
}

/// A complete, valid portal save.
pub fn submission() -> PortalSubmission {
    PortalSubmission {
        wifi_ssid: "ColdRoom".into(),
        wifi_password: "hunter22".into(),
        api_url: "https://api.example.com/".into(),
        api_key: "abcdef123456".into(),
        device_serial: "CM-0001".into(),
    }
}

pub fn api() -> ApiCredentials {
    ApiCredentials {
        base_url: "https://api.example.com".into(),
        device_key: "abcdef123456".into(),
    }
}

// ── Buttons ───────────────────────────────────────────────────

/// Buttons driven by a function of the clock: `script(now) -> (boot, reset)`.
pub struct MockButtons {
    clock: Arc<FakeClock>,
    script: Box<dyn Fn(u64) -> (bool, bool) + Send>,
    pub indicator: bool,
    pub indicator_on_count: usize,
}

impl MockButtons {
    pub fn new(clock: Arc<FakeClock>, script: impl Fn(u64) -> (bool, bool) + Send + 'static) -> Self {
        Self {
            clock,
            script: Box::new(script),
            indicator: false,
            indicator_on_count: 0,
        }
    }

    pub fn idle(clock: Arc<FakeClock>) -> Self {
        Self::new(clock, |_| (false, false))
    }
}

impl ButtonPort for MockButtons {
    fn boot_pressed(&mut self) -> bool {
        (self.script)(self.clock.now()).0
    }

    fn reset_pressed(&mut self) -> bool {
        (self.script)(self.clock.now()).1
    }

    fn set_indicator(&mut self, on: bool) {
        if on && !self.indicator {
            self.indicator_on_count += 1;
        }
        self.indicator = on;
    }
}

// ── Sensors ───────────────────────────────────────────────────

pub struct MockSensors {
    pub door_open: bool,
    pub snapshot: SensorSnapshot,
    pub power: PowerSample,
}

impl MockSensors {
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            door_open: false,
            snapshot: SensorSnapshot {
                temperature_c: -18.2,
                humidity_pct: 71.5,
                pressure_hpa: None,
                door_open: false,
                valid: true,
            },
            power: PowerSample {
                mains_present: true,
                battery_percent: 96,
                battery_voltage: 4.12,
            },
        }))
    }
}

impl SensorPort for MockSensors {
    fn read_door_raw(&mut self) -> bool {
        self.door_open
    }

    fn read_all(&mut self) -> SensorSnapshot {
        SensorSnapshot {
            door_open: self.door_open,
            ..self.snapshot
        }
    }

    fn read_power(&mut self) -> PowerSample {
        self.power
    }
}

// ── Actuator and system ───────────────────────────────────────

/// Records every command; answers like the refrigeration controller or
/// fails with `fail`.
#[derive(Debug, Default)]
pub struct MockActuator {
    pub calls: Vec<CommandType>,
    pub fail: Option<ActuatorError>,
}

impl MockActuator {
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }
}

impl ActuatorPort for MockActuator {
    fn write_command(
        &mut self,
        command: CommandType,
        _parameters: &Map<String, Value>,
    ) -> Result<Value, ActuatorError> {
        self.calls.push(command);
        if let Some(e) = self.fail {
            return Err(e);
        }
        match command {
            CommandType::DefrostStart => Ok(json!({ "status": "defrost_started" })),
            CommandType::ReadTemperature => Ok(json!({ "temperature": -18.5 })),
            CommandType::Unknown => Err(ActuatorError::UnknownCommand),
        }
    }
}

/// Free heap readings, consumed one per query; the last one repeats.
#[derive(Debug)]
pub struct MockSystem {
    readings: Mutex<Vec<u32>>,
}

impl MockSystem {
    pub fn with_heap(bytes: u32) -> Arc<Self> {
        Self::sequence(&[bytes])
    }

    pub fn sequence(readings: &[u32]) -> Arc<Self> {
        Arc::new(Self {
            readings: Mutex::new(readings.to_vec()),
        })
    }
}

impl SystemPort for MockSystem {
    fn free_heap_bytes(&self) -> u32 {
        let mut readings = lock(&self.readings);
        if readings.len() > 1 {
            readings.remove(0)
        } else {
            readings.first().copied().unwrap_or(0)
        }
    }
}

// ── HTTP ──────────────────────────────────────────────────────

/// One request as the server saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub device_key: String,
    pub body: Option<String>,
}

impl RecordedCall {
    pub fn body_json(&self) -> Value {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_str(b).ok())
            .unwrap_or(Value::Null)
    }
}

type Responder = Box<dyn FnMut(&RecordedCall) -> Result<HttpResponse, TransportError> + Send>;

struct ScriptState {
    calls: Vec<RecordedCall>,
    responder: Responder,
}

/// Scripted server shared between a test and its [`MockHttp`] client.
/// Answers `200 {}` until told otherwise.
#[derive(Clone)]
pub struct HttpScript(Arc<Mutex<ScriptState>>);

impl HttpScript {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(ScriptState {
            calls: Vec::new(),
            responder: Box::new(|_| Ok(reply(200, "{}"))),
        })))
    }

    /// Replace the responder.  It must not call back into the script.
    pub fn respond(
        &self,
        f: impl FnMut(&RecordedCall) -> Result<HttpResponse, TransportError> + Send + 'static,
    ) {
        lock(&self.0).responder = Box::new(f);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.0).calls.clone()
    }

    /// Calls whose URL contains `fragment`.
    pub fn calls_to(&self, fragment: &str) -> Vec<RecordedCall> {
        lock(&self.0)
            .calls
            .iter()
            .filter(|c| c.url.contains(fragment))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.0).calls.clear();
    }

    pub fn client(&self) -> MockHttp {
        MockHttp(self.clone())
    }
}

pub struct MockHttp(HttpScript);

impl HttpClient for MockHttp {
    fn execute(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
        let call = RecordedCall {
            method: request.method,
            url: request.url.to_string(),
            device_key: request.device_key.to_string(),
            body: request.body.map(str::to_string),
        };
        let mut state = lock(&(self.0).0);
        state.calls.push(call.clone());
        (state.responder)(&call)
    }
}

pub fn reply(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string(),
    }
}

pub fn gate(script: &HttpScript, clock: Arc<FakeClock>) -> Arc<TransportGate<MockHttp>> {
    Arc::new(TransportGate::new(script.client(), clock))
}
