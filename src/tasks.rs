//! Worker tasks.
//!
//! | Worker           | Period                       | Core | Owns                          |
//! |------------------|------------------------------|------|-------------------------------|
//! | [`DoorWorker`]   | `door_poll_interval_ms`      | App  | DoorEventPipeline             |
//! | [`CaptureWorker`]| `reading_interval_secs`      | App  | ReadingBuffer (producer)      |
//! | [`UplinkWorker`] | 1 s                          | Pro  | DoorDelivery, heartbeat, WiFi |
//! | [`CommandWorker`]| `command_poll_interval_secs` | Pro  | CommandDispatcher             |
//! | [`ResetWatcher`] | 50 ms                        | App  | ResetSequencer                |
//!
//! Each worker is a plain struct with a `tick(now_ms)` step; [`run_every`]
//! turns a step into a thread body.  The steps never sleep, so the loop
//! bodies run on the host against fakes.

use core::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info, warn};

use crate::app::context::SharedSettings;
use crate::app::ports::{
    ActuatorPort, ButtonPort, ConnectivityPort, SensorPort, StationPort, StoragePort, TimePort,
};
use crate::boot::provisioning::ProvisioningStore;
use crate::buffer::ReadingBuffer;
use crate::commands::{CommandDispatcher, CycleOutcome};
use crate::config::{DOOR_BATCH_MIN, READING_BUFFER_CAPACITY, SystemConfig};
use crate::door::{DoorDelivery, DoorEventPipeline, DoorEventQueue, DrainReport, PollOutcome};
use crate::drivers::reset_button::ResetSequencer;
use crate::drivers::watchdog::TaskWatchdog;
use crate::reading::ReadingRecord;
use crate::transport::HttpClient;
use crate::uplink::{HeartbeatSchedule, TelemetryUplink};

/// The reading buffer as shared by the capture and uplink workers.
pub type SharedReadingBuffer<S> = Arc<Mutex<ReadingBuffer<S, READING_BUFFER_CAPACITY>>>;

/// Uplink step period.
pub const UPLINK_TICK_MS: u64 = 1_000;
/// Reset watcher step period.
pub const RESET_TICK_MS: u64 = 50;

/// `true` once `interval_ms` has passed since `last`; `None` counts as due.
fn elapsed(last: Option<u64>, now_ms: u64, interval_ms: u64) -> bool {
    last.is_none_or(|t| now_ms.saturating_sub(t) >= interval_ms)
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drive `step` every `period_ms` until it breaks.  With `watchdog` set the
/// calling thread is subscribed under that name and kicked once per pass.
pub fn run_every<F>(clock: &dyn TimePort, period_ms: u64, watchdog: Option<&'static str>, mut step: F)
where
    F: FnMut(u64) -> ControlFlow<()>,
{
    let watchdog = watchdog.map(TaskWatchdog::subscribe);
    loop {
        let started = clock.uptime_ms();
        if step(started).is_break() {
            break;
        }
        if let Some(wd) = &watchdog {
            wd.kick();
        }
        let spent = clock.uptime_ms().saturating_sub(started);
        clock.delay_ms(period_ms.saturating_sub(spent).max(1));
    }
}

// ───────────────────────────────────────────────────────────────
// Door poller
// ───────────────────────────────────────────────────────────────

/// Samples the contact and feeds the pipeline.  Arms the pipeline once
/// the capture worker has produced a valid reading.
pub struct DoorWorker<S: SensorPort> {
    sensors: S,
    pipeline: DoorEventPipeline,
    link: Arc<dyn ConnectivityPort>,
    clock: Arc<dyn TimePort>,
    first_reading: Arc<AtomicBool>,
}

impl<S: SensorPort> DoorWorker<S> {
    pub fn new(
        sensors: S,
        queue: Arc<DoorEventQueue>,
        link: Arc<dyn ConnectivityPort>,
        clock: Arc<dyn TimePort>,
        first_reading: Arc<AtomicBool>,
        config: &SystemConfig,
    ) -> Self {
        Self {
            sensors,
            pipeline: DoorEventPipeline::new(
                queue,
                config.door_debounce_ms,
                config.door_rate_limit_per_sec,
            ),
            link,
            clock,
            first_reading,
        }
    }

    pub fn pipeline(&self) -> &DoorEventPipeline {
        &self.pipeline
    }

    pub fn tick(&mut self, now_ms: u64) -> PollOutcome {
        if !self.pipeline.is_armed() && self.first_reading.load(Ordering::Acquire) {
            self.pipeline.arm();
        }
        let raw = self.sensors.read_door_raw();
        self.pipeline.poll(
            raw,
            now_ms,
            self.clock.timestamp_ms(),
            self.link.signal_strength(),
        )
    }
}

// ───────────────────────────────────────────────────────────────
// Capture
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Buffered,
    /// Buffer full or slot write failed; the reading is lost.
    Dropped,
    /// Climate acquisition failed; nothing stored.
    Invalid,
}

pub struct CaptureWorker<S: SensorPort, K: StoragePort> {
    sensors: S,
    buffer: SharedReadingBuffer<K>,
    clock: Arc<dyn TimePort>,
    serial: String,
    interval_ms: u64,
    last_capture_ms: Option<u64>,
    first_reading: Arc<AtomicBool>,
}

impl<S: SensorPort, K: StoragePort> CaptureWorker<S, K> {
    pub fn new(
        sensors: S,
        buffer: SharedReadingBuffer<K>,
        clock: Arc<dyn TimePort>,
        serial: impl Into<String>,
        first_reading: Arc<AtomicBool>,
        config: &SystemConfig,
    ) -> Self {
        Self {
            sensors,
            buffer,
            clock,
            serial: serial.into(),
            interval_ms: u64::from(config.reading_interval_secs) * 1000,
            last_capture_ms: None,
            first_reading,
        }
    }

    /// Capture when due.  `None` when not yet due.
    pub fn tick(&mut self, now_ms: u64) -> Option<CaptureOutcome> {
        if !elapsed(self.last_capture_ms, now_ms, self.interval_ms) {
            return None;
        }
        self.last_capture_ms = Some(now_ms);
        Some(self.capture())
    }

    fn capture(&mut self) -> CaptureOutcome {
        let snapshot = self.sensors.read_all();
        if !snapshot.valid {
            warn!("Capture: climate reading invalid, skipping");
            return CaptureOutcome::Invalid;
        }
        let power = self.sensors.read_power();
        let record = ReadingRecord::new(
            &self.serial,
            &snapshot,
            snapshot.door_open,
            &power,
            self.clock.timestamp_ms(),
        );
        let json = match record.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Capture: encode failed: {}", e);
                return CaptureOutcome::Dropped;
            }
        };

        if !self.first_reading.swap(true, Ordering::AcqRel) {
            info!("Capture: first valid reading, door events enabled");
        }

        let mut buffer = lock(&self.buffer);
        if buffer.add(&json) {
            info!(
                "Capture: T={:.1}C H={:.1}% buffered ({}/{})",
                snapshot.temperature_c,
                snapshot.humidity_pct,
                buffer.count(),
                buffer.capacity()
            );
            CaptureOutcome::Buffered
        } else {
            warn!("Capture: reading buffer full, reading dropped");
            CaptureOutcome::Dropped
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Uplink
// ───────────────────────────────────────────────────────────────

/// What one uplink step did.  `None` fields were not due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UplinkReport {
    pub door: DrainReport,
    pub readings_uploaded: Option<usize>,
    pub heartbeat_ok: Option<bool>,
    pub settings_ok: Option<bool>,
    pub reconnect_ok: Option<bool>,
}

pub struct UplinkWorker<C: HttpClient, K: StoragePort, W: StationPort> {
    uplink: TelemetryUplink<C>,
    station: W,
    queue: Arc<DoorEventQueue>,
    delivery: DoorDelivery,
    buffer: SharedReadingBuffer<K>,
    heartbeat: HeartbeatSchedule,
    settings: SharedSettings,
    upload_interval_ms: u64,
    settings_interval_ms: u64,
    reconnect_interval_ms: u64,
    last_upload_ms: Option<u64>,
    last_settings_ms: Option<u64>,
    last_reconnect_ms: Option<u64>,
    was_online: bool,
}

impl<C: HttpClient, K: StoragePort, W: StationPort> UplinkWorker<C, K, W> {
    pub fn new(
        uplink: TelemetryUplink<C>,
        station: W,
        queue: Arc<DoorEventQueue>,
        buffer: SharedReadingBuffer<K>,
        settings: SharedSettings,
        config: &SystemConfig,
    ) -> Self {
        Self {
            uplink,
            station,
            queue,
            delivery: DoorDelivery::new(),
            buffer,
            heartbeat: HeartbeatSchedule::new(config.heartbeat_base_secs, config.heartbeat_max_secs),
            settings,
            upload_interval_ms: u64::from(config.upload_interval_secs) * 1000,
            settings_interval_ms: u64::from(config.settings_interval_secs) * 1000,
            reconnect_interval_ms: u64::from(config.wifi_reconnect_interval_secs) * 1000,
            last_upload_ms: None,
            last_settings_ms: None,
            last_reconnect_ms: None,
            was_online: false,
        }
    }

    pub fn heartbeat_schedule(&self) -> &HeartbeatSchedule {
        &self.heartbeat
    }

    pub fn delivery(&self) -> &DoorDelivery {
        &self.delivery
    }

    pub fn tick(&mut self, now_ms: u64) -> UplinkReport {
        let mut report = UplinkReport::default();

        self.station.poll_link();
        if !self.link().is_connected() {
            if elapsed(self.last_reconnect_ms, now_ms, self.reconnect_interval_ms) {
                self.last_reconnect_ms = Some(now_ms);
                let ok = match self.station.reconnect() {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Uplink: WiFi reconnect failed: {}", e);
                        false
                    }
                };
                report.reconnect_ok = Some(ok);
            }
        }

        let online = self.link().is_connected();
        if online && !self.was_online {
            info!("Uplink: link up, heartbeat due now");
            self.heartbeat.restart();
        }
        self.was_online = online;

        if online {
            report.door = self.drain_door_events();
            report.readings_uploaded = self.upload_readings(now_ms);
        }

        // Offline ticks leave the backoff alone; only attempts that could
        // reach the API move it.
        if self.heartbeat.is_due(now_ms) {
            if online {
                let rssi = self.link().signal_strength();
                let ip = self.link().local_address();
                let ok = self.uplink.heartbeat(rssi, &ip).is_ok();
                self.heartbeat.record(now_ms, ok);
                if !ok {
                    info!("Uplink: next heartbeat in {} s", self.heartbeat.interval_ms() / 1000);
                }
                report.heartbeat_ok = Some(ok);
            } else {
                self.uplink.note_offline();
            }
        }

        if online
            && elapsed(self.last_settings_ms, now_ms, self.settings_interval_ms)
        {
            self.last_settings_ms = Some(now_ms);
            let ok = match self.uplink.fetch_settings() {
                Ok(settings) => {
                    self.settings.set(settings);
                    true
                }
                Err(e) => {
                    warn!("Uplink: settings sync failed: {}", e);
                    false
                }
            };
            report.settings_ok = Some(ok);
        }

        report
    }

    fn link(&self) -> &dyn ConnectivityPort {
        self.uplink.client().link()
    }

    fn drain_door_events(&mut self) -> DrainReport {
        let uplink = &self.uplink;
        if self.delivery.holds_batch() || self.queue.len() >= DOOR_BATCH_MIN {
            self.delivery
                .drain_batch(&self.queue, |batch| uplink.upload_door_events_batch(batch).ok())
        } else {
            self.delivery
                .drain(&self.queue, |ev| uplink.upload_door_event(ev).is_ok())
        }
    }

    /// First pass with buffered readings, then every upload interval.
    fn upload_readings(&mut self, now_ms: u64) -> Option<usize> {
        let due = match self.last_upload_ms {
            None => !lock(&self.buffer).is_empty(),
            Some(t) => now_ms.saturating_sub(t) >= self.upload_interval_ms,
        };
        if !due {
            return None;
        }
        self.last_upload_ms = Some(now_ms);
        Some(self.uplink.upload_backlog(&*self.buffer))
    }
}

// ───────────────────────────────────────────────────────────────
// Commands
// ───────────────────────────────────────────────────────────────

pub struct CommandWorker<C: HttpClient, A: ActuatorPort> {
    dispatcher: CommandDispatcher<C, A>,
    interval_ms: u64,
    last_poll_ms: Option<u64>,
}

impl<C: HttpClient, A: ActuatorPort> CommandWorker<C, A> {
    pub fn new(dispatcher: CommandDispatcher<C, A>, config: &SystemConfig) -> Self {
        Self {
            dispatcher,
            interval_ms: u64::from(config.command_poll_interval_secs) * 1000,
            last_poll_ms: None,
        }
    }

    /// One dispatcher cycle when due; skipped while offline.
    pub fn tick(&mut self, now_ms: u64, online: bool) -> Option<CycleOutcome> {
        if !online || !elapsed(self.last_poll_ms, now_ms, self.interval_ms) {
            return None;
        }
        self.last_poll_ms = Some(now_ms);
        Some(self.dispatcher.run_cycle(now_ms))
    }
}

// ───────────────────────────────────────────────────────────────
// Reset watcher
// ───────────────────────────────────────────────────────────────

/// Runtime two-step reset.  On trigger the provisioning record is wiped
/// and the station drops its cached credentials; the caller restarts.
pub struct ResetWatcher<B: ButtonPort, K: StoragePort, W: StationPort> {
    buttons: B,
    storage: K,
    station: W,
    sequencer: ResetSequencer,
}

impl<B: ButtonPort, K: StoragePort, W: StationPort> ResetWatcher<B, K, W> {
    pub fn new(buttons: B, storage: K, station: W, config: &SystemConfig) -> Self {
        Self {
            buttons,
            storage,
            station,
            sequencer: ResetSequencer::new(config.reset_boot_window_ms, config.reset_hold_ms),
        }
    }

    /// `true` once the reset completed and a restart is due.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        let boot = self.buttons.boot_pressed();
        let reset = self.buttons.reset_pressed();
        let triggered = self.sequencer.update(boot, reset, now_ms);
        self.buttons.set_indicator(self.sequencer.indicator(now_ms));
        if !triggered {
            return false;
        }

        warn!("Reset: factory reset requested, wiping provisioning");
        if let Err(e) = ProvisioningStore::new(&mut self.storage).wipe() {
            error!("Reset: wipe failed: {}", e);
        }
        self.station.forget_credentials();
        true
    }
}
