//! ColdMonitor firmware entry point.
//!
//! Boot once, then hand every subsystem to its own pinned worker thread.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareAdapter    NvsAdapter     Esp32TimeAdapter  Esp32System│
//! │  (Sensor+Button)    (Storage)      (TimePort)        (System)  │
//! │  WifiAdapter        LinkMonitor    ModbusController            │
//! │  (Station+Portal)   (Connectivity) (Actuator)                  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  BootController ──▶ RUN                                        │
//! │     door ─▶ DoorEventQueue ─▶ uplink ─▶ TransportGate ─▶ API   │
//! │  capture ─▶ ReadingBuffer  ─▶ uplink                           │
//! │  commands ─▶ CommandDispatcher ─▶ TransportGate / controller   │
//! │  main thread: ResetWatcher                                     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use core::ops::ControlFlow;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info, warn};

use coldmonitor::adapters::controller::{ModbusController, UartLink};
use coldmonitor::adapters::device_id::DeviceIdentity;
use coldmonitor::adapters::hardware::HardwareAdapter;
use coldmonitor::adapters::nvs::NvsAdapter;
use coldmonitor::adapters::system::{self, Esp32System};
use coldmonitor::adapters::time::{self, Esp32TimeAdapter};
use coldmonitor::adapters::wifi::{LinkMonitor, WifiAdapter};
use coldmonitor::app::context::DeviceContext;
use coldmonitor::app::ports::{ConnectivityPort, SystemPort, TimePort};
use coldmonitor::app::status::SharedStatus;
use coldmonitor::boot::{BootController, BootPorts, RestartReason, RunMode};
use coldmonitor::buffer::ReadingBuffer;
use coldmonitor::commands::CommandDispatcher;
use coldmonitor::config::FIRMWARE_VERSION;
use coldmonitor::door::DoorEventQueue;
use coldmonitor::drivers::hw_init;
use coldmonitor::drivers::task_pin::{self, TaskSpec};
use coldmonitor::pins;
use coldmonitor::tasks::{
    CaptureWorker, CommandWorker, DoorWorker, RESET_TICK_MS, ResetWatcher, UPLINK_TICK_MS,
    UplinkWorker, run_every,
};
use coldmonitor::transport::TransportGate;
use coldmonitor::transport::esp::EspHttpClient;
use coldmonitor::uplink::{ApiClient, GatedHandshake, TelemetryUplink};

/// Capture checks its interval once a second.
const CAPTURE_TICK_MS: u64 = 1_000;
/// Command worker wakes this often and polls when its interval is due.
const COMMAND_TICK_MS: u64 = 1_000;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  ColdMonitor v{}                     ║", FIRMWARE_VERSION);
    info!("╚══════════════════════════════════════╝");

    hw_init::init_peripherals().map_err(|e| anyhow::anyhow!("HAL init failed: {e}"))?;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // ── 2. Storage and config ─────────────────────────────────
    let mut nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {e}"))?;
    let config = nvs.load_config();

    // ── 3. Adapters ───────────────────────────────────────────
    let clock = Arc::new(Esp32TimeAdapter::new());
    let system_port: Arc<dyn SystemPort> = Arc::new(Esp32System::new());
    let status = SharedStatus::new();

    let identity = DeviceIdentity::read();
    info!("Device ID: {} (MAC {})", identity.hardware_id(), identity.mac());

    let link = Arc::new(LinkMonitor::new());
    let link_port: Arc<dyn ConnectivityPort> = link.clone();
    let mut wifi = WifiAdapter::new(
        peripherals.modem,
        sysloop,
        Some(nvs_partition),
        link.clone(),
    )
    .context("WiFi driver init")?;
    let mut hardware = HardwareAdapter::with_board_pins(clock.clone());
    let gate = Arc::new(TransportGate::new(EspHttpClient::new(), clock.clone()));

    // ── 4. Boot ───────────────────────────────────────────────
    let mut handshake =
        GatedHandshake::new(gate.clone(), link_port.clone(), identity.mac(), status.clone());
    let mut boot = BootController::new(config.clone(), status.clone(), identity.hardware_id());
    let mode = boot.run(&mut BootPorts {
        storage: &mut nvs,
        buttons: &mut hardware,
        network: &mut wifi,
        handshake: &mut handshake,
        clock: &*clock,
    });

    let session = match mode {
        RunMode::Run(session) => session,
        RunMode::RequestRestart(reason) => {
            match reason {
                RestartReason::FactoryReset => warn!("Factory reset complete"),
                RestartReason::ProvisioningSaved => info!("Provisioning saved"),
            }
            clock.delay_ms(500);
            system::restart();
        }
        RunMode::PortalActive => {
            warn!("Portal closed without configuration, restarting");
            clock.delay_ms(500);
            system::restart();
        }
    };

    let _sntp = time::start_sntp();

    // ── 5. Shared state ───────────────────────────────────────
    let ctx = DeviceContext::new(
        config.clone(),
        session.serial,
        identity.mac().into(),
        session.api,
        status,
    );
    info!("Running as {} (firmware {})", ctx.serial, ctx.firmware_version);

    let hardware = Arc::new(Mutex::new(hardware));
    let wifi = Arc::new(Mutex::new(wifi));
    let queue = Arc::new(DoorEventQueue::new());
    let buffer = Arc::new(Mutex::new(ReadingBuffer::new(nvs.clone())));
    let first_reading = Arc::new(AtomicBool::new(false));

    // ── 6. Workers ────────────────────────────────────────────
    let mut door = DoorWorker::new(
        hardware.clone(),
        queue.clone(),
        link_port.clone(),
        clock.clone(),
        first_reading.clone(),
        &config,
    );
    let door_clock = clock.clone();
    let door_period = u64::from(config.door_poll_interval_ms);
    task_pin::spawn(TaskSpec::DOOR, move || {
        run_every(&*door_clock, door_period, Some("door"), |now| {
            door.tick(now);
            ControlFlow::Continue(())
        });
    })?;

    let mut capture = CaptureWorker::new(
        hardware.clone(),
        buffer.clone(),
        clock.clone(),
        ctx.serial.clone(),
        first_reading,
        &config,
    );
    let capture_clock = clock.clone();
    task_pin::spawn(TaskSpec::CAPTURE, move || {
        run_every(&*capture_clock, CAPTURE_TICK_MS, Some("capture"), |now| {
            capture.tick(now);
            ControlFlow::Continue(())
        });
    })?;

    let mut uplink = UplinkWorker::new(
        TelemetryUplink::from_context(gate.clone(), link_port.clone(), &ctx),
        wifi.clone(),
        queue,
        buffer,
        ctx.settings.clone(),
        &config,
    );
    let uplink_clock = clock.clone();
    task_pin::spawn(TaskSpec::UPLINK, move || {
        run_every(&*uplink_clock, UPLINK_TICK_MS, None, |now| {
            uplink.tick(now);
            ControlFlow::Continue(())
        });
    })?;

    let controller = ModbusController::new(
        UartLink::new(pins::RS485_UART_PORT, pins::RS485_DE_GPIO),
        pins::RS485_SLAVE_ID,
    );
    let client = ApiClient::new(gate, link_port.clone(), ctx.api.clone(), ctx.serial.clone());
    let mut commands = CommandWorker::new(
        CommandDispatcher::new(client, controller, system_port, &config),
        &config,
    );
    let command_clock = clock.clone();
    let command_link = link_port;
    task_pin::spawn(TaskSpec::COMMANDS, move || {
        run_every(&*command_clock, COMMAND_TICK_MS, None, |now| {
            commands.tick(now, command_link.is_connected());
            ControlFlow::Continue(())
        });
    })?;

    // ── 7. Reset watcher (main thread) ────────────────────────
    info!("System ready");
    let mut watcher = ResetWatcher::new(hardware, nvs, wifi, &config);
    run_every(&*clock, RESET_TICK_MS, Some("reset"), |now| {
        if watcher.tick(now) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    error!("Factory reset from running state, restarting");
    clock.delay_ms(500);
    system::restart();
}
