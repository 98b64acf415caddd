//! Hardware adapter: bridges real peripherals to domain port traits.
//!
//! Owns the [`SensorHub`], both buttons and the status LED, exposing them
//! through [`SensorPort`] and [`ButtonPort`].  This is the only module in
//! the system that touches sensor and button hardware.  On non-espidf
//! targets, the underlying drivers use cfg-gated simulation stubs.
//!
//! Boot borrows the adapter for the reset check; afterwards it is wrapped
//! in `Arc<Mutex<_>>` and shared by the sensor worker and the reset
//! watcher.

use crate::app::ports::{ButtonPort, PowerSample, SensorPort, SensorSnapshot, TimePort};
use crate::drivers::button::ButtonDriver;
use crate::drivers::status_led::StatusLed;
use crate::pins;
use crate::sensors::SensorHub;
use crate::sensors::battery::BatteryMonitor;
use crate::sensors::climate::ClimateSensor;

use std::sync::Arc;

/// Concrete adapter that combines board I/O behind port traits.
pub struct HardwareAdapter {
    sensor_hub: SensorHub,
    boot_button: ButtonDriver,
    reset_button: ButtonDriver,
    led: StatusLed,
    clock: Arc<dyn TimePort>,
}

impl HardwareAdapter {
    pub fn new(
        sensor_hub: SensorHub,
        boot_button: ButtonDriver,
        reset_button: ButtonDriver,
        led: StatusLed,
        clock: Arc<dyn TimePort>,
    ) -> Self {
        Self {
            sensor_hub,
            boot_button,
            reset_button,
            led,
            clock,
        }
    }

    /// Adapter wired to the board pin map.
    pub fn with_board_pins(clock: Arc<dyn TimePort>) -> Self {
        Self::new(
            SensorHub::new(
                ClimateSensor::new(pins::DHT_DATA_GPIO),
                BatteryMonitor::new(pins::BATTERY_ADC_CHANNEL),
                pins::DOOR_GPIO,
            ),
            ButtonDriver::new(pins::BOOT_BUTTON_GPIO),
            ButtonDriver::new(pins::RESET_BUTTON_GPIO),
            StatusLed::new(pins::STATUS_LED_GPIO),
            clock,
        )
    }

    pub fn indicator_on(&self) -> bool {
        self.led.is_on()
    }
}

// ── SensorPort implementation ─────────────────────────────────

impl SensorPort for HardwareAdapter {
    fn read_door_raw(&mut self) -> bool {
        self.sensor_hub.door_open_raw()
    }

    fn read_all(&mut self) -> SensorSnapshot {
        let now = self.clock.uptime_ms();
        self.sensor_hub.read_all(now)
    }

    fn read_power(&mut self) -> PowerSample {
        self.sensor_hub.read_power()
    }
}

// ── ButtonPort implementation ─────────────────────────────────

impl ButtonPort for HardwareAdapter {
    fn boot_pressed(&mut self) -> bool {
        self.boot_button.is_pressed()
    }

    fn reset_pressed(&mut self) -> bool {
        self.reset_button.is_pressed()
    }

    fn set_indicator(&mut self, on: bool) {
        self.led.set(on);
    }
}
