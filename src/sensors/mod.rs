//! Sensor subsystem: individual drivers and the aggregating [`SensorHub`].
//!
//! The hub owns every sensor driver and produces a [`SensorSnapshot`] per
//! capture plus a [`PowerSample`] for the supply state.  The door contact
//! is read raw here; debouncing belongs to the door pipeline.

pub mod battery;
pub mod climate;

#[cfg(not(target_os = "espidf"))]
use core::sync::atomic::{AtomicBool, Ordering};

use log::warn;

use crate::app::ports::{PowerSample, SensorSnapshot};
#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;
use crate::pins;
use battery::BatteryMonitor;
use climate::ClimateSensor;

/// Host-side door contact level (`true` = open).
#[cfg(not(target_os = "espidf"))]
static SIM_DOOR_OPEN: AtomicBool = AtomicBool::new(false);

#[cfg(not(target_os = "espidf"))]
pub fn sim_set_door_open(open: bool) {
    SIM_DOOR_OPEN.store(open, Ordering::Relaxed);
}

/// Aggregates all sensor drivers.
pub struct SensorHub {
    pub climate: ClimateSensor,
    pub battery: BatteryMonitor,
    door_gpio: i32,
    last_good: Option<SensorSnapshot>,
}

impl SensorHub {
    /// Construct a new hub.  Pass in pre-built drivers (built in main
    /// where peripheral ownership is established).
    pub fn new(climate: ClimateSensor, battery: BatteryMonitor, door_gpio: i32) -> Self {
        Self {
            climate,
            battery,
            door_gpio,
            last_good: None,
        }
    }

    /// Raw contact level mapped to door state.
    #[cfg(target_os = "espidf")]
    pub fn door_open_raw(&self) -> bool {
        hw_init::gpio_read(self.door_gpio) == pins::DOOR_OPEN_LEVEL_HIGH
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn door_open_raw(&self) -> bool {
        let _ = (self.door_gpio, pins::DOOR_OPEN_LEVEL_HIGH);
        SIM_DOOR_OPEN.load(Ordering::Relaxed)
    }

    /// Read every sensor.
    ///
    /// A failed climate conversion yields `valid = false` with the previous
    /// good values, so a single flaky read does not zero the dashboard.
    pub fn read_all(&mut self, now_ms: u64) -> SensorSnapshot {
        let door_open = self.door_open_raw();
        match self.climate.read(now_ms) {
            Ok(c) => {
                let snap = SensorSnapshot {
                    temperature_c: c.temperature_c,
                    humidity_pct: c.humidity_pct,
                    pressure_hpa: None,
                    door_open,
                    valid: true,
                };
                self.last_good = Some(snap);
                snap
            }
            Err(e) => {
                warn!("Sensors: climate read failed: {:?}", e);
                let mut snap = self.last_good.unwrap_or_default();
                snap.door_open = door_open;
                snap.valid = false;
                snap
            }
        }
    }

    /// The board has no mains sense line; it reports mains present.
    pub fn read_power(&mut self) -> PowerSample {
        let b = self.battery.read();
        PowerSample {
            mains_present: true,
            battery_percent: b.percent,
            battery_voltage: b.volts,
        }
    }
}
