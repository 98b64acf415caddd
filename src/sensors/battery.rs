//! Li-ion battery monitor: divider voltage on ADC1, linear 3.0 V - 4.2 V
//! state of charge.
//!
//! On host/test: reads from a static AtomicU16 for injection.

#[cfg(not(target_os = "espidf"))]
use core::sync::atomic::{AtomicU16, Ordering};

#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;
use crate::pins;

/// ~3.9 V at the cell.
#[cfg(not(target_os = "espidf"))]
static SIM_BATTERY_ADC: AtomicU16 = AtomicU16::new(2420);

#[cfg(not(target_os = "espidf"))]
pub fn sim_set_battery_adc(raw: u16) {
    SIM_BATTERY_ADC.store(raw, Ordering::Relaxed);
}

const ADC_MAX: f32 = 4095.0;
const V_REF: f32 = 3.3;
pub const FULL_VOLTS: f32 = 4.2;
pub const EMPTY_VOLTS: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub volts: f32,
    pub percent: u8,
}

pub fn adc_to_volts(raw: u16) -> f32 {
    f32::from(raw) * pins::BATTERY_DIVIDER_RATIO * V_REF / ADC_MAX
}

pub fn volts_to_percent(volts: f32) -> u8 {
    if volts >= FULL_VOLTS {
        return 100;
    }
    if volts <= EMPTY_VOLTS {
        return 0;
    }
    let fraction = (volts - EMPTY_VOLTS) / (FULL_VOLTS - EMPTY_VOLTS);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = (fraction * 100.0) as u8;
    percent.min(100)
}

pub struct BatteryMonitor {
    _adc_channel: u32,
}

impl BatteryMonitor {
    pub fn new(adc_channel: u32) -> Self {
        Self {
            _adc_channel: adc_channel,
        }
    }

    pub fn read(&self) -> BatteryReading {
        let volts = adc_to_volts(self.read_adc());
        BatteryReading {
            volts,
            percent: volts_to_percent(volts),
        }
    }

    #[cfg(target_os = "espidf")]
    fn read_adc(&self) -> u16 {
        hw_init::adc1_read(self._adc_channel).unwrap_or(0)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_adc(&self) -> u16 {
        SIM_BATTERY_ADC.load(Ordering::Relaxed)
    }
}
