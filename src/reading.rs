//! Serialized climate reading, the unit stored in the reading buffer.

use serde::Serialize;

use crate::app::ports::{PowerSample, SensorSnapshot};
use crate::error::ProtocolError;

/// Body of `POST /readings/devices/{serial}/readings`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRecord<'a> {
    pub device_id: &'a str,
    pub temperature: f32,
    pub humidity: f32,
    pub door_status: bool,
    pub power_status: bool,
    pub battery_level: u8,
    pub battery_voltage: f32,
    /// UTC ms when synced, else uptime ms.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f32>,
}

impl<'a> ReadingRecord<'a> {
    pub fn new(
        device_id: &'a str,
        sensors: &SensorSnapshot,
        door_open: bool,
        power: &PowerSample,
        timestamp: u64,
    ) -> Self {
        Self {
            device_id,
            temperature: round1(sensors.temperature_c),
            humidity: round1(sensors.humidity_pct),
            door_status: door_open,
            power_status: power.mains_present,
            battery_level: power.battery_percent,
            battery_voltage: power.battery_voltage,
            timestamp,
            pressure: sensors.pressure_hpa.filter(|p| *p > 0.0).map(round1),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|_| ProtocolError::Encode)
    }
}

/// Round to one decimal place.
fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}
