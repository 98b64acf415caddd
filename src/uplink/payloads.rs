//! Request and response schemas, one struct per endpoint.
//!
//! | Endpoint                                  | Request             | Response           |
//! |-------------------------------------------|---------------------|--------------------|
//! | POST /readings/devices/{s}/readings       | `ReadingRecord`     | -                  |
//! | POST /readings/devices/{s}/door-events    | `DoorEventBody`     | -                  |
//! | POST /readings/devices/{s}/door-events    | `DoorBatchBody`     | -                  |
//! | POST /devices/heartbeat                   | `HeartbeatBody`     | -                  |
//! | GET  /devices/settings                    | -                   | `SettingsResponse` |
//! | GET  /devices/commands/pending            | -                   | `PendingCommands`  |
//! | PATCH /devices/commands/{id}/complete     | `CompletionBody`    | -                  |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::types::PendingCommand;
use crate::config::DeviceSettings;
use crate::door::{DoorEvent, state_label};
use crate::error::ProtocolError;

/// Text reported with every failed command completion.
pub const COMMAND_FAILED_TEXT: &str = "Command execution failed";

fn non_zero_rssi(rssi: i32) -> Option<i32> {
    (rssi != 0).then_some(rssi)
}

fn positive_uptime(uptime_ms: u64) -> Option<u64> {
    (uptime_ms > 0).then_some(uptime_ms)
}

/// One door event inside a batch.
#[derive(Debug, Serialize)]
pub struct DoorEventItem {
    pub state: &'static str,
    pub timestamp: u64,
    pub seq: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<u64>,
}

impl From<&DoorEvent> for DoorEventItem {
    fn from(ev: &DoorEvent) -> Self {
        Self {
            state: state_label(ev.is_open),
            timestamp: ev.timestamp_ms,
            seq: ev.seq,
            rssi: non_zero_rssi(ev.rssi),
            uptime_ms: positive_uptime(ev.uptime_ms),
        }
    }
}

/// Single door event upload.
#[derive(Debug, Serialize)]
pub struct DoorEventBody<'a> {
    pub device_id: &'a str,
    pub state: &'static str,
    pub timestamp: u64,
    pub seq: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<u64>,
}

impl<'a> DoorEventBody<'a> {
    pub fn new(device_id: &'a str, ev: &DoorEvent) -> Self {
        let item = DoorEventItem::from(ev);
        Self {
            device_id,
            state: item.state,
            timestamp: item.timestamp,
            seq: item.seq,
            rssi: item.rssi,
            uptime_ms: item.uptime_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DoorBatchBody<'a> {
    pub device_id: &'a str,
    pub events: Vec<DoorEventItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody<'a> {
    /// Station MAC address.
    pub device_id: &'a str,
    pub firmware_version: &'a str,
    pub ip: &'a str,
    pub rssi: i32,
    /// Seconds since boot.
    pub uptime: u64,
    #[serde(rename = "connected_to_wifi")]
    pub connected_to_wifi: bool,
}

/// `GET /devices/settings`.  `min_temp` and `max_temp` are required.
#[derive(Debug, Deserialize)]
pub struct SettingsResponse {
    pub min_temp: Option<f32>,
    pub max_temp: Option<f32>,
    pub door_alarm_delay_seconds: Option<u32>,
}

impl SettingsResponse {
    pub fn parse(body: &str) -> Result<DeviceSettings, ProtocolError> {
        let raw: Self = serde_json::from_str(body).map_err(|_| ProtocolError::MalformedJson)?;
        Ok(DeviceSettings {
            min_temp: raw.min_temp.ok_or(ProtocolError::MissingField("min_temp"))?,
            max_temp: raw.max_temp.ok_or(ProtocolError::MissingField("max_temp"))?,
            door_alarm_delay_seconds: raw
                .door_alarm_delay_seconds
                .unwrap_or(DeviceSettings::DEFAULT_DOOR_ALARM_DELAY_SECS),
        })
    }
}

/// `GET /devices/commands/pending`.
#[derive(Debug, Deserialize)]
pub struct PendingCommands {
    pub commands: Option<Vec<PendingCommand>>,
}

impl PendingCommands {
    /// First command of the set, if any.
    pub fn first(body: &str) -> Result<Option<PendingCommand>, ProtocolError> {
        let raw: Self = serde_json::from_str(body).map_err(|_| ProtocolError::MalformedJson)?;
        let commands = raw.commands.ok_or(ProtocolError::MissingField("commands"))?;
        Ok(commands.into_iter().next())
    }
}

#[derive(Debug, Serialize)]
pub struct CompletionBody<'a> {
    pub result: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl<'a> CompletionBody<'a> {
    pub fn new(success: bool, result: &'a Value) -> Self {
        Self {
            result,
            error: (!success).then_some(COMMAND_FAILED_TEXT),
        }
    }
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(|_| ProtocolError::Encode)
}
