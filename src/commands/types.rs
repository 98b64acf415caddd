//! Remote command types.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Commands the refrigeration controller understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    /// Start a defrost cycle.
    DefrostStart,
    /// Read the controller's probe temperature.
    ReadTemperature,
    /// Anything else; fails with "Unknown command type".
    Unknown,
}

impl CommandType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "DEFROST_START" => Self::DefrostStart,
            "READ_TEMPERATURE" => Self::ReadTemperature,
            _ => Self::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DefrostStart => "DEFROST_START",
            Self::ReadTemperature => "READ_TEMPERATURE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// One entry of `GET /devices/commands/pending`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PendingCommand {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "commandType")]
    pub command_type: String,
    #[serde(default, deserialize_with = "object_or_null")]
    pub parameters: Map<String, Value>,
}

impl PendingCommand {
    pub fn kind(&self) -> CommandType {
        CommandType::parse(&self.command_type)
    }

    /// Both id and type present.
    pub fn is_actionable(&self) -> bool {
        !self.id.is_empty() && !self.command_type.is_empty()
    }
}

/// Result of executing one command, reported via the completion endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub success: bool,
    pub result: Value,
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("command id must be a string or number")),
    }
}

fn object_or_null<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
    Ok(Option::<Map<String, Value>>::deserialize(d)?.unwrap_or_default())
}
