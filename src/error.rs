//! Unified error types for the ColdMonitor firmware.
//!
//! Every subsystem converts into the single [`Error`] enum so the worker
//! loops handle failures uniformly: log with a classified reason, keep
//! state untouched, retry on the next cycle.  Nothing here aborts the
//! process.  All variants are `Copy` so they travel through status
//! reporting without allocation.

use core::fmt;

pub use crate::app::ports::StorageError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// WiFi link or API credentials are absent; no transport was attempted.
    Connectivity,
    /// The HTTP round-trip failed or returned a non-success status.
    Transport(TransportError),
    /// The response body was malformed or lacked a required field.
    Protocol(ProtocolError),
    /// A bounded buffer or queue is full; the new item was dropped.
    Capacity,
    /// The command was already executed inside the cooldown window.
    DuplicateCommand,
    /// The persistent key-value store failed.
    Storage(StorageError),
    /// Provisioning input failed validation.
    Provisioning(ProvisioningError),
    /// The refrigeration controller rejected or did not answer a command.
    Actuator(ActuatorError),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => write!(f, "connectivity: no WiFi link or API credentials"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Capacity => write!(f, "capacity exceeded"),
            Self::DuplicateCommand => write!(f, "duplicate command"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Provisioning(e) => write!(f, "provisioning: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Classified reason for a failed HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused or DNS lookup failed.
    ConnectionRefused,
    /// Sending the request headers failed.
    SendHeaderFailed,
    /// Sending the request body failed.
    SendPayloadFailed,
    /// The client had no open connection.
    NotConnected,
    /// The connection dropped mid-exchange.
    ConnectionLost,
    /// Connect or response timeout elapsed.
    Timeout,
    /// HTTP 401: the device key was rejected.
    Unauthorized,
    /// HTTP 404: endpoint or device unknown to the server.
    NotFound,
    /// HTTP 429: the server is throttling this device.
    RateLimited,
    /// HTTP 5xx.
    ServerError(u16),
    /// Any other non-success HTTP status.
    UnexpectedStatus(u16),
    /// The transport gate could not be acquired within the wait budget.
    Busy,
    /// Low-level I/O failure without a more specific code.
    Io,
}

impl TransportError {
    /// Map a negative client error code to a transport error.
    ///
    /// | Code | Meaning                     |
    /// |------|-----------------------------|
    /// | -1   | connection refused / DNS    |
    /// | -2   | send header failed          |
    /// | -3   | send payload failed         |
    /// | -4   | not connected               |
    /// | -5   | connection lost             |
    /// | -11  | read timeout                |
    pub const fn from_client_code(code: i32) -> Self {
        match code {
            -1 => Self::ConnectionRefused,
            -2 => Self::SendHeaderFailed,
            -3 => Self::SendPayloadFailed,
            -4 => Self::NotConnected,
            -5 => Self::ConnectionLost,
            -11 => Self::Timeout,
            _ => Self::Io,
        }
    }

    /// Classify a non-success HTTP status.
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError(status),
            _ => Self::UnexpectedStatus(status),
        }
    }

    /// True for HTTP 5xx responses.
    pub const fn is_server_error(self) -> bool {
        matches!(self, Self::ServerError(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionRefused => write!(f, "connection refused or DNS failure"),
            Self::SendHeaderFailed => write!(f, "send header failed"),
            Self::SendPayloadFailed => write!(f, "send payload failed"),
            Self::NotConnected => write!(f, "not connected"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unauthorized => write!(f, "invalid device key (401)"),
            Self::NotFound => write!(f, "endpoint not found (404)"),
            Self::RateLimited => write!(f, "rate limited (429)"),
            Self::ServerError(code) => write!(f, "server error ({code})"),
            Self::UnexpectedStatus(code) => write!(f, "unexpected status ({code})"),
            Self::Busy => write!(f, "transport busy"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Body was not valid JSON for the expected schema.
    MalformedJson,
    /// A required field was absent.
    MissingField(&'static str),
    /// Request payload could not be serialised.
    Encode,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedJson => write!(f, "malformed JSON"),
            Self::MissingField(name) => write!(f, "missing field '{name}'"),
            Self::Encode => write!(f, "payload encoding failed"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Provisioning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningError {
    InvalidSsid,
    InvalidPassword,
    InvalidApiUrl,
    InvalidApiKey,
    /// WiFi or API credentials are missing.
    Incomplete,
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID must be 1-32 bytes"),
            Self::InvalidPassword => write!(f, "password must be at most 64 bytes"),
            Self::InvalidApiUrl => write!(f, "API URL must be 1-256 bytes with http(s) scheme"),
            Self::InvalidApiKey => write!(f, "API key must be 1-128 bytes"),
            Self::Incomplete => write!(f, "WiFi and API credentials required"),
        }
    }
}

impl From<ProvisioningError> for Error {
    fn from(e: ProvisioningError) -> Self {
        Self::Provisioning(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// The controller did not answer within the response window.
    Timeout,
    /// Response frame failed its CRC check.
    CrcMismatch,
    /// The controller returned a Modbus exception code.
    Exception(u8),
    /// Response frame was truncated or addressed to another unit.
    BadFrame,
    /// The command type has no controller mapping.
    UnknownCommand,
    /// UART read or write failed.
    Io,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "controller timeout"),
            Self::CrcMismatch => write!(f, "CRC mismatch"),
            Self::Exception(code) => write!(f, "controller exception 0x{code:02X}"),
            Self::BadFrame => write!(f, "malformed response frame"),
            Self::UnknownCommand => write!(f, "Unknown command type"),
            Self::Io => write!(f, "UART I/O error"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
