//! Refrigeration controller link: Modbus RTU over RS-485.
//!
//! Implements [`ActuatorPort`] for the remote commands.
//!
//! Wire format (request, both supported functions):
//! ```text
//! ┌───────┬──────┬────────────┬──────────────────┬─────────┐
//! │ Unit  │ Func │ Addr (BE)  │ Qty / Value (BE) │ CRC (LE)│
//! │ 1 B   │ 1 B  │ 2 B        │ 2 B              │ 2 B     │
//! └───────┴──────┴────────────┴──────────────────┴─────────┘
//! ```
//!
//! | Command            | Function                 | Register | Result                          |
//! |--------------------|--------------------------|----------|---------------------------------|
//! | `DEFROST_START`    | 0x06 write single reg.   | 0x0006=1 | `{"status":"defrost_started"}`  |
//! | `READ_TEMPERATURE` | 0x04 read input reg.     | 0x0000   | `{"temperature": <°C>}` (i16/10)|
//!
//! The byte pipe is the [`RtuLink`] trait: a UART with DE control on
//! device, an in-memory register bank on host.

use log::{debug, info, warn};
use serde_json::{Map, Value, json};

use crate::app::ports::ActuatorPort;
use crate::commands::types::CommandType;
use crate::error::ActuatorError;

pub const FN_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FN_WRITE_SINGLE_REGISTER: u8 = 0x06;

pub const REG_PROBE_TEMPERATURE: u16 = 0x0000;
pub const REG_DEFROST: u16 = 0x0006;

/// Longest frame either side sends for the supported functions.
const MAX_FRAME: usize = 32;

// ───────────────────────────────────────────────────────────────
// Frame codec
// ───────────────────────────────────────────────────────────────

/// Modbus CRC-16 (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Eight-byte request for functions 0x03/0x04/0x06.
pub fn encode_request(unit: u8, function: u8, address: u16, operand: u16) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = unit;
    frame[1] = function;
    frame[2..4].copy_from_slice(&address.to_be_bytes());
    frame[4..6].copy_from_slice(&operand.to_be_bytes());
    let crc = crc16(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Validate a response and return the bytes between function code and CRC.
pub fn decode_response(frame: &[u8], unit: u8, function: u8) -> Result<&[u8], ActuatorError> {
    if frame.len() < 5 {
        return Err(ActuatorError::BadFrame);
    }
    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    if crc16(body) != u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]) {
        return Err(ActuatorError::CrcMismatch);
    }
    if body[0] != unit {
        return Err(ActuatorError::BadFrame);
    }
    if body[1] == function | 0x80 {
        return Err(ActuatorError::Exception(body[2]));
    }
    if body[1] != function {
        return Err(ActuatorError::BadFrame);
    }
    Ok(&body[2..])
}

// ───────────────────────────────────────────────────────────────
// Link trait
// ───────────────────────────────────────────────────────────────

/// Half-duplex request/response byte pipe.
pub trait RtuLink: Send {
    /// Send `request`, collect the reply into `response`, return its length.
    fn transact(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

pub struct ModbusController<L: RtuLink> {
    link: L,
    unit: u8,
}

impl<L: RtuLink> ModbusController<L> {
    pub fn new(link: L, unit: u8) -> Self {
        Self { link, unit }
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn exchange(&mut self, function: u8, address: u16, operand: u16) -> Result<Vec<u8>, ActuatorError> {
        let request = encode_request(self.unit, function, address, operand);
        let mut response = [0u8; MAX_FRAME];
        let n = self.link.transact(&request, &mut response)?;
        let payload = decode_response(&response[..n.min(MAX_FRAME)], self.unit, function)?;
        Ok(payload.to_vec())
    }

    pub fn read_input_register(&mut self, address: u16) -> Result<u16, ActuatorError> {
        let payload = self.exchange(FN_READ_INPUT_REGISTERS, address, 1)?;
        match payload.as_slice() {
            [2, hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(ActuatorError::BadFrame),
        }
    }

    pub fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), ActuatorError> {
        let payload = self.exchange(FN_WRITE_SINGLE_REGISTER, address, value)?;
        // The controller echoes address and value.
        let echo = [address.to_be_bytes(), value.to_be_bytes()].concat();
        if payload.get(..4) != Some(echo.as_slice()) {
            return Err(ActuatorError::BadFrame);
        }
        Ok(())
    }
}

impl<L: RtuLink> ActuatorPort for ModbusController<L> {
    fn write_command(
        &mut self,
        command: CommandType,
        parameters: &Map<String, Value>,
    ) -> Result<Value, ActuatorError> {
        if !parameters.is_empty() {
            debug!("Controller: ignoring parameters {:?}", parameters.keys().collect::<Vec<_>>());
        }
        match command {
            CommandType::DefrostStart => {
                self.write_single_register(REG_DEFROST, 1)?;
                info!("Controller: defrost started");
                Ok(json!({ "status": "defrost_started" }))
            }
            CommandType::ReadTemperature => {
                let raw = self.read_input_register(REG_PROBE_TEMPERATURE)?;
                let celsius = f32::from(i16::from_be_bytes(raw.to_be_bytes())) / 10.0;
                info!("Controller: probe temperature {:.1} C", celsius);
                Ok(json!({ "temperature": celsius }))
            }
            CommandType::Unknown => {
                warn!("Controller: unknown command type");
                Err(ActuatorError::UnknownCommand)
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// UART link (device)
// ───────────────────────────────────────────────────────────────

/// RS-485 transceiver on a UART configured by `hw_init`.
#[cfg(target_os = "espidf")]
pub struct UartLink {
    port: i32,
    de_gpio: i32,
}

#[cfg(target_os = "espidf")]
impl UartLink {
    /// First byte must arrive within this many ticks.
    const RESPONSE_TICKS: u32 = 100;
    /// Inter-byte gap that ends a frame.
    const GAP_TICKS: u32 = 10;

    pub fn new(port: i32, de_gpio: i32) -> Self {
        Self { port, de_gpio }
    }
}

#[cfg(target_os = "espidf")]
impl RtuLink for UartLink {
    fn transact(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, ActuatorError> {
        use crate::drivers::hw_init::gpio_write;
        use esp_idf_svc::sys::{ESP_OK, uart_flush_input, uart_read_bytes, uart_wait_tx_done, uart_write_bytes};

        // SAFETY: the UART driver was installed in hw_init and this link is
        // owned by the command worker alone.
        unsafe {
            uart_flush_input(self.port);
            gpio_write(self.de_gpio, true);
            let written = uart_write_bytes(self.port, request.as_ptr().cast(), request.len());
            let done = uart_wait_tx_done(self.port, Self::RESPONSE_TICKS);
            gpio_write(self.de_gpio, false);
            if usize::try_from(written).ok() != Some(request.len()) || done != ESP_OK as i32 {
                return Err(ActuatorError::Io);
            }

            let mut len = 0usize;
            let mut wait = Self::RESPONSE_TICKS;
            while len < response.len() {
                let chunk = &mut response[len..];
                let n = uart_read_bytes(
                    self.port,
                    chunk.as_mut_ptr().cast(),
                    u32::try_from(chunk.len()).unwrap_or(u32::MAX),
                    wait,
                );
                match usize::try_from(n) {
                    Ok(0) => break,
                    Ok(n) => len += n,
                    Err(_) => return Err(ActuatorError::Io),
                }
                wait = Self::GAP_TICKS;
            }
            if len == 0 {
                return Err(ActuatorError::Timeout);
            }
            Ok(len)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulated controller (host)
// ───────────────────────────────────────────────────────────────

/// In-memory register bank that answers like a real controller.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimLink {
    pub unit: u8,
    pub input_registers: std::collections::HashMap<u16, u16>,
    pub holding_registers: std::collections::HashMap<u16, u16>,
    /// Answer every request with this exception code.
    pub exception: Option<u8>,
    /// Drop every request (no reply).
    pub silent: bool,
    /// Flip a CRC bit in every reply.
    pub corrupt: bool,
}

#[cfg(not(target_os = "espidf"))]
impl SimLink {
    pub fn new(unit: u8) -> Self {
        let mut link = Self {
            unit,
            ..Self::default()
        };
        // -18.5 C probe
        link.input_registers
            .insert(REG_PROBE_TEMPERATURE, u16::from_be_bytes((-185i16).to_be_bytes()));
        link
    }

    fn reply(&self, body: &[u8], response: &mut [u8]) -> usize {
        let n = body.len();
        response[..n].copy_from_slice(body);
        let mut crc = crc16(body);
        if self.corrupt {
            crc ^= 1;
        }
        response[n..n + 2].copy_from_slice(&crc.to_le_bytes());
        n + 2
    }
}

#[cfg(not(target_os = "espidf"))]
impl RtuLink for SimLink {
    fn transact(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, ActuatorError> {
        if self.silent || request.len() != 8 || request[0] != self.unit {
            return Err(ActuatorError::Timeout);
        }
        let function = request[1];
        let address = u16::from_be_bytes([request[2], request[3]]);
        let operand = u16::from_be_bytes([request[4], request[5]]);

        if let Some(code) = self.exception {
            return Ok(self.reply(&[self.unit, function | 0x80, code], response));
        }
        match function {
            FN_READ_INPUT_REGISTERS => {
                let value = self.input_registers.get(&address).copied().unwrap_or(0);
                let [hi, lo] = value.to_be_bytes();
                Ok(self.reply(&[self.unit, function, 2, hi, lo], response))
            }
            FN_WRITE_SINGLE_REGISTER => {
                self.holding_registers.insert(address, operand);
                let mut body = [0u8; 6];
                body.copy_from_slice(&request[..6]);
                Ok(self.reply(&body, response))
            }
            // Illegal function
            _ => Ok(self.reply(&[self.unit, function | 0x80, 0x01], response)),
        }
    }
}
