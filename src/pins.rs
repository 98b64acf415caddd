//! GPIO / peripheral pin assignments for the ColdMonitor board (ESP32 DevKit).
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Door contact (reed switch, COM to GND, internal pull-up)
// ---------------------------------------------------------------------------

pub const DOOR_GPIO: i32 = 25;
/// Contact open pulls the line HIGH, which means the door is open.
pub const DOOR_OPEN_LEVEL_HIGH: bool = true;

// ---------------------------------------------------------------------------
// Climate sensor (DHT11 single-wire)
// ---------------------------------------------------------------------------

pub const DHT_DATA_GPIO: i32 = 27;

// ---------------------------------------------------------------------------
// Battery monitor (resistive divider to ADC1)
// ---------------------------------------------------------------------------

/// ADC1 channel 6 = GPIO 34.
pub const BATTERY_ADC_GPIO: i32 = 34;
pub const BATTERY_ADC_CHANNEL: u32 = 6;
/// (R1 + R2) / R2
pub const BATTERY_DIVIDER_RATIO: f32 = 2.0;

// ---------------------------------------------------------------------------
// Buttons and feedback LED
// ---------------------------------------------------------------------------

/// On-board BOOT button (active LOW).
pub const BOOT_BUTTON_GPIO: i32 = 0;
/// External RESET button (active LOW).
pub const RESET_BUTTON_GPIO: i32 = 15;
/// On-board blue LED.
pub const STATUS_LED_GPIO: i32 = 2;

// ---------------------------------------------------------------------------
// RS-485 link to the refrigeration controller (UART2)
// ---------------------------------------------------------------------------

pub const RS485_UART_PORT: i32 = 2;
pub const RS485_TX_GPIO: i32 = 17;
pub const RS485_RX_GPIO: i32 = 16;
/// Driver enable: HIGH while transmitting.
pub const RS485_DE_GPIO: i32 = 4;
pub const RS485_BAUD: i32 = 9600;
/// Modbus unit id of the controller.
pub const RS485_SLAVE_ID: u8 = 1;
