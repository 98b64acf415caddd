//! One-shot hardware peripheral initialization.
//!
//! Raw ESP-IDF setup of the battery ADC, the door/button/LED pins and the
//! RS-485 UART.  `main()` calls [`init_peripherals`] before any worker
//! thread exists; the read/write helpers are used by the drivers after that.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    AdcInitFailed(i32),
    GpioConfigFailed(i32),
    UartInitFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AdcInitFailed(rc) => write!(f, "ADC1 init failed (rc={})", rc),
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::UartInitFailed(rc) => write!(f, "RS-485 UART init failed (rc={})", rc),
        }
    }
}

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicPtr, Ordering};

#[cfg(target_os = "espidf")]
use log::info;

#[cfg(target_os = "espidf")]
use crate::pins;

#[cfg(target_os = "espidf")]
fn esp_ok(ret: i32, err: fn(i32) -> HwInitError) -> Result<(), HwInitError> {
    if ret == ESP_OK as i32 { Ok(()) } else { Err(err(ret)) }
}

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    init_adc()?;
    configure_pins(
        &[pins::DOOR_GPIO, pins::BOOT_BUTTON_GPIO, pins::RESET_BUTTON_GPIO],
        gpio_mode_t_GPIO_MODE_INPUT,
        true,
    )?;
    // DHT11 data idles high on an open-drain line.
    configure_pins(&[pins::DHT_DATA_GPIO], gpio_mode_t_GPIO_MODE_INPUT_OUTPUT_OD, true)?;
    gpio_write(pins::DHT_DATA_GPIO, true);
    configure_pins(
        &[pins::STATUS_LED_GPIO, pins::RS485_DE_GPIO],
        gpio_mode_t_GPIO_MODE_OUTPUT,
        false,
    )?;
    gpio_write(pins::STATUS_LED_GPIO, false);
    gpio_write(pins::RS485_DE_GPIO, false);
    init_uart()?;
    info!("hw_init: door, buttons, DHT, LED and RS-485 ready");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): nothing to configure");
    Ok(())
}

// ── GPIO ──────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn configure_pins(gpios: &[i32], mode: gpio_mode_t, pull_up: bool) -> Result<(), HwInitError> {
    let pin_bit_mask = gpios.iter().fold(0u64, |mask, &pin| mask | (1u64 << pin));
    let cfg = gpio_config_t {
        pin_bit_mask,
        mode,
        pull_up_en: if pull_up {
            gpio_pullup_t_GPIO_PULLUP_ENABLE
        } else {
            gpio_pullup_t_GPIO_PULLUP_DISABLE
        },
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    // SAFETY: the config struct outlives the call.
    esp_ok(unsafe { gpio_config(&cfg) }, HwInitError::GpioConfigFailed)
}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: register read on a configured pin.
    (unsafe { gpio_get_level(pin) }) != 0
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: register write on a configured pin.
    unsafe {
        gpio_set_level(pin, u32::from(high));
    }
}

// ── ADC1 (battery) ────────────────────────────────────────────

#[cfg(target_os = "espidf")]
static ADC1: AtomicPtr<adc_oneshot_unit_ctx_t> = AtomicPtr::new(core::ptr::null_mut());

#[cfg(target_os = "espidf")]
fn init_adc() -> Result<(), HwInitError> {
    let unit_cfg = adc_oneshot_unit_init_cfg_t {
        unit_id: adc_unit_t_ADC_UNIT_1,
        ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
        ..Default::default()
    };
    let mut handle: adc_oneshot_unit_handle_t = core::ptr::null_mut();
    // SAFETY: `handle` receives the new unit; both structs outlive the call.
    esp_ok(unsafe { adc_oneshot_new_unit(&unit_cfg, &mut handle) }, HwInitError::AdcInitFailed)?;

    // 12 dB attenuation covers the divided pack voltage.
    let chan_cfg = adc_oneshot_chan_cfg_t {
        atten: adc_atten_t_ADC_ATTEN_DB_12,
        bitwidth: adc_bitwidth_t_ADC_BITWIDTH_12,
    };
    // SAFETY: `handle` was just created above.
    esp_ok(
        unsafe { adc_oneshot_config_channel(handle, pins::BATTERY_ADC_CHANNEL, &chan_cfg) },
        HwInitError::AdcInitFailed,
    )?;
    ADC1.store(handle, Ordering::Release);
    Ok(())
}

/// Raw 12-bit sample, `None` before init or on a driver error.
#[cfg(target_os = "espidf")]
pub fn adc1_read(channel: u32) -> Option<u16> {
    let handle = ADC1.load(Ordering::Acquire);
    if handle.is_null() {
        return None;
    }
    let mut raw: i32 = 0;
    // SAFETY: non-null handles come only from `init_adc`.
    esp_ok(unsafe { adc_oneshot_read(handle, channel, &mut raw) }, HwInitError::AdcInitFailed).ok()?;
    u16::try_from(raw.max(0)).ok()
}

// ── RS-485 UART ───────────────────────────────────────────────

#[cfg(target_os = "espidf")]
const UART_RX_BUF: i32 = 512;

#[cfg(target_os = "espidf")]
fn init_uart() -> Result<(), HwInitError> {
    let port = pins::RS485_UART_PORT;
    let cfg = uart_config_t {
        baud_rate: pins::RS485_BAUD,
        data_bits: uart_word_length_t_UART_DATA_8_BITS,
        parity: uart_parity_t_UART_PARITY_DISABLE,
        stop_bits: uart_stop_bits_t_UART_STOP_BITS_1,
        flow_ctrl: uart_hw_flowcontrol_t_UART_HW_FLOWCTRL_DISABLE,
        ..Default::default()
    };
    // SAFETY: plain driver setup calls, run once before any worker uses the port.
    unsafe {
        esp_ok(uart_param_config(port, &cfg), HwInitError::UartInitFailed)?;
        esp_ok(
            uart_set_pin(port, pins::RS485_TX_GPIO, pins::RS485_RX_GPIO, -1, -1),
            HwInitError::UartInitFailed,
        )?;
        esp_ok(
            uart_driver_install(port, UART_RX_BUF, 0, 0, core::ptr::null_mut(), 0),
            HwInitError::UartInitFailed,
        )?;
    }
    info!("hw_init: UART{port} at {} baud", pins::RS485_BAUD);
    Ok(())
}
