//! Active-low momentary push buttons (BOOT and RESET).
//!
//! Sampled by polling; the reset sequencer does its own edge detection,
//! so this driver only maps the line level to "pressed".
//!
//! ## Dual-target design
//!
//! On ESP-IDF: reads the GPIO configured with pull-up in hw_init.
//! On host/test: reads per-button static atomics for injection.

#[cfg(not(target_os = "espidf"))]
use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;
use crate::pins;

#[cfg(not(target_os = "espidf"))]
static SIM_BOOT_PRESSED: AtomicBool = AtomicBool::new(false);
#[cfg(not(target_os = "espidf"))]
static SIM_RESET_PRESSED: AtomicBool = AtomicBool::new(false);

#[cfg(not(target_os = "espidf"))]
pub fn sim_press(gpio: i32, pressed: bool) {
    match gpio {
        pins::BOOT_BUTTON_GPIO => SIM_BOOT_PRESSED.store(pressed, Ordering::Relaxed),
        pins::RESET_BUTTON_GPIO => SIM_RESET_PRESSED.store(pressed, Ordering::Relaxed),
        _ => {}
    }
}

pub struct ButtonDriver {
    gpio: i32,
}

impl ButtonDriver {
    pub fn new(gpio: i32) -> Self {
        Self { gpio }
    }

    /// GPIO pin this button is attached to.
    pub fn gpio(&self) -> i32 {
        self.gpio
    }

    #[cfg(target_os = "espidf")]
    pub fn is_pressed(&self) -> bool {
        !hw_init::gpio_read(self.gpio)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn is_pressed(&self) -> bool {
        match self.gpio {
            pins::BOOT_BUTTON_GPIO => SIM_BOOT_PRESSED.load(Ordering::Relaxed),
            pins::RESET_BUTTON_GPIO => SIM_RESET_PRESSED.load(Ordering::Relaxed),
            _ => false,
        }
    }
}
