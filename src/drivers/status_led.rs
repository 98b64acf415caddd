//! Status LED.  Lit while the reset sequencer is waiting for the second
//! button and blinked by the boot controller while the portal is open.
//! The host build only remembers the level.

#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;

pub struct StatusLed {
    _gpio: i32,
    on: bool,
}

impl StatusLed {
    pub fn new(gpio: i32) -> Self {
        Self { _gpio: gpio, on: false }
    }

    pub fn set(&mut self, on: bool) {
        if on == self.on {
            return;
        }
        #[cfg(target_os = "espidf")]
        hw_init::gpio_write(self._gpio, on);
        self.on = on;
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}
