//! Board drivers, hardware initialisation, and task helpers.

pub mod button;
pub mod hw_init;
pub mod reset_button;
pub mod status_led;
pub mod task_pin;
pub mod watchdog;
