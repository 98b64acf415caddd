//! System adapter: heap queries and restart.
//!
//! On host/test the free-heap figure is a settable value so the command
//! dispatcher's memory gates can be exercised.

#[cfg(not(target_os = "espidf"))]
use core::sync::atomic::{AtomicU32, Ordering};

use crate::app::ports::SystemPort;

/// Roughly what an ESP32 has left once WiFi and TLS are up.
#[cfg(not(target_os = "espidf"))]
const SIM_DEFAULT_FREE_HEAP: u32 = 120_000;

#[derive(Debug)]
pub struct Esp32System {
    #[cfg(not(target_os = "espidf"))]
    sim_free_heap: AtomicU32,
}

impl Default for Esp32System {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32System {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            sim_free_heap: AtomicU32::new(SIM_DEFAULT_FREE_HEAP),
        }
    }

    /// The value reported by `free_heap_bytes`.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_free_heap(&self, bytes: u32) {
        self.sim_free_heap.store(bytes, Ordering::Relaxed);
    }
}

impl SystemPort for Esp32System {
    #[cfg(target_os = "espidf")]
    fn free_heap_bytes(&self) -> u32 {
        // SAFETY: read-only query of the heap allocator.
        unsafe { esp_idf_sys::esp_get_free_heap_size() }
    }

    #[cfg(not(target_os = "espidf"))]
    fn free_heap_bytes(&self) -> u32 {
        self.sim_free_heap.load(Ordering::Relaxed)
    }
}

/// Reboot the chip.  Never returns on device; on host the process exits.
#[cfg(target_os = "espidf")]
pub fn restart() -> ! {
    log::warn!("System: restarting");
    // SAFETY: esp_restart does not return.
    unsafe { esp_idf_sys::esp_restart() }
}

#[cfg(not(target_os = "espidf"))]
pub fn restart() -> ! {
    log::warn!("System(sim): restart requested, exiting");
    std::process::exit(0)
}
