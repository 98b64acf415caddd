//! ESP32 time adapter.
//!
//! Implements [`TimePort`] for every worker task.
//!
//! - **`target_os = "espidf"`**: monotonic time from `esp_timer_get_time()`,
//!   wall clock from `gettimeofday()` once SNTP has set it, delays via
//!   FreeRTOS (`esp_idf_hal::delay::FreeRtos`).
//! - **`not(target_os = "espidf")`**: `std::time::Instant` and
//!   `SystemTime` for host-side testing and simulation.
//!
//! The wall clock counts as synced once it is past `SYNCED_AFTER_SECS`
//! (November 2023); before that, payload timestamps fall back to uptime.

use crate::app::ports::TimePort;

/// Unix seconds below which the RTC is considered unset.
pub const SYNCED_AFTER_SECS: u64 = 1_700_000_000;

/// Time adapter for the ESP32 platform.
pub struct Esp32TimeAdapter {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for Esp32TimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32TimeAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Microseconds since boot (monotonic).
    #[cfg(target_os = "espidf")]
    pub fn uptime_us(&self) -> u64 {
        u64::try_from(unsafe { esp_idf_svc::sys::esp_timer_get_time() }).unwrap_or(0)
    }

    /// Microseconds since boot (monotonic).
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_us(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Raw wall clock in Unix milliseconds, synced or not.
    #[cfg(target_os = "espidf")]
    fn wall_clock_ms() -> Option<u64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        let secs = u64::try_from(tv.tv_sec).ok()?;
        let micros = u64::try_from(tv.tv_usec).ok()?;
        Some(secs * 1000 + micros / 1000)
    }

    /// Raw wall clock in Unix milliseconds, synced or not.
    #[cfg(not(target_os = "espidf"))]
    fn wall_clock_ms() -> Option<u64> {
        let since = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?;
        u64::try_from(since.as_millis()).ok()
    }
}

impl TimePort for Esp32TimeAdapter {
    fn uptime_ms(&self) -> u64 {
        self.uptime_us() / 1000
    }

    fn unix_time_ms(&self) -> Option<u64> {
        Self::wall_clock_ms().filter(|ms| ms / 1000 > SYNCED_AFTER_SECS)
    }

    #[cfg(target_os = "espidf")]
    fn delay_ms(&self, ms: u64) {
        esp_idf_hal::delay::FreeRtos::delay_ms(u32::try_from(ms).unwrap_or(u32::MAX));
    }

    #[cfg(not(target_os = "espidf"))]
    fn delay_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}

/// Start SNTP in the background.  The returned handle must stay alive for
/// the clock to keep syncing.
#[cfg(target_os = "espidf")]
pub fn start_sntp() -> Option<esp_idf_svc::sntp::EspSntp<'static>> {
    match esp_idf_svc::sntp::EspSntp::new_default() {
        Ok(sntp) => {
            log::info!("Time: SNTP started");
            Some(sntp)
        }
        Err(e) => {
            log::warn!("Time: SNTP start failed: {e:?}");
            None
        }
    }
}
