//! Per-worker task watchdog.
//!
//! The door, capture and reset loops each subscribe their own thread to
//! the ESP-IDF task watchdog and kick it once per pass.  A loop that stops
//! passing for [`TIMEOUT_SECS`] panics the chip into a reboot.  Uplink and
//! command loops are not subscribed: a single gated HTTP exchange can
//! legitimately hold them longer than any sensible timeout.
//!
//! | Target  | Behaviour                                   |
//! |---------|---------------------------------------------|
//! | espidf  | `esp_task_wdt_add` / `_reset` / `_delete`   |
//! | host    | counts kicks so loop tests can observe them |

#[cfg(not(target_os = "espidf"))]
use core::cell::Cell;

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

/// Seconds a subscribed worker may go without a kick.
pub const TIMEOUT_SECS: u32 = 60;

/// Subscription of the calling thread.  Dropping it unsubscribes.
pub struct TaskWatchdog {
    task: &'static str,
    #[cfg(target_os = "espidf")]
    active: bool,
    #[cfg(not(target_os = "espidf"))]
    kicks: Cell<u32>,
}

impl TaskWatchdog {
    /// Subscribe the current thread under `task` (used only for logs).
    #[cfg(target_os = "espidf")]
    pub fn subscribe(task: &'static str) -> Self {
        use esp_idf_sys::{ESP_OK, esp_task_wdt_add, esp_task_wdt_config_t, esp_task_wdt_reconfigure};

        let cfg = esp_task_wdt_config_t {
            timeout_ms: TIMEOUT_SECS * 1000,
            idle_core_mask: 0,
            trigger_panic: true,
        };
        // SAFETY: plain FFI calls; a null handle means "current task".
        let (reconf, added) = unsafe {
            (
                esp_task_wdt_reconfigure(&cfg),
                esp_task_wdt_add(core::ptr::null_mut()),
            )
        };
        if reconf != ESP_OK as i32 {
            warn!("Watchdog[{task}]: reconfigure returned {reconf}, keeping existing config");
        }
        let active = added == ESP_OK as i32;
        if active {
            info!("Watchdog[{task}]: subscribed, {TIMEOUT_SECS}s");
        } else {
            warn!("Watchdog[{task}]: subscribe failed ({added}), loop runs unguarded");
        }
        Self { task, active }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn subscribe(task: &'static str) -> Self {
        info!("Watchdog[{task}](sim): subscribed");
        Self {
            task,
            kicks: Cell::new(0),
        }
    }

    /// Signal one completed loop pass.
    pub fn kick(&self) {
        #[cfg(target_os = "espidf")]
        if self.active {
            // SAFETY: resets the subscription owned by this thread.
            unsafe {
                esp_idf_sys::esp_task_wdt_reset();
            }
        }

        #[cfg(not(target_os = "espidf"))]
        self.kicks.set(self.kicks.get().saturating_add(1));
    }

    /// Kicks seen so far (host only).
    #[cfg(not(target_os = "espidf"))]
    pub fn kicks(&self) -> u32 {
        self.kicks.get()
    }

    pub fn task(&self) -> &'static str {
        self.task
    }
}

impl Drop for TaskWatchdog {
    fn drop(&mut self) {
        #[cfg(target_os = "espidf")]
        if self.active {
            // SAFETY: removes the subscription added in `subscribe` on this thread.
            let ret = unsafe { esp_idf_sys::esp_task_wdt_delete(core::ptr::null_mut()) };
            if ret != esp_idf_sys::ESP_OK as i32 {
                warn!("Watchdog[{}]: unsubscribe returned {ret}", self.task);
                return;
            }
        }
        info!("Watchdog[{}]: released", self.task);
    }
}
