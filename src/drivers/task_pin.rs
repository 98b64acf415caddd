//! Worker thread placement on the ESP32 dual-core.
//!
//! `std::thread` on ESP-IDF is a pthread over a FreeRTOS task.  The
//! pthread layer reads a thread-local config on the next create, so
//! [`spawn`] sets it and spawns in one step.  Network-bound workers share
//! the PRO core with the WiFi stack; latency-sensitive polling stays on APP.

use std::io;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Core {
    /// PRO_CPU: WiFi, lwIP, HTTP.
    Pro,
    /// APP_CPU: door polling, capture.
    App,
}

/// Where and how a worker thread runs.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    /// NUL-terminated, handed to FreeRTOS as-is.
    pub name: &'static str,
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
}

impl TaskSpec {
    pub const DOOR: Self = Self::new("door\0", Core::App, 6, 4);
    pub const CAPTURE: Self = Self::new("capture\0", Core::App, 4, 6);
    pub const UPLINK: Self = Self::new("uplink\0", Core::Pro, 5, 12);
    pub const COMMANDS: Self = Self::new("commands\0", Core::Pro, 3, 10);

    pub const fn new(name: &'static str, core: Core, priority: u8, stack_kb: usize) -> Self {
        Self {
            name,
            core,
            priority,
            stack_kb,
        }
    }

    pub fn label(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }
}

#[cfg(target_os = "espidf")]
pub fn spawn(task: TaskSpec, f: impl FnOnce() + Send + 'static) -> io::Result<JoinHandle<()>> {
    use esp_idf_sys::{ESP_OK, esp_create_default_pthread_config, esp_pthread_set_cfg};

    // SAFETY: esp_pthread_set_cfg copies the struct; `name` is 'static and NUL-terminated.
    let ret = unsafe {
        let mut cfg = esp_create_default_pthread_config();
        cfg.pin_to_core = match task.core {
            Core::Pro => 0,
            Core::App => 1,
        };
        cfg.prio = i32::from(task.priority);
        cfg.stack_size = i32::try_from(task.stack_kb * 1024).unwrap_or(i32::MAX);
        cfg.thread_name = task.name.as_ptr().cast();
        esp_pthread_set_cfg(&cfg)
    };
    if ret != ESP_OK as i32 {
        return Err(io::Error::other(format!("{}: pthread cfg rejected ({ret})", task.label())));
    }

    log::info!(
        "Tasks: '{}' on {:?}, pri {}, {} KB",
        task.label(),
        task.core,
        task.priority,
        task.stack_kb
    );
    std::thread::Builder::new().name(task.label().into()).spawn(f)
}

/// Host: a named thread with the requested stack, no pinning.
#[cfg(not(target_os = "espidf"))]
pub fn spawn(task: TaskSpec, f: impl FnOnce() + Send + 'static) -> io::Result<JoinHandle<()>> {
    log::info!("Tasks(sim): '{}', {} KB", task.label(), task.stack_kb);
    std::thread::Builder::new()
        .name(task.label().into())
        .stack_size(task.stack_kb * 1024)
        .spawn(f)
}
