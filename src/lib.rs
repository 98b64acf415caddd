//! ColdMonitor firmware library.
//!
//! Exposes the firmware core for integration testing and for the ESP-IDF
//! binary. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod boot;
pub mod buffer;
pub mod commands;
pub mod config;
pub mod door;
pub mod error;
pub mod reading;
pub mod tasks;
pub mod transport;
pub mod uplink;

// Hardware-facing modules; simulation stubs stand in on the host.
pub mod adapters;
pub mod drivers;
pub mod pins;
pub mod sensors;
