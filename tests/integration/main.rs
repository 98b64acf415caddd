//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters.  All tests run on the host (x86_64) with no
//! real hardware required:
//!
//! ```text
//! cargo test --no-default-features
//! ```

#![cfg(not(target_os = "espidf"))]

mod boot_flow_tests;
mod command_tests;
mod door_flow_tests;
mod mock_hw;
mod uplink_tests;
