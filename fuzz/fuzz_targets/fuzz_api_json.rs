//! Fuzz target: API response parsers
//!
//! Settings and pending-command bodies come from the network; malformed
//! input must be rejected with an error, never a panic.
//!
//! cargo fuzz run fuzz_api_json

#![no_main]

use coldmonitor::uplink::payloads::{PendingCommands, SettingsResponse};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = core::str::from_utf8(data) else {
        return;
    };

    let _ = SettingsResponse::parse(body);

    if let Ok(Some(cmd)) = PendingCommands::first(body) {
        // kind() must map every string, known or not
        let _ = cmd.kind();
        let _ = cmd.is_actionable();
    }
});
