//! Fuzz target: `controller::decode_response`
//!
//! Feeds arbitrary bytes as a controller reply and asserts that decoding
//! never panics and that an accepted frame always carries a valid CRC.
//!
//! cargo fuzz run fuzz_modbus_frame

#![no_main]

use coldmonitor::adapters::controller::{crc16, decode_response};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for function in [0x04u8, 0x06] {
        if let Ok(body) = decode_response(data, 1, function) {
            assert!(data.len() >= 5, "accepted frame shorter than header + CRC");
            assert!(body.len() <= data.len() - 4);
            let (frame, crc) = data.split_at(data.len() - 2);
            assert_eq!(crc16(frame), u16::from_le_bytes([crc[0], crc[1]]));
        }
    }
});
