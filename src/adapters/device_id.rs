//! Factory identity of the board.
//!
//! The eFuse MAC gives two strings:
//!
//! | Field         | Example             | Used as                          |
//! |---------------|---------------------|----------------------------------|
//! | `hardware_id` | `CM-A1B2C3`         | serial of last resort            |
//! | `mac`         | `24:6F:28:A1:B2:C3` | `deviceId` in heartbeat payloads |

use core::fmt::Write;

use heapless::String;

const HW_PREFIX: &str = "CM-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    raw: [u8; 6],
    hardware_id: String<16>,
    mac: String<17>,
}

impl DeviceIdentity {
    pub fn from_mac(raw: [u8; 6]) -> Self {
        let mut hardware_id = String::new();
        let mut mac = String::new();
        // Both buffers are sized for the longest rendering.
        let _ = write!(hardware_id, "{HW_PREFIX}{:02X}{:02X}{:02X}", raw[3], raw[4], raw[5]);
        for (i, b) in raw.iter().enumerate() {
            let sep = if i == 0 { "" } else { ":" };
            let _ = write!(mac, "{sep}{b:02X}");
        }
        Self { raw, hardware_id, mac }
    }

    /// Read the station MAC burned into eFuse.
    #[cfg(target_os = "espidf")]
    pub fn read() -> Self {
        let mut raw = [0u8; 6];
        // SAFETY: the buffer is exactly the 6 bytes the call writes.
        let ret = unsafe { esp_idf_sys::esp_efuse_mac_get_default(raw.as_mut_ptr()) };
        if ret != esp_idf_sys::ESP_OK as i32 {
            log::warn!("Identity: eFuse MAC read failed ({ret})");
        }
        Self::from_mac(raw)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn read() -> Self {
        Self::from_mac([0x24, 0x6F, 0x28, 0xA1, 0xB2, 0xC3])
    }

    pub fn hardware_id(&self) -> &str {
        &self.hardware_id
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn raw(&self) -> [u8; 6] {
        self.raw
    }
}
