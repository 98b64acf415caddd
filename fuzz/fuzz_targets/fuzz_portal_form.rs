//! Fuzz target: portal form body → provisioning record
//!
//! Anything the portal accepts must satisfy the stored-record limits.
//!
//! cargo fuzz run fuzz_portal_form

#![no_main]

use coldmonitor::adapters::wifi::parse_submission;
use coldmonitor::boot::provisioning::ProvisioningRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some(submission) = parse_submission(data) else {
        return;
    };
    if let Ok(record) = ProvisioningRecord::from_submission(&submission) {
        assert!(!record.wifi_ssid.is_empty() && record.wifi_ssid.len() <= 32);
        assert!(record.wifi_password.len() <= 64);
        assert!(record.api_url.starts_with("http://") || record.api_url.starts_with("https://"));
        assert!(!record.api_url.ends_with('/'));
        assert!(!record.api_key.is_empty() && record.api_key.len() <= 128);
        assert!(record.is_complete());
    }
});
