//! Provisioning record: WiFi + API credentials and device serial.
//!
//! Stored under the "provision" namespace.  `provisioned` is never set on
//! its own: [`ProvisioningStore::save`] recomputes it from the presence of
//! both credential sets every time.
//!
//! | Key          | Limit          |
//! |--------------|----------------|
//! | wifi_ssid    | 1–32 bytes     |
//! | wifi_pass    | ≤ 64 bytes     |
//! | api_url      | 1–256 bytes, http(s) |
//! | api_key      | 1–128 bytes    |
//! | serial       | ≤ 32 bytes     |
//! | provisioned  | "1" / "0"      |

use log::{info, warn};

use crate::app::ports::{PortalSubmission, StoragePort};
use crate::error::{Error, ProvisioningError};

pub const PROVISION_NAMESPACE: &str = "provision";
/// Station credentials cached by the WiFi layer; wiped with provisioning.
pub const WIFI_NAMESPACE: &str = "wifi";

const KEY_SSID: &str = "wifi_ssid";
const KEY_PASS: &str = "wifi_pass";
const KEY_API_URL: &str = "api_url";
const KEY_API_KEY: &str = "api_key";
const KEY_SERIAL: &str = "serial";
const KEY_PROVISIONED: &str = "provisioned";

const MAX_SSID: usize = 32;
const MAX_PASSWORD: usize = 64;
const MAX_API_URL: usize = 256;
const MAX_API_KEY: usize = 128;
const MAX_SERIAL: usize = 32;

/// Endpoint base and device key used on every API call.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Value of the `x-device-key` header.
    pub device_key: String,
}

impl ApiCredentials {
    /// Join the base URL and an absolute path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl core::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("base_url", &self.base_url)
            .field("device_key", &mask_secret(&self.device_key))
            .finish()
    }
}

/// Everything BootController needs to decide between RUN and the portal.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProvisioningRecord {
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub api_url: String,
    pub api_key: String,
    pub device_serial: String,
    pub provisioned: bool,
}

impl core::fmt::Debug for ProvisioningRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProvisioningRecord")
            .field("wifi_ssid", &self.wifi_ssid)
            .field("wifi_password", &mask_secret(&self.wifi_password))
            .field("api_url", &self.api_url)
            .field("api_key", &mask_secret(&self.api_key))
            .field("device_serial", &self.device_serial)
            .field("provisioned", &self.provisioned)
            .finish()
    }
}

impl ProvisioningRecord {
    pub fn has_wifi(&self) -> bool {
        !self.wifi_ssid.is_empty()
    }

    pub fn has_api(&self) -> bool {
        !self.api_url.is_empty() && !self.api_key.is_empty()
    }

    /// Both credential sets present and the persisted flag agrees.
    pub fn is_complete(&self) -> bool {
        self.provisioned && self.has_wifi() && self.has_api()
    }

    pub fn api_credentials(&self) -> Option<ApiCredentials> {
        self.has_api().then(|| ApiCredentials {
            base_url: self.api_url.clone(),
            device_key: self.api_key.clone(),
        })
    }

    /// Build a record from portal input, validating every field.
    pub fn from_submission(sub: &PortalSubmission) -> Result<Self, ProvisioningError> {
        let api_url = sub.api_url.trim().trim_end_matches('/');
        validate_ssid(sub.wifi_ssid.trim())?;
        validate_password(&sub.wifi_password)?;
        validate_api_url(api_url)?;
        validate_api_key(sub.api_key.trim())?;

        let mut serial = sub.device_serial.trim().to_string();
        serial.truncate(MAX_SERIAL);

        let mut record = Self {
            wifi_ssid: sub.wifi_ssid.trim().to_string(),
            wifi_password: sub.wifi_password.clone(),
            api_url: api_url.to_string(),
            api_key: sub.api_key.trim().to_string(),
            device_serial: serial,
            provisioned: false,
        };
        record.provisioned = record.has_wifi() && record.has_api();
        Ok(record)
    }

    /// Provisioning serial, else the configured one, else the hardware id.
    pub fn effective_serial(&self, configured: &str, hardware_id: &str) -> String {
        if !self.device_serial.is_empty() {
            self.device_serial.clone()
        } else if !configured.is_empty() {
            configured.to_string()
        } else {
            hardware_id.to_string()
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn validate_ssid(ssid: &str) -> Result<(), ProvisioningError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID {
        return Err(ProvisioningError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ProvisioningError> {
    if password.len() > MAX_PASSWORD {
        return Err(ProvisioningError::InvalidPassword);
    }
    Ok(())
}

fn validate_api_url(url: &str) -> Result<(), ProvisioningError> {
    if url.is_empty() || url.len() > MAX_API_URL {
        return Err(ProvisioningError::InvalidApiUrl);
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ProvisioningError::InvalidApiUrl);
    }
    Ok(())
}

fn validate_api_key(key: &str) -> Result<(), ProvisioningError> {
    if key.is_empty() || key.len() > MAX_API_KEY {
        return Err(ProvisioningError::InvalidApiKey);
    }
    Ok(())
}

/// `****` followed by the last four characters; short values fully masked.
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{tail}")
}

// ───────────────────────────────────────────────────────────────
// Store
// ───────────────────────────────────────────────────────────────

/// Loads, saves and wipes the [`ProvisioningRecord`].
pub struct ProvisioningStore<'a> {
    storage: &'a mut dyn StoragePort,
}

impl<'a> ProvisioningStore<'a> {
    pub fn new(storage: &'a mut dyn StoragePort) -> Self {
        Self { storage }
    }

    /// Missing keys read as empty; storage errors degrade to an empty
    /// (unprovisioned) record, which routes boot into the portal.
    pub fn load(&self) -> ProvisioningRecord {
        let read = |key: &str| -> String {
            match self.storage.get(PROVISION_NAMESPACE, key) {
                Ok(Some(v)) => v,
                Ok(None) => String::new(),
                Err(e) => {
                    warn!("Provisioning: read '{}' failed ({})", key, e);
                    String::new()
                }
            }
        };

        let record = ProvisioningRecord {
            wifi_ssid: read(KEY_SSID),
            wifi_password: read(KEY_PASS),
            api_url: read(KEY_API_URL),
            api_key: read(KEY_API_KEY),
            device_serial: read(KEY_SERIAL),
            provisioned: read(KEY_PROVISIONED) == "1",
        };
        info!(
            "Provisioning: loaded (wifi={}, api={}, provisioned={}, key={})",
            record.has_wifi(),
            record.has_api(),
            record.provisioned,
            mask_secret(&record.api_key)
        );
        record
    }

    /// Persist every field; `provisioned` is recomputed from the record.
    pub fn save(&mut self, record: &ProvisioningRecord) -> Result<(), Error> {
        let provisioned = record.has_wifi() && record.has_api();
        self.storage.put(PROVISION_NAMESPACE, KEY_SSID, &record.wifi_ssid)?;
        self.storage.put(PROVISION_NAMESPACE, KEY_PASS, &record.wifi_password)?;
        self.storage.put(PROVISION_NAMESPACE, KEY_API_URL, &record.api_url)?;
        self.storage.put(PROVISION_NAMESPACE, KEY_API_KEY, &record.api_key)?;
        self.storage.put(PROVISION_NAMESPACE, KEY_SERIAL, &record.device_serial)?;
        self.storage.put(
            PROVISION_NAMESPACE,
            KEY_PROVISIONED,
            if provisioned { "1" } else { "0" },
        )?;
        info!(
            "Provisioning: saved (ssid='{}', url='{}', key={}, provisioned={})",
            record.wifi_ssid,
            record.api_url,
            mask_secret(&record.api_key),
            provisioned
        );
        Ok(())
    }

    /// Remove every provisioning key and the cached station credentials.
    pub fn wipe(&mut self) -> Result<(), Error> {
        for key in [KEY_SSID, KEY_PASS, KEY_API_URL, KEY_API_KEY, KEY_SERIAL, KEY_PROVISIONED] {
            self.storage.remove(PROVISION_NAMESPACE, key)?;
        }
        self.storage.erase_namespace(WIFI_NAMESPACE)?;
        warn!("Provisioning: all credentials wiped");
        Ok(())
    }
}
