//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] for every persistent subsystem: the
//! provisioning record, the reading buffer slots and counters, and the
//! system config blob.
//!
//! # Security
//!
//! - Encrypted NVS: on ESP32 the "provision" namespace lives on the
//!   encrypted NVS partition when `CONFIG_NVS_ENCRYPTION` is set.  The
//!   simulation backend uses plaintext (dev/test only).
//! - Namespace isolation: each subsystem uses its own namespace.
//! - Atomic writes: ESP-IDF NVS commits are atomic per `nvs_commit()`.
//!
//! The adapter is cheap to clone.  On ESP-IDF every call opens its own
//! handle (NVS is internally locked); the simulation clones share one map.

use log::{info, warn};

use crate::app::ports::{StorageError, StoragePort};
use crate::config::SystemConfig;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;
#[cfg(not(target_os = "espidf"))]
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "coldmon";
const CONFIG_KEY: &str = "syscfg";

/// NVS limits keys and namespaces to 15 characters.
#[cfg(target_os = "espidf")]
const NVS_KEY_MAX: usize = 15;

#[cfg(target_os = "espidf")]
const MAX_VALUE_SIZE: usize = 4000;

#[derive(Clone)]
pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is
    /// erased and re-initialised automatically.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // main task before any worker thread touches NVS.
            let ret = unsafe { nvs_flash_init() };
            let stale = ret == ESP_ERR_NVS_NO_FREE_PAGES as esp_err_t
                || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as esp_err_t;
            if stale {
                warn!("NVS: partition full or from an older layout, erasing");
                check(unsafe { nvs_flash_erase() }).map_err(|_| StorageError::IoError)?;
                check(unsafe { nvs_flash_init() }).map_err(|_| StorageError::IoError)?;
            } else {
                check(ret).map_err(|_| StorageError::IoError)?;
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Load the persisted [`SystemConfig`], falling back to defaults when
    /// absent, undecodable or failing validation.
    pub fn load_config(&self) -> SystemConfig {
        match self.get_blob(CONFIG_NAMESPACE, CONFIG_KEY) {
            Ok(Some(bytes)) => match postcard::from_bytes::<SystemConfig>(&bytes) {
                Ok(cfg) if cfg.validate().is_ok() => {
                    info!("NvsAdapter: loaded config ({} bytes)", bytes.len());
                    cfg
                }
                Ok(_) | Err(_) => {
                    warn!("NvsAdapter: stored config invalid, using defaults");
                    SystemConfig::default()
                }
            },
            Ok(None) => {
                info!("NvsAdapter: no stored config, using defaults");
                SystemConfig::default()
            }
            Err(e) => {
                warn!("NvsAdapter: config read error ({}), using defaults", e);
                SystemConfig::default()
            }
        }
    }

    /// Validate and persist a [`SystemConfig`].
    pub fn save_config(&mut self, config: &SystemConfig) -> Result<(), &'static str> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| "config encoding failed")?;
        self.put_blob(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)
            .map_err(|_| "config write failed")?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    #[cfg(not(target_os = "espidf"))]
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy `name` into a NUL-terminated NVS identifier buffer.
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; NVS_KEY_MAX + 1] {
        let mut buf = [0u8; NVS_KEY_MAX + 1];
        let len = name.len().min(NVS_KEY_MAX);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        buf
    }

    /// Run `f` on an open handle for `namespace`, committing afterwards
    /// when opened for writing.
    #[cfg(target_os = "espidf")]
    fn with_handle<T>(
        namespace: &str,
        write: bool,
        f: impl FnOnce(nvs_handle_t) -> Result<T, esp_err_t>,
    ) -> Result<T, esp_err_t> {
        let ns = Self::c_name(namespace);
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let mut handle: nvs_handle_t = 0;
        // SAFETY: `ns` is NUL-terminated and outlives the call.
        check(unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) })?;
        let result = f(handle).and_then(|value| {
            if write {
                // SAFETY: `handle` is open until the close below.
                check(unsafe { nvs_commit(handle) })?;
            }
            Ok(value)
        });
        // SAFETY: closes the handle opened above exactly once.
        unsafe { nvs_close(handle) };
        result
    }

    /// Two-pass sized read shared by strings and blobs: query the length,
    /// then fill a buffer of that size.
    #[cfg(target_os = "espidf")]
    fn read_sized(
        namespace: &str,
        key: &str,
        getter: unsafe extern "C" fn(nvs_handle_t, *const core::ffi::c_char, *mut core::ffi::c_void, *mut usize) -> esp_err_t,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let key = Self::c_name(key);
        let result = Self::with_handle(namespace, false, |handle| {
            let mut size = 0usize;
            // SAFETY: a null output pointer asks only for the length.
            check(unsafe { getter(handle, key.as_ptr().cast(), core::ptr::null_mut(), &mut size) })?;
            if size == 0 || size > MAX_VALUE_SIZE {
                return Err(ESP_ERR_NVS_INVALID_LENGTH as esp_err_t);
            }
            let mut buf = vec![0u8; size];
            // SAFETY: `buf` holds exactly `size` bytes.
            check(unsafe { getter(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size) })?;
            buf.truncate(size);
            Ok(buf)
        });
        match result {
            Ok(bytes) => Ok(Some(bytes)),
            // A namespace that was never written also reports NOT_FOUND.
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND as esp_err_t => Ok(None),
            Err(e) if e == ESP_ERR_NVS_INVALID_LENGTH as esp_err_t => Err(StorageError::Corrupted),
            Err(_) => Err(StorageError::IoError),
        }
    }

    #[cfg(target_os = "espidf")]
    fn write_error(code: esp_err_t) -> StorageError {
        if code == ESP_ERR_NVS_NOT_ENOUGH_SPACE as esp_err_t {
            StorageError::Full
        } else {
            StorageError::IoError
        }
    }

    #[cfg(target_os = "espidf")]
    fn erase_result(result: Result<(), esp_err_t>) -> Result<(), StorageError> {
        match result {
            Err(e) if e != ESP_ERR_NVS_NOT_FOUND as esp_err_t => Err(StorageError::IoError),
            _ => Ok(()),
        }
    }
}

#[cfg(target_os = "espidf")]
fn check(ret: esp_err_t) -> Result<(), esp_err_t> {
    if ret == ESP_OK as esp_err_t { Ok(()) } else { Err(ret) }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn get_str_raw(
    handle: nvs_handle_t,
    key: *const core::ffi::c_char,
    out: *mut core::ffi::c_void,
    len: *mut usize,
) -> esp_err_t {
    // SAFETY: forwarded unchanged from `read_sized`.
    unsafe { nvs_get_str(handle, key, out.cast(), len) }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn get_blob_raw(
    handle: nvs_handle_t,
    key: *const core::ffi::c_char,
    out: *mut core::ffi::c_void,
    len: *mut usize,
) -> esp_err_t {
    // SAFETY: forwarded unchanged from `read_sized`.
    unsafe { nvs_get_blob(handle, key, out, len) }
}

impl StoragePort for NvsAdapter {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        let bytes = self.map().get(&Self::composite_key(namespace, key)).cloned();

        #[cfg(target_os = "espidf")]
        let bytes = Self::read_sized(namespace, key, get_str_raw)?.map(|mut b| {
            // strip the NUL terminator
            b.pop();
            b
        });

        bytes
            .map(|b| String::from_utf8(b).map_err(|_| StorageError::Corrupted))
            .transpose()
    }

    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.put_blob(namespace, key, value.as_bytes())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            let mut text = Vec::with_capacity(value.len() + 1);
            text.extend_from_slice(value.as_bytes());
            text.push(0);
            Self::with_handle(namespace, true, |handle| {
                // SAFETY: both strings are NUL-terminated and outlive the call.
                check(unsafe { nvs_set_str(handle, key.as_ptr().cast(), text.as_ptr().cast()) })
            })
            .map_err(Self::write_error)
        }
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.map().remove(&Self::composite_key(namespace, key));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            Self::erase_result(Self::with_handle(namespace, true, |handle| {
                // SAFETY: `key` is NUL-terminated.
                match check(unsafe { nvs_erase_key(handle, key.as_ptr().cast()) }) {
                    Err(e) if e == ESP_ERR_NVS_NOT_FOUND as esp_err_t => Ok(()),
                    other => other,
                }
            }))
        }
    }

    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let prefix = Self::composite_key(namespace, "");
            self.map().retain(|k, _| !k.starts_with(&prefix));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            // SAFETY: `handle` is open for writing.
            Self::erase_result(Self::with_handle(namespace, true, |handle| {
                check(unsafe { nvs_erase_all(handle) })
            }))
        }
    }

    fn get_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            Ok(self.map().get(&Self::composite_key(namespace, key)).cloned())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::read_sized(namespace, key, get_blob_raw)
        }
    }

    fn put_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.map().insert(Self::composite_key(namespace, key), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            Self::with_handle(namespace, true, |handle| {
                // SAFETY: `data` outlives the call and its length is passed alongside.
                check(unsafe { nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len()) })
            })
            .map_err(Self::write_error)
        }
    }
}
