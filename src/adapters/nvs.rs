//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the controller.
//!
//! | Namespace     | Key      | Record                      |
//! |---------------|----------|-----------------------------|
//! | `tankctl`     | `syscfg` | `SystemConfig`              |
//! | `heater_pid`  | `gains`  | heater `GainRecord`         |
//! | `co2_pid`     | `gains`  | CO2 `GainRecord`            |
//! | `heater_ml`   | `table`  | heater gain lookup table    |
//! | `co2_ml`      | `table`  | CO2 gain lookup table       |
//!
//! Every record is one postcard blob.  On the device each access opens
//! the namespace, performs one blob operation and commits; on the host a
//! map keyed by `namespace::key` stands in for flash.
//!
//! Config is range-checked by [`validate_config`] before it is written.

use crate::app::ports::{ConfigError, ConfigPort, MAX_RECORD_SIZE, StorageError, StoragePort};
use crate::config::{LoopConfig, RelayConfig, SystemConfig};
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use std::cell::RefCell;
#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "tankctl";
const CONFIG_KEY: &str = "syscfg";

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    blobs: RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// Returns `Err(ConfigError::IoError)` if flash initialisation fails
    /// unrecoverably.  A partition that is full or was written by a newer
    /// IDF is erased and re-initialised.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called from the main task before any other NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES as i32 || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as i32 {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK as i32 || unsafe { nvs_flash_init() } != ESP_OK as i32 {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK as i32 {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self::unbacked())
    }

    fn unbacked() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            blobs: RefCell::new(HashMap::new()),
        }
    }

    // ── Blob backend ──────────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn slot(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    #[cfg(not(target_os = "espidf"))]
    fn get_blob(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let blobs = self.blobs.borrow();
        let data = blobs
            .get(&Self::slot(namespace, key))
            .ok_or(StorageError::NotFound)?;
        let dst = buf.get_mut(..data.len()).ok_or(StorageError::Full)?;
        dst.copy_from_slice(data);
        Ok(data.len())
    }

    #[cfg(not(target_os = "espidf"))]
    fn set_blob(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.blobs
            .borrow_mut()
            .insert(Self::slot(namespace, key), data.to_vec());
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn erase_blob(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.blobs.borrow_mut().remove(&Self::slot(namespace, key));
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn has_blob(&self, namespace: &str, key: &str) -> bool {
        self.blobs.borrow().contains_key(&Self::slot(namespace, key))
    }

    /// NUL-terminated copy of an NVS name (max 15 chars).
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; 16] {
        let mut out = [0u8; 16];
        let len = name.len().min(15);
        out[..len].copy_from_slice(&name.as_bytes()[..len]);
        out
    }

    /// Open `namespace`, run `f` with the handle, commit if writing, close.
    #[cfg(target_os = "espidf")]
    fn with_handle<T>(
        namespace: &str,
        write: bool,
        f: impl FnOnce(nvs_handle_t) -> Result<T, i32>,
    ) -> Result<T, i32> {
        let ns = Self::c_name(namespace);
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let mut handle: nvs_handle_t = 0;
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK as i32 {
            return Err(ret);
        }
        let mut result = f(handle);
        if write && result.is_ok() {
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK as i32 {
                result = Err(ret);
            }
        }
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(target_os = "espidf")]
    fn map_esp(ret: i32) -> StorageError {
        if ret == ESP_ERR_NVS_NOT_FOUND as i32 {
            StorageError::NotFound
        } else if ret == ESP_ERR_NVS_NOT_ENOUGH_SPACE as i32 || ret == ESP_ERR_NVS_INVALID_LENGTH as i32 {
            StorageError::Full
        } else {
            StorageError::IoError
        }
    }

    #[cfg(target_os = "espidf")]
    fn get_blob(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let key = Self::c_name(key);
        Self::with_handle(namespace, false, |h| {
            let mut size = buf.len();
            let ret = unsafe { nvs_get_blob(h, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size) };
            if ret == ESP_OK as i32 { Ok(size) } else { Err(ret) }
        })
        .map_err(Self::map_esp)
    }

    #[cfg(target_os = "espidf")]
    fn set_blob(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let ckey = Self::c_name(key);
        Self::with_handle(namespace, true, |h| {
            let ret = unsafe { nvs_set_blob(h, ckey.as_ptr().cast(), data.as_ptr().cast(), data.len()) };
            if ret == ESP_OK as i32 { Ok(()) } else { Err(ret) }
        })
        .map_err(|e| {
            warn!("NvsAdapter: write {}/{} failed ({})", namespace, key, e);
            Self::map_esp(e)
        })
    }

    #[cfg(target_os = "espidf")]
    fn erase_blob(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let key = Self::c_name(key);
        Self::with_handle(namespace, true, |h| {
            let ret = unsafe { nvs_erase_key(h, key.as_ptr().cast()) };
            if ret == ESP_OK as i32 || ret == ESP_ERR_NVS_NOT_FOUND as i32 {
                Ok(())
            } else {
                Err(ret)
            }
        })
        .or_else(|e| {
            // A namespace that was never written cannot be opened.
            if e == ESP_ERR_NVS_NOT_FOUND as i32 { Ok(()) } else { Err(Self::map_esp(e)) }
        })
    }

    #[cfg(target_os = "espidf")]
    fn has_blob(&self, namespace: &str, key: &str) -> bool {
        let key = Self::c_name(key);
        Self::with_handle(namespace, false, |h| {
            Ok(unsafe { nvs_find_key(h, key.as_ptr().cast(), core::ptr::null_mut()) } == ESP_OK as i32)
        })
        .unwrap_or(false)
    }
}

pub fn validate_config(cfg: &SystemConfig) -> Result<(), ConfigError> {
    validate_loop(&cfg.heater)?;
    validate_loop(&cfg.co2)?;
    validate_relay(&cfg.heater_relay)?;
    validate_relay(&cfg.co2_relay)?;

    let b = &cfg.gain_bounds;
    if !(b.kp_min > 0.0 && b.kp_min < b.kp_max)
        || !(b.ki_min > 0.0 && b.ki_min < b.ki_max)
        || !(b.kd_min > 0.0 && b.kd_min < b.kd_max)
    {
        return Err(ConfigError::ValidationFailed(
            "gain bounds must be positive with min < max",
        ));
    }

    let l = &cfg.learning;
    if !(0.0..=1.0).contains(&l.blend.low_confidence)
        || !(0.0..=1.0).contains(&l.blend.high_confidence)
        || l.blend.low_confidence > l.blend.high_confidence
    {
        return Err(ConfigError::ValidationFailed(
            "confidence bands must be 0.0–1.0 with low <= high",
        ));
    }
    if !(0.0..=1.0).contains(&l.blend.high_blend) || !(0.0..=1.0).contains(&l.blend.low_blend) {
        return Err(ConfigError::ValidationFailed("blend weights must be 0.0–1.0"));
    }
    if l.cache_validity_ms == 0 || l.performance_window_ms == 0 {
        return Err(ConfigError::ValidationFailed(
            "cache validity and performance window must be non-zero",
        ));
    }

    if !(100..=5000).contains(&cfg.control_loop_interval_ms) {
        return Err(ConfigError::ValidationFailed(
            "control_loop_interval_ms must be 100–5000",
        ));
    }
    if cfg.status_interval_ms < cfg.control_loop_interval_ms {
        return Err(ConfigError::ValidationFailed(
            "status_interval_ms must be >= control_loop_interval_ms",
        ));
    }
    Ok(())
}

fn validate_loop(l: &LoopConfig) -> Result<(), ConfigError> {
    if !l.target.is_finite() {
        return Err(ConfigError::ValidationFailed("target must be finite"));
    }
    if !(l.output_min.is_finite() && l.output_max.is_finite() && l.output_min < l.output_max) {
        return Err(ConfigError::ValidationFailed("output_min must be < output_max"));
    }
    if !(l.safety_margin > 0.0 && l.safety_margin.is_finite()) {
        return Err(ConfigError::ValidationFailed("safety_margin must be positive"));
    }
    if !(l.integral_max > 0.0 && l.integral_max.is_finite()) {
        return Err(ConfigError::ValidationFailed("integral_max must be positive"));
    }
    if !(l.derivative_filter > 0.0 && l.derivative_filter <= 1.0) {
        return Err(ConfigError::ValidationFailed(
            "derivative_filter must be >0.0–1.0",
        ));
    }
    if !(l.buckets.value > 0.0 && l.buckets.ambient > 0.0) {
        return Err(ConfigError::ValidationFailed("bucket widths must be positive"));
    }
    if l.ramp_enabled && !(l.ramp_rate > 0.0) {
        return Err(ConfigError::ValidationFailed("ramp_rate must be positive"));
    }
    if l.filter.enabled && !(l.filter.measurement_noise > 0.0 && l.filter.process_noise >= 0.0) {
        return Err(ConfigError::ValidationFailed(
            "filter noise terms must be non-negative",
        ));
    }
    Ok(())
}

fn validate_relay(r: &RelayConfig) -> Result<(), ConfigError> {
    if !(1000..=600_000).contains(&r.window_ms) {
        return Err(ConfigError::ValidationFailed("relay window_ms must be 1000–600000"));
    }
    if r.min_on_ms >= r.window_ms || r.min_off_ms >= r.window_ms {
        return Err(ConfigError::ValidationFailed(
            "relay min_on_ms / min_off_ms must be < window_ms",
        ));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        match self.get_blob(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(len) => {
                let cfg: SystemConfig =
                    postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)?;
                info!("NvsAdapter: loaded config ({} bytes)", len);
                Ok(cfg)
            }
            Err(StorageError::NotFound) => {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(SystemConfig::default())
            }
            Err(e) => {
                warn!("NvsAdapter: config read failed ({}), using defaults", e);
                Ok(SystemConfig::default())
            }
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.set_blob(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)
            .map_err(|e| match e {
                StorageError::Full => ConfigError::StorageFull,
                _ => ConfigError::IoError,
            })?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.get_blob(namespace, key, buf)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.set_blob(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.erase_blob(namespace, key)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.has_blob(namespace, key)
    }
}

impl Default for NvsAdapter {
    /// Falls back to an unbacked handle if NVS is unavailable.
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::unbacked())
    }
}
