//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlService (domain)
//! ```
//!
//! Driven adapters (readings, event sinks, storage) implement these
//! traits.  The [`ControlService`](super::service::ControlService) and the
//! adaptation worker consume them via generics, so the control core never
//! touches flash or the serial console directly.
//!
//! ## Persistence contract
//!
//! - **StoragePort** is byte-oriented and namespace-scoped.  Namespaces
//!   never alias each other.
//! - **TypedStore** layers the typed `save(namespace, key, value)` /
//!   `load(namespace, key, default)` contract on top of any StoragePort.
//!   A missing or undecodable record yields the caller's default.
//! - **ConfigPort** implementations MUST validate before persisting.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::SystemConfig;
use crate::learning::context::SensorFrame;

/// Largest persisted record (the lookup table) in bytes.
pub const MAX_RECORD_SIZE: usize = 2048;

// ───────────────────────────────────────────────────────────────
// Readings port (driven adapter: acquisition → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: the control task pulls the latest compensated
/// readings once per cycle.  Acquisition and calibration live upstream.
pub trait ReadingsPort {
    fn latest(&mut self) -> SensorFrame;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (serial log,
/// telemetry uplink, display).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// - Keys are namespaced; a key in one namespace is invisible in another.
/// - Write operations MUST be atomic.  The ESP-IDF NVS API guarantees
///   this natively; the in-memory simulation achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Typed save/load over any [`StoragePort`], encoded with postcard.
pub trait TypedStore: StoragePort {
    /// Encode and persist `value` under `namespace`/`key`.
    fn save_value<T: Serialize>(
        &mut self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(value).map_err(|_| StorageError::IoError)?;
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(StorageError::Full);
        }
        self.write(namespace, key, &bytes)
    }

    /// Decode the value stored under `namespace`/`key`, or `default` when
    /// the key is absent, unreadable or corrupt.
    fn load_value<T: DeserializeOwned>(&self, namespace: &str, key: &str, default: T) -> T {
        self.try_load_value(namespace, key).unwrap_or(default)
    }

    /// Like [`load_value`](Self::load_value) but reports a miss as `None`.
    fn try_load_value<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let len = self.read(namespace, key, &mut buf).ok()?;
        postcard::from_bytes(&buf[..len]).ok()
    }
}

impl<S: StoragePort + ?Sized> TypedStore for S {}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations and parameter validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full or the record is too large.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
