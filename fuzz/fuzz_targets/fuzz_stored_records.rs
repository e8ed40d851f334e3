//! Fuzz target: persisted records
//!
//! Feeds arbitrary bytes to every record the firmware reads back from
//! NVS (gain record, lookup table) and verifies:
//! - No panics on corrupt or truncated flash contents
//! - A corrupt gain record falls back to the configured defaults
//! - Restored gains always lie inside the gain bounds
//!
//! cargo fuzz run fuzz_stored_records

#![no_main]

use std::collections::HashMap;

use libfuzzer_sys::fuzz_target;
use tankctl::app::ports::{StorageError, StoragePort};
use tankctl::config::{LearningConfig, LoopConfig, LoopId};
use tankctl::control::gains::GainBounds;
use tankctl::control::pid::PidController;
use tankctl::learning::context::BucketWidths;
use tankctl::learning::store::GainLookupStore;

// ── In-memory StoragePort for fuzz testing ────────────────────

struct MemStore {
    data: HashMap<String, Vec<u8>>,
}

impl StoragePort for MemStore {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.data.get(&format!("{ns}::{key}")) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.data.insert(format!("{ns}::{key}"), data.to_vec());
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.data.contains_key(&format!("{ns}::{key}"))
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        self.data.remove(&format!("{ns}::{key}"));
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let mut store = MemStore { data: HashMap::new() };
    store.data.insert("heater_pid::gains".into(), data.to_vec());
    store.data.insert("heater_ml::table".into(), data.to_vec());

    let bounds = GainBounds::default();
    let mut pid = PidController::new(
        LoopId::Heater,
        &LoopConfig::heater(),
        bounds,
        &LearningConfig::default(),
    );
    pid.restore(&store);
    assert!(bounds.contains(&pid.gains()), "restored gains escaped bounds");
    assert!(pid.target().is_finite());

    let mut table = GainLookupStore::new(LoopId::Heater.ml_namespace(), BucketWidths::default());
    table.load(&store);
    let _ = table.lookup(25.0, 20.0, 12, Default::default());
    let _ = table.persist(&mut store);
});
