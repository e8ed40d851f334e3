//! Mock hardware for integration tests.
//!
//! Relay pins record every level written so tests can assert on the
//! switching history without touching real GPIO.  A first-order thermal
//! model stands in for the tank.

use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::Infallible;
use std::rc::Rc;

use tankctl::app::events::AppEvent;
use tankctl::app::ports::{EventSink, StorageError, StoragePort};
use tankctl::learning::context::SensorFrame;

// ── Relay pin ─────────────────────────────────────────────────

/// Output pin whose level history is shared with the test.
#[derive(Clone, Default)]
pub struct MockPin {
    levels: Rc<RefCell<Vec<bool>>>,
}

#[allow(dead_code)]
impl MockPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.levels.borrow().last().copied().unwrap_or(false)
    }

    pub fn writes(&self) -> usize {
        self.levels.borrow().len()
    }
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.levels.borrow_mut().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.levels.borrow_mut().push(true);
        Ok(())
    }
}

// ── Storage ───────────────────────────────────────────────────

/// In-memory storage with write-failure injection.
#[derive(Default)]
pub struct MockNvs {
    data: HashMap<(String, String), Vec<u8>>,
    pub fail_writes: bool,
    pub writes: u32,
}

#[allow(dead_code)]
impl MockNvs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.data.contains_key(&(namespace.into(), key.into()))
    }
}

impl StoragePort for MockNvs {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self
            .data
            .get(&(namespace.into(), key.into()))
            .ok_or(StorageError::NotFound)?;
        if data.len() > buf.len() {
            return Err(StorageError::Full);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::IoError);
        }
        self.writes += 1;
        self.data.insert((namespace.into(), key.into()), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.data.remove(&(namespace.into(), key.into()));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.contains(namespace, key)
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Plant ─────────────────────────────────────────────────────

/// First-order tank: heats at `heat_rate` °C/s while the relay is on and
/// loses heat to ambient with time constant `1 / loss`.
pub struct ThermalPlant {
    pub temperature: f32,
    pub ambient: f32,
    pub heat_rate: f32,
    pub loss: f32,
}

#[allow(dead_code)]
impl ThermalPlant {
    pub fn new(temperature: f32, ambient: f32) -> Self {
        Self {
            temperature,
            ambient,
            heat_rate: 0.03,
            loss: 0.001,
        }
    }

    pub fn step(&mut self, heater_on: bool, dt: f32) {
        let heat = if heater_on { self.heat_rate } else { 0.0 };
        self.temperature += dt * (heat - self.loss * (self.temperature - self.ambient));
    }
}

/// Frame with both loop measurements and an ambient reading.
#[allow(dead_code)]
pub fn frame(temperature: f32, ph: f32) -> SensorFrame {
    SensorFrame {
        temperature: Some(temperature),
        ph: Some(ph),
        ambient: Some(20.0),
        ..SensorFrame::default()
    }
}
