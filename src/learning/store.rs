//! Gain lookup store.
//!
//! Scores closed performance windows and folds them into a fixed-capacity
//! table keyed by [`ContextKey`].  Each bucket keeps an exponential moving
//! average of the gains that ran in that context, biased toward samples
//! that beat the bucket's running score.
//!
//! The store is owned by the adaptation worker and never touched from the
//! control cycle.  Persistence goes through [`TypedStore`] as one record
//! per loop.

use core::fmt::Write;

use heapless::{FnvIndexMap, HistoryBuffer};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::context::{BucketWidths, ContextKey, Season};
use crate::app::ports::{StorageError, StoragePort, TypedStore};
use crate::control::gains::Gains;

/// Buckets kept in memory (power of two for the index map).
pub const TABLE_CAPACITY: usize = 64;
/// Most recent samples kept for export.
pub const RECENT_CAPACITY: usize = 32;

const TABLE_KEY: &str = "table";
const MIN_LOOKUP_SAMPLES: u32 = 3;
const MIN_LOOKUP_SCORE: f32 = 50.0;
const MIN_FALLBACK_SAMPLES: u32 = 5;
const FLUSH_EVERY: u32 = 10;
const MIN_TRAINING_SAMPLES: u32 = 50;

/// Penalty caps for the 0–100 score.
const SETTLING_CAP_S: f32 = 300.0;
const OVERSHOOT_SCALE: f32 = 10.0;
const SSE_SCALE: f32 = 20.0;
const VARIANCE_CAP: f32 = 5.0;

/// One closed performance window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp_ms: u64,
    pub value: f32,
    pub target: f32,
    pub ambient: f32,
    pub hour: u8,
    pub season: Season,
    pub tank_volume: f32,
    pub gains: Gains,
    pub error_mean: f32,
    pub error_variance: f32,
    pub settling_time_s: f32,
    /// Fraction of target (0.1 == 10 %).
    pub overshoot: f32,
    pub steady_state_error: f32,
    pub average_output: f32,
    pub sample_count: u32,
    pub score: f32,
}

/// Score a window from 0 (useless) to 100 (ideal).
pub fn performance_score(s: &PerformanceSample) -> f32 {
    let settling = (s.settling_time_s / SETTLING_CAP_S).clamp(0.0, 1.0);
    let overshoot = (s.overshoot * OVERSHOOT_SCALE).clamp(0.0, 1.0);
    let sse = (s.steady_state_error.abs() * SSE_SCALE).clamp(0.0, 1.0);
    let variance = (s.error_variance / VARIANCE_CAP).clamp(0.0, 1.0);
    let score = 100.0 * (1.0 - 0.3 * settling - 0.3 * overshoot - 0.2 * sse - 0.2 * variance);
    if score.is_finite() { score.max(0.0) } else { 0.0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainEntry {
    pub key: ContextKey,
    pub gains: Gains,
    pub avg_score: f32,
    pub sample_count: u32,
}

impl GainEntry {
    /// Confidence in `[0, 1]` from sample count and average score.
    pub fn confidence(&self) -> f32 {
        ((self.sample_count as f32 / 20.0) * (self.avg_score / 100.0)).clamp(0.0, 1.0)
    }
}

/// A lookup result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recommendation {
    pub gains: Gains,
    pub confidence: f32,
    /// `true` when the exact bucket was unusable and the global best was returned.
    pub fallback: bool,
}

#[derive(Serialize, Deserialize)]
struct TableRecord {
    total_samples: u32,
    entries: heapless::Vec<GainEntry, TABLE_CAPACITY>,
}

pub struct GainLookupStore {
    namespace: &'static str,
    widths: BucketWidths,
    table: FnvIndexMap<ContextKey, GainEntry, TABLE_CAPACITY>,
    recent: HistoryBuffer<PerformanceSample, RECENT_CAPACITY>,
    total_samples: u32,
    session_samples: u32,
    dirty: bool,
}

impl GainLookupStore {
    pub fn new(namespace: &'static str, widths: BucketWidths) -> Self {
        Self {
            namespace,
            widths,
            table: FnvIndexMap::new(),
            recent: HistoryBuffer::new(),
            total_samples: 0,
            session_samples: 0,
            dirty: false,
        }
    }

    // ── Persistence ───────────────────────────────────────────

    /// Replace the in-memory table with the persisted one, if any.
    pub fn load(&mut self, storage: &impl StoragePort) {
        let Some(record) = storage.try_load_value::<TableRecord>(self.namespace, TABLE_KEY) else {
            info!("Lookup '{}': no stored table", self.namespace);
            return;
        };
        self.table.clear();
        for entry in record.entries {
            let _ = self.table.insert(entry.key, entry);
        }
        self.total_samples = record.total_samples;
        self.dirty = false;
        info!(
            "Lookup '{}': loaded {} buckets ({} samples)",
            self.namespace,
            self.table.len(),
            self.total_samples
        );
    }

    pub fn persist(&mut self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        let mut entries = heapless::Vec::new();
        for entry in self.table.values() {
            // Capacities match, so this cannot overflow.
            let _ = entries.push(*entry);
        }
        let record = TableRecord {
            total_samples: self.total_samples,
            entries,
        };
        match storage.save_value(self.namespace, TABLE_KEY, &record) {
            Ok(()) => {
                self.dirty = false;
                debug!("Lookup '{}': table saved", self.namespace);
                Ok(())
            }
            Err(e) => {
                warn!("Lookup '{}': table save failed: {}", self.namespace, e);
                Err(e)
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ── Learning ──────────────────────────────────────────────

    /// Score and record a sample.  Returns `true` when enough samples
    /// have accumulated that the table should be flushed.
    pub fn log_sample(&mut self, mut sample: PerformanceSample) -> bool {
        sample.score = performance_score(&sample);
        self.recent.write(sample);
        self.total_samples = self.total_samples.saturating_add(1);
        self.session_samples = self.session_samples.saturating_add(1);
        self.update_bucket(&sample);
        self.dirty = true;

        info!(
            "Lookup '{}': sample #{} score {:.1} (Kp={:.3} Ki={:.3} Kd={:.3})",
            self.namespace,
            self.total_samples,
            sample.score,
            sample.gains.kp,
            sample.gains.ki,
            sample.gains.kd
        );
        self.session_samples % FLUSH_EVERY == 0
    }

    fn update_bucket(&mut self, s: &PerformanceSample) {
        let key = ContextKey::new(s.value, s.ambient, s.hour, s.season, &self.widths);

        if let Some(entry) = self.table.get_mut(&key) {
            let weight = if s.score > entry.avg_score { 0.7 } else { 0.3 };
            entry.gains = entry.gains.lerp(s.gains, weight);
            entry.avg_score = entry.avg_score * 0.9 + s.score * 0.1;
            entry.sample_count = entry.sample_count.saturating_add(1);
            return;
        }

        if self.table.len() == TABLE_CAPACITY {
            self.evict_least_sampled();
        }
        let entry = GainEntry {
            key,
            gains: s.gains,
            avg_score: s.score,
            sample_count: 1,
        };
        let _ = self.table.insert(key, entry);
    }

    fn evict_least_sampled(&mut self) {
        let victim = self
            .table
            .values()
            .min_by_key(|e| e.sample_count)
            .map(|e| e.key);
        if let Some(key) = victim {
            self.table.remove(&key);
            debug!("Lookup '{}': evicted bucket {:?}", self.namespace, key);
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Best gains for a context: the exact bucket when it is trusted,
    /// otherwise the global best.
    pub fn lookup(&self, value: f32, ambient: f32, hour: u8, season: Season) -> Option<Recommendation> {
        let key = ContextKey::new(value, ambient, hour, season, &self.widths);
        let trusted = self
            .table
            .get(&key)
            .filter(|e| e.sample_count >= MIN_LOOKUP_SAMPLES && e.avg_score > MIN_LOOKUP_SCORE);
        if let Some(entry) = trusted {
            return Some(Recommendation {
                gains: entry.gains,
                confidence: entry.confidence(),
                fallback: false,
            });
        }
        self.best_global().map(|entry| Recommendation {
            gains: entry.gains,
            confidence: entry.confidence(),
            fallback: true,
        })
    }

    /// Highest-scoring bucket with enough samples to be trusted.
    pub fn best_global(&self) -> Option<&GainEntry> {
        self.table
            .values()
            .filter(|e| e.sample_count >= MIN_FALLBACK_SAMPLES)
            .max_by(|a, b| a.avg_score.total_cmp(&b.avg_score))
    }

    pub fn entry(&self, key: &ContextKey) -> Option<&GainEntry> {
        self.table.get(key)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn total_samples(&self) -> u32 {
        self.total_samples
    }

    pub fn session_samples(&self) -> u32 {
        self.session_samples
    }

    /// Enough history for offline training.
    pub fn has_minimum_data(&self) -> bool {
        self.total_samples >= MIN_TRAINING_SAMPLES
    }

    pub fn clear(&mut self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        self.table.clear();
        self.recent.clear();
        self.total_samples = 0;
        self.session_samples = 0;
        self.dirty = false;
        info!("Lookup '{}': all data cleared", self.namespace);
        storage.delete(self.namespace, TABLE_KEY)
    }

    /// Recent samples as CSV, oldest first, at most `max_rows` rows.
    pub fn export_csv(&self, max_rows: usize) -> String {
        let mut csv = String::from(
            "timestamp,currentValue,targetValue,ambientTemp,hourOfDay,season,tankVolume,\
             kp,ki,kd,errorMean,errorVariance,settlingTime,overshoot,steadyStateError,\
             averageOutput,cycleCount,score\n",
        );
        let skip = self.recent.len().saturating_sub(max_rows);
        for s in self.recent.oldest_ordered().skip(skip) {
            let _ = writeln!(
                csv,
                "{},{:.3},{:.3},{:.3},{},{},{:.1},{:.4},{:.4},{:.4},{:.4},{:.4},{:.1},{:.4},{:.4},{:.2},{},{:.2}",
                s.timestamp_ms,
                s.value,
                s.target,
                s.ambient,
                s.hour,
                s.season.index(),
                s.tank_volume,
                s.gains.kp,
                s.gains.ki,
                s.gains.kd,
                s.error_mean,
                s.error_variance,
                s.settling_time_s,
                s.overshoot,
                s.steady_state_error,
                s.average_output,
                s.sample_count,
                s.score,
            );
        }
        csv
    }
}
