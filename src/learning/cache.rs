//! Control-side cache of the last gain recommendation.
//!
//! The control cycle never queries the lookup store.  It keeps the last
//! result the worker delivered and reuses it while the context still
//! matches; only a miss posts a new request to the worker.
//!
//! A snapshot stays valid while
//! - the measured value is within one value-bucket width of the value
//!   it was queried for, and the ambient reading within one ambient width,
//! - the hour block and season are unchanged,
//! - it is younger than the validity window.

use serde::{Deserialize, Serialize};

use super::context::{BucketWidths, HOURS_PER_BLOCK, Season};
use crate::config::BlendPolicy;
use crate::control::gains::{GainBounds, Gains};

/// Last successful lookup, stamped with the control clock.  The
/// controller persists it next to its gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlCacheSnapshot {
    pub value: f32,
    pub ambient: f32,
    pub hour: u8,
    pub season: Season,
    pub gains: Gains,
    pub confidence: f32,
    pub updated_ms: u64,
}

/// Context the control cycle wants gains for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupRequest {
    pub value: f32,
    pub ambient: f32,
    pub hour: u8,
    pub season: Season,
    pub issued_ms: u64,
}

pub struct MlGainCache {
    snapshot: Option<MlCacheSnapshot>,
    validity_ms: u64,
    widths: BucketWidths,
    hits: u32,
    misses: u32,
}

impl MlGainCache {
    pub fn new(validity_ms: u64, widths: BucketWidths) -> Self {
        Self {
            snapshot: None,
            validity_ms,
            widths,
            hits: 0,
            misses: 0,
        }
    }

    /// Return the cached snapshot if it still covers `req`, counting a
    /// hit or a miss.
    pub fn lookup(&mut self, req: &LookupRequest) -> Option<MlCacheSnapshot> {
        match self.snapshot {
            Some(snap) if self.covers(&snap, req) => {
                self.hits = self.hits.saturating_add(1);
                Some(snap)
            }
            _ => {
                self.misses = self.misses.saturating_add(1);
                None
            }
        }
    }

    fn covers(&self, snap: &MlCacheSnapshot, req: &LookupRequest) -> bool {
        (req.value - snap.value).abs() <= self.widths.value
            && (req.ambient - snap.ambient).abs() <= self.widths.ambient
            && req.hour / HOURS_PER_BLOCK == snap.hour / HOURS_PER_BLOCK
            && req.season == snap.season
            && req.issued_ms.saturating_sub(snap.updated_ms) < self.validity_ms
    }

    pub fn store(&mut self, snapshot: MlCacheSnapshot) {
        self.snapshot = Some(snapshot);
    }

    pub fn invalidate(&mut self) {
        self.snapshot = None;
    }

    pub fn snapshot(&self) -> Option<&MlCacheSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// Hit rate in percent; 0 before the first lookup.
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32 * 100.0
        }
    }

    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
    }
}

/// Confidence-gated blend of a recommendation into the running gains.
///
/// Returns `None` when the recommendation should be ignored.
pub fn blend_recommendation(
    current: Gains,
    recommended: Gains,
    confidence: f32,
    recent_abs_error: f32,
    policy: &BlendPolicy,
    bounds: &GainBounds,
) -> Option<Gains> {
    let weight = if confidence > policy.high_confidence {
        policy.high_blend
    } else if confidence > policy.low_confidence && recent_abs_error > policy.poor_performance_error {
        policy.low_blend
    } else {
        return None;
    };
    Some(bounds.clamp(current.lerp(recommended, weight)))
}
