//! Environmental context: readings, seasons and the discretised bucket
//! key used by the gain lookup table.

use serde::{Deserialize, Serialize};

/// Meteorological season.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    #[default]
    Spring,
    Summer,
    Autumn,
    Winter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hemisphere {
    #[default]
    Northern,
    Southern,
    /// Near-equator approximation: Dec–Feb hot, Jun–Aug cool.
    Tropical,
}

impl Season {
    /// Season for a calendar month (1–12).  Out-of-range months wrap.
    pub fn from_month(month: u8, hemisphere: Hemisphere) -> Self {
        let month = (month.saturating_sub(1) % 12) + 1;
        match hemisphere {
            Hemisphere::Northern => match month {
                3..=5 => Self::Spring,
                6..=8 => Self::Summer,
                9..=11 => Self::Autumn,
                _ => Self::Winter,
            },
            Hemisphere::Southern => match month {
                9..=11 => Self::Spring,
                3..=5 => Self::Autumn,
                6..=8 => Self::Winter,
                _ => Self::Summer,
            },
            Hemisphere::Tropical => match month {
                3..=5 => Self::Autumn,
                6..=8 => Self::Winter,
                9..=11 => Self::Spring,
                _ => Self::Summer,
            },
        }
    }

    pub const fn index(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Spring => "Spring",
            Self::Summer => "Summer",
            Self::Autumn => "Autumn",
            Self::Winter => "Winter",
        }
    }
}

/// Bucket widths for discretising continuous readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketWidths {
    pub value: f32,
    pub ambient: f32,
}

impl BucketWidths {
    /// Temperature in °C.
    pub const fn heater() -> Self {
        Self {
            value: 2.0,
            ambient: 3.0,
        }
    }

    /// pH.  The working range is roughly 6 to 8, so buckets are narrow.
    pub const fn co2() -> Self {
        Self {
            value: 0.2,
            ambient: 3.0,
        }
    }
}

impl Default for BucketWidths {
    fn default() -> Self {
        Self::heater()
    }
}

/// Hours per time-of-day block.
pub const HOURS_PER_BLOCK: u8 = 6;

/// Lookup table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    pub value_bucket: i16,
    pub ambient_bucket: i16,
    pub hour_block: u8,
    pub season: Season,
}

impl ContextKey {
    pub fn new(value: f32, ambient: f32, hour: u8, season: Season, widths: &BucketWidths) -> Self {
        Self {
            value_bucket: bucket(value, widths.value),
            ambient_bucket: bucket(ambient, widths.ambient),
            hour_block: (hour % 24) / HOURS_PER_BLOCK,
            season,
        }
    }
}

fn bucket(v: f32, width: f32) -> i16 {
    if !v.is_finite() || width <= 0.0 {
        return 0;
    }
    (v / width).floor().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Readings supplied by upstream acquisition for one control cycle.
/// `None` means the sensor is absent or its reading is invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    pub temperature: Option<f32>,
    pub ph: Option<f32>,
    pub ambient: Option<f32>,
    pub tds: Option<f32>,
    pub tank_volume: Option<f32>,
    /// Local hour (0–23) when the wall clock is synced.
    pub hour: Option<u8>,
    /// Calendar month (1–12) when the wall clock is synced.
    pub month: Option<u8>,
}

/// Auxiliary context handed to the controller alongside the measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleContext {
    pub ambient: Option<f32>,
    pub tds: Option<f32>,
    pub ph: Option<f32>,
    pub tank_volume: Option<f32>,
    pub hour: u8,
    pub season: Season,
}

impl CycleContext {
    pub fn from_frame(frame: &SensorFrame, hemisphere: Hemisphere) -> Self {
        Self {
            ambient: frame.ambient,
            tds: frame.tds,
            ph: frame.ph,
            tank_volume: frame.tank_volume,
            hour: frame.hour.unwrap_or(0),
            season: frame
                .month
                .map_or(Season::default(), |m| Season::from_month(m, hemisphere)),
        }
    }
}
