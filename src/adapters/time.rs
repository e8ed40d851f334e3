//! ESP32 time adapter.
//!
//! Provides monotonic uptime and the local wall-clock fields the learning
//! context needs (hour of day, month).
//!
//! - **`target_os = "espidf"`**: wraps `esp_timer_get_time()` and
//!   `localtime_r()` from ESP-IDF.
//! - **`not(target_os = "espidf")`**: uses `std::time::Instant`; the
//!   wall clock is reported as unsynced.

/// Time adapter for the ESP32-S3 platform.
pub struct Esp32TimeAdapter {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for Esp32TimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Local calendar fields, present only once the wall clock is synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub hour: u8,
    pub month: u8,
}

impl Esp32TimeAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Milliseconds since boot (monotonic).
    #[cfg(target_os = "espidf")]
    pub fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    /// Milliseconds since boot (monotonic).
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Local time from the system clock.  `None` if the wall clock is not
    /// synced (e.g. pre-NTP).
    #[cfg(target_os = "espidf")]
    pub fn local_time(&self) -> Option<LocalTime> {
        use core::ptr;
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, ptr::null_mut()) } != 0 {
            return None;
        }
        // Reject obviously unsynced time (before 2020-01-01)
        const EPOCH_2020: i64 = 1_577_836_800;
        if (tv.tv_sec as i64) < EPOCH_2020 {
            return None;
        }
        let secs = tv.tv_sec as esp_idf_svc::sys::time_t;
        let mut tm: esp_idf_svc::sys::tm = unsafe { core::mem::zeroed() };
        if unsafe { esp_idf_svc::sys::localtime_r(&secs, &mut tm) }.is_null() {
            return None;
        }
        from_tm(tm.tm_hour, tm.tm_mon)
    }

    /// Local time.  On non-ESP targets (simulation) always `None`.
    #[cfg(not(target_os = "espidf"))]
    pub fn local_time(&self) -> Option<LocalTime> {
        None
    }
}

/// Convert `struct tm` fields (`tm_mon` is 0-based) into [`LocalTime`].
#[cfg(any(target_os = "espidf", test))]
fn from_tm(tm_hour: i32, tm_mon: i32) -> Option<LocalTime> {
    if !(0..=23).contains(&tm_hour) || !(0..=11).contains(&tm_mon) {
        return None;
    }
    Some(LocalTime {
        hour: tm_hour as u8,
        month: tm_mon as u8 + 1,
    })
}
