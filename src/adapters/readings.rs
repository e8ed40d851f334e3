//! Readings mailbox adapter.
//!
//! Upstream acquisition (sensor drivers, calibration) runs in its own
//! task and publishes compensated readings into a static
//! [`ReadingsMailbox`].  The control task pulls the newest frame through
//! [`MailboxReader`], which implements [`ReadingsPort`].
//!
//! A frame older than the reader's staleness limit is reported with all
//! measurements missing, so a dead acquisition task drives both loops to
//! zero output instead of controlling on a frozen value.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::warn;

use crate::app::ports::ReadingsPort;
use crate::learning::context::SensorFrame;

use super::time::Esp32TimeAdapter;

#[derive(Clone, Copy)]
struct Slot {
    frame: SensorFrame,
    published_ms: Option<u64>,
}

/// Single-slot, latest-wins exchange between acquisition and control.
pub struct ReadingsMailbox {
    slot: Mutex<CriticalSectionRawMutex, Cell<Slot>>,
}

impl Default for ReadingsMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingsMailbox {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(Slot {
                frame: SensorFrame {
                    temperature: None,
                    ph: None,
                    ambient: None,
                    tds: None,
                    tank_volume: None,
                    hour: None,
                    month: None,
                },
                published_ms: None,
            })),
        }
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: SensorFrame, now_ms: u64) {
        self.slot.lock(|c| {
            c.set(Slot {
                frame,
                published_ms: Some(now_ms),
            });
        });
    }

    fn snapshot(&self) -> Slot {
        self.slot.lock(Cell::get)
    }
}

/// Control-side view of a [`ReadingsMailbox`].
pub struct MailboxReader<'a> {
    mailbox: &'a ReadingsMailbox,
    clock: Esp32TimeAdapter,
    stale_after_ms: u64,
    stale: bool,
}

impl<'a> MailboxReader<'a> {
    pub fn new(mailbox: &'a ReadingsMailbox, stale_after_ms: u64) -> Self {
        Self {
            mailbox,
            clock: Esp32TimeAdapter::new(),
            stale_after_ms,
            stale: false,
        }
    }

    fn read_at(&mut self, now_ms: u64) -> SensorFrame {
        let slot = self.mailbox.snapshot();
        let fresh = slot
            .published_ms
            .is_some_and(|t| now_ms.saturating_sub(t) <= self.stale_after_ms);

        if !fresh && slot.published_ms.is_some() && !self.stale {
            warn!("Readings stale (> {} ms), treating as missing", self.stale_after_ms);
        }
        self.stale = !fresh;

        let mut frame = if fresh {
            slot.frame
        } else {
            SensorFrame::default()
        };
        if frame.hour.is_none() || frame.month.is_none() {
            if let Some(local) = self.clock.local_time() {
                frame.hour = frame.hour.or(Some(local.hour));
                frame.month = frame.month.or(Some(local.month));
            }
        }
        frame
    }
}

impl ReadingsPort for MailboxReader<'_> {
    fn latest(&mut self) -> SensorFrame {
        let now = self.clock.uptime_ms();
        self.read_at(now)
    }
}
