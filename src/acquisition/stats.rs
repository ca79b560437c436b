//! Acquisition counters shared between the loop and its controller.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated from the acquisition path.
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    acquired: AtomicU64,
    delivered: AtomicU64,
    malformed: AtomicU64,
    device_errors: AtomicU64,
    skipped_ticks: AtomicU64,
}

/// Point-in-time copy of [`AcquisitionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames returned by the device.
    pub acquired: u64,
    /// Frames handed to the delivery channel.
    pub delivered: u64,
    /// Frames dropped by the normalizer.
    pub malformed: u64,
    /// Failed device calls on the acquisition path.
    pub device_errors: u64,
    /// Scheduler ticks that did not acquire.
    pub skipped_ticks: u64,
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_device_error(&self) {
        self.device_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            acquired: self.acquired.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
        }
    }
}
