//! Metrics collection and registry.

use crate::acquisition::StatsSnapshot;
use crate::delivery::FrameReceiver;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of acquisition state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Whether the device is currently capturing.
    pub acquiring: bool,
    /// Frames returned by the device.
    pub frames_acquired: u64,
    /// Frames published to the delivery channel.
    pub frames_delivered: u64,
    /// Frames dropped by the normalizer.
    pub frames_malformed: u64,
    /// Frames replaced before the consumer took them.
    pub frames_overwritten: u64,
    /// Failed device calls on the acquisition path.
    pub device_errors: u64,
    /// Scheduler ticks that did not acquire.
    pub skipped_ticks: u64,
    /// Sequence number of the latest delivered frame.
    pub latest_sequence: u64,
}

/// Prometheus metrics registry for acquisition monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    acquiring: IntGauge,
    latest_sequence: IntGauge,

    frames_acquired: IntCounter,
    frames_delivered: IntCounter,
    frames_malformed: IntCounter,
    frames_overwritten: IntCounter,
    device_errors: IntCounter,
    skipped_ticks: IntCounter,
}

/// Advances a counter to an absolute total.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all acquisition metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let acquiring = IntGauge::new(
            "camera_acquisition_acquiring",
            "Whether the device is capturing (1=yes, 0=no)",
        )?;
        let latest_sequence = IntGauge::new(
            "camera_acquisition_latest_sequence",
            "Sequence number of the most recently delivered frame",
        )?;
        let frames_acquired = IntCounter::new(
            "camera_acquisition_frames_acquired_total",
            "Frames returned by the device",
        )?;
        let frames_delivered = IntCounter::new(
            "camera_acquisition_frames_delivered_total",
            "Frames published to the consumer",
        )?;
        let frames_malformed = IntCounter::new(
            "camera_acquisition_frames_malformed_total",
            "Frames dropped because their buffer did not match their shape",
        )?;
        let frames_overwritten = IntCounter::new(
            "camera_acquisition_frames_overwritten_total",
            "Frames replaced before the consumer took them",
        )?;
        let device_errors = IntCounter::new(
            "camera_acquisition_device_errors_total",
            "Failed device calls on the acquisition path",
        )?;
        let skipped_ticks = IntCounter::new(
            "camera_acquisition_skipped_ticks_total",
            "Timer ticks that did not acquire a frame",
        )?;

        registry.register(Box::new(acquiring.clone()))?;
        registry.register(Box::new(latest_sequence.clone()))?;
        registry.register(Box::new(frames_acquired.clone()))?;
        registry.register(Box::new(frames_delivered.clone()))?;
        registry.register(Box::new(frames_malformed.clone()))?;
        registry.register(Box::new(frames_overwritten.clone()))?;
        registry.register(Box::new(device_errors.clone()))?;
        registry.register(Box::new(skipped_ticks.clone()))?;

        Ok(Self {
            registry,
            acquiring,
            latest_sequence,
            frames_acquired,
            frames_delivered,
            frames_malformed,
            frames_overwritten,
            device_errors,
            skipped_ticks,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.acquiring.set(i64::from(snapshot.acquiring));
        self.latest_sequence.set(snapshot.latest_sequence as i64);

        // Counters only move forward, by the difference to the new total.
        advance(&self.frames_acquired, snapshot.frames_acquired);
        advance(&self.frames_delivered, snapshot.frames_delivered);
        advance(&self.frames_malformed, snapshot.frames_malformed);
        advance(&self.frames_overwritten, snapshot.frames_overwritten);
        advance(&self.device_errors, snapshot.device_errors);
        advance(&self.skipped_ticks, snapshot.skipped_ticks);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl MetricsSnapshot {
    /// Creates a snapshot from driver counters and the consumer's channel end.
    pub fn from_components(stats: &StatsSnapshot, receiver: &FrameReceiver, acquiring: bool) -> Self {
        Self {
            acquiring,
            frames_acquired: stats.acquired,
            frames_delivered: stats.delivered,
            frames_malformed: stats.malformed,
            frames_overwritten: receiver.overwritten_count(),
            device_errors: stats.device_errors,
            skipped_ticks: stats.skipped_ticks,
            latest_sequence: receiver.latest_sequence(),
        }
    }
}
