//! Prometheus metrics for acquisition monitoring.
//!
//! # Metrics Exposed
//!
//! - `camera_acquisition_acquiring` - Device capturing (1) or not (0)
//! - `camera_acquisition_latest_sequence` - Sequence of the newest delivered frame
//! - `camera_acquisition_frames_acquired_total` - Frames returned by the device
//! - `camera_acquisition_frames_delivered_total` - Frames published to the consumer
//! - `camera_acquisition_frames_malformed_total` - Frames dropped by the normalizer
//! - `camera_acquisition_frames_overwritten_total` - Frames the consumer never saw
//! - `camera_acquisition_device_errors_total` - Failed device calls while acquiring
//! - `camera_acquisition_skipped_ticks_total` - Timer ticks that did not acquire
//!
//! # Example
//!
//! ```no_run
//! use camera_acquisition::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let snapshot = MetricsSnapshot {
//!     acquiring: true,
//!     frames_acquired: 120,
//!     frames_delivered: 118,
//!     frames_malformed: 2,
//!     frames_overwritten: 30,
//!     ..Default::default()
//! };
//!
//! registry.update(&snapshot);
//! println!("{}", registry.encode().unwrap());
//! ```

mod collector;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
