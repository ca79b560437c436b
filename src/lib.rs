//! Camera Acquisition Library
//!
//! Acquisition-and-delivery core for live display of scientific camera
//! frames. Moves frames from a sensor to a consumer without the consumer
//! ever seeing a half-written buffer, a stale backlog, or a device torn
//! down under a running loop.
//!
//! # Architecture
//!
//! ```text
//! capture --> acquisition --> normalize --> delivery --> consumer
//! (device)    (worker or                   (latest frame
//!              scheduler)                    wins)
//! ```
//!
//! - [`capture`]: the [`SensorDevice`] trait, raw frames, parameters, and a
//!   simulated sensor.
//! - [`normalize`]: the single conversion from native bit depth to 8 bits.
//! - [`acquisition`]: push-model [`AcquisitionWorker`] and pull-model
//!   [`AcquisitionScheduler`], sharing one device lifecycle.
//! - [`delivery`]: single-slot channel; an unread frame is replaced, never
//!   queued.
//!
//! # Example
//!
//! ```no_run
//! use camera_acquisition::{
//!     acquisition::{AcquisitionWorker, WorkerConfig},
//!     capture::{SensorConfig, SimulatedSensor},
//!     delivery::channel,
//! };
//! use std::time::Duration;
//!
//! let sensor = SimulatedSensor::new(SensorConfig::default());
//! let (tx, rx) = channel();
//!
//! let worker = AcquisitionWorker::new(sensor, tx, WorkerConfig::default()).unwrap();
//! worker.request_start().unwrap();
//!
//! for _ in 0..10 {
//!     let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
//!     println!("frame {} mean {:.1}", frame.sequence(), frame.mean());
//! }
//!
//! worker.request_stop(false).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod acquisition;
pub mod capture;
pub mod config;
pub mod delivery;
pub mod metrics;
pub mod normalize;

// Re-export commonly used types at crate root
pub use acquisition::{
    AcquisitionError, AcquisitionScheduler, AcquisitionState, AcquisitionWorker, TickOutcome,
};
pub use capture::{
    AcquisitionParameters, ColorMode, DeviceError, RawFrame, SensorDevice, SimulatedSensor,
};
pub use config::FileConfig;
pub use delivery::{channel, FrameReceiver, FrameSender};
pub use normalize::{normalize, DisplayFrame, MalformedFrameError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
