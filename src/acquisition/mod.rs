//! Acquisition drivers.
//!
//! Two ways to move frames from a [`SensorDevice`](crate::capture::SensorDevice)
//! into a [`FrameSender`](crate::delivery::FrameSender):
//!
//! - [`AcquisitionWorker`]: push model. A dedicated thread acquires
//!   continuously; the controller stops it with a bounded wait.
//! - [`AcquisitionScheduler`]: pull model. The owner's event loop fires a
//!   timer and each tick acquires at most one frame.
//!
//! Both bring the device up in the order init, allocate, start and tear it
//! down in the order stop, release. Both normalize every frame before
//! delivery and drop malformed frames without stopping.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --start--> Initializing --ok--> Acquiring --stop--> Stopping --> Idle
//!                      |
//!                      +--error--> Idle
//! ```

mod error;
mod lifecycle;
mod scheduler;
mod state;
mod stats;
mod worker;

pub use error::AcquisitionError;
pub use scheduler::{
    polling_interval, AcquisitionScheduler, SchedulerConfig, SkipReason, TickOutcome,
    DEFAULT_MARGIN_MS,
};
pub use state::AcquisitionState;
pub use stats::{AcquisitionStats, StatsSnapshot};
pub use worker::{AcquisitionWorker, WorkerConfig};
