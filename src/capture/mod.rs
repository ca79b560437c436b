//! Sensor device contract and raw frame types.
//!
//! The sensor is an external collaborator reached only through the
//! [`SensorDevice`] trait. A [`SimulatedSensor`] stands in for hardware in
//! tests and in the demo binary.

mod device;
mod frame;
mod params;
mod simulated;

pub use device::{apply_parameters, read_parameters, DeviceError, DeviceOperation, SensorDevice};
pub use frame::{bytes_per_sample, PixelLayout, RawFrame};
pub use params::{AcquisitionParameters, ColorMode, ParamError};
pub use simulated::{CallLog, SensorConfig, SensorFaults, SimulatedSensor};
