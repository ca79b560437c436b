//! Sensor device abstraction.
//!
//! The vendor SDK sits behind [`SensorDevice`]. The acquisition core only
//! ever talks to a sensor through this trait, so the same worker and
//! scheduler drive real hardware and the [`SimulatedSensor`](super::SimulatedSensor).

use super::{AcquisitionParameters, ColorMode, RawFrame};
use std::fmt;
use thiserror::Error;

/// Device call that produced a [`DeviceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOperation {
    Init,
    AllocateBuffers,
    StartAcquisition,
    AcquireFrame,
    StopAcquisition,
    ReleaseBuffers,
    GetFrameRate,
    SetFrameRate,
    GetExposure,
    SetExposure,
    GetBlackLevel,
    SetBlackLevel,
    GetColorMode,
    SetColorMode,
}

impl fmt::Display for DeviceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::AllocateBuffers => "allocate_buffers",
            Self::StartAcquisition => "start_acquisition",
            Self::AcquireFrame => "acquire_frame",
            Self::StopAcquisition => "stop_acquisition",
            Self::ReleaseBuffers => "release_buffers",
            Self::GetFrameRate => "get_frame_rate",
            Self::SetFrameRate => "set_frame_rate",
            Self::GetExposure => "get_exposure",
            Self::SetExposure => "set_exposure",
            Self::GetBlackLevel => "get_black_level",
            Self::SetBlackLevel => "set_black_level",
            Self::GetColorMode => "get_color_mode",
            Self::SetColorMode => "set_color_mode",
        };
        f.write_str(name)
    }
}

/// Any failure reported by the sensor SDK.
///
/// Vendor error codes are flattened into a message; the core only
/// needs to know which operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device operation `{operation}` failed: {message}")]
pub struct DeviceError {
    /// Operation that failed.
    pub operation: DeviceOperation,
    /// Device-specific description.
    pub message: String,
}

impl DeviceError {
    /// Creates an error for the given operation.
    pub fn new(operation: DeviceOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Capability set of an imaging sensor.
///
/// Implementations wrap a single opened device. Calls are made from at most
/// one thread at a time; the acquisition core serializes access.
pub trait SensorDevice: Send {
    /// Human-readable model name.
    fn name(&self) -> String {
        String::from("sensor")
    }

    /// Prepares the device for acquisition.
    fn init(&mut self) -> Result<(), DeviceError>;

    /// Allocates the device-side frame buffers.
    fn allocate_buffers(&mut self) -> Result<(), DeviceError>;

    /// Starts continuous capture.
    fn start_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Blocks until the next frame is available and returns an owned copy.
    fn acquire_frame(&mut self) -> Result<RawFrame, DeviceError>;

    /// Stops continuous capture.
    fn stop_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Frees the buffers obtained by [`allocate_buffers`](Self::allocate_buffers).
    fn release_buffers(&mut self) -> Result<(), DeviceError>;

    /// Configured frame rate in frames per second.
    fn frame_rate(&self) -> Result<f64, DeviceError>;

    /// Sets the frame rate in frames per second.
    fn set_frame_rate(&mut self, fps: f64) -> Result<(), DeviceError>;

    /// Exposure time in microseconds.
    fn exposure(&self) -> Result<f64, DeviceError>;

    /// Sets the exposure time in microseconds.
    fn set_exposure(&mut self, exposure_us: f64) -> Result<(), DeviceError>;

    /// Black level offset in sensor counts.
    fn black_level(&self) -> Result<u32, DeviceError>;

    /// Sets the black level offset in sensor counts.
    fn set_black_level(&mut self, level: u32) -> Result<(), DeviceError>;

    /// Current pixel format.
    fn color_mode(&self) -> Result<ColorMode, DeviceError>;

    /// Changes the pixel format. Only valid while buffers are not allocated.
    fn set_color_mode(&mut self, mode: ColorMode) -> Result<(), DeviceError>;

    /// Returns true while the device handle is usable.
    fn is_connected(&self) -> bool;
}

/// Reads the full parameter set back from a device.
pub fn read_parameters<D: SensorDevice + ?Sized>(
    device: &D,
) -> Result<AcquisitionParameters, DeviceError> {
    Ok(AcquisitionParameters {
        frame_rate: device.frame_rate()?,
        exposure_us: device.exposure()?,
        black_level: device.black_level()?,
        color_mode: device.color_mode()?,
    })
}

/// Pushes `next` to the device without ever exposing an exposure longer
/// than the frame period.
///
/// When the frame period shrinks the exposure is written first; when it
/// grows the frame rate is written first. `next` must already be valid.
pub fn apply_parameters<D: SensorDevice + ?Sized>(
    device: &mut D,
    current: &AcquisitionParameters,
    next: &AcquisitionParameters,
) -> Result<(), DeviceError> {
    if next.color_mode != current.color_mode {
        device.set_color_mode(next.color_mode)?;
    }

    let rate_changed = next.frame_rate != current.frame_rate;
    let exposure_changed = next.exposure_us != current.exposure_us;
    if next.frame_rate > current.frame_rate {
        if exposure_changed {
            device.set_exposure(next.exposure_us)?;
        }
        device.set_frame_rate(next.frame_rate)?;
    } else {
        if rate_changed {
            device.set_frame_rate(next.frame_rate)?;
        }
        if exposure_changed {
            device.set_exposure(next.exposure_us)?;
        }
    }

    if next.black_level != current.black_level {
        device.set_black_level(next.black_level)?;
    }

    tracing::debug!(
        frame_rate = next.frame_rate,
        exposure_us = next.exposure_us,
        black_level = next.black_level,
        color_mode = %next.color_mode,
        "Applied acquisition parameters"
    );
    Ok(())
}
