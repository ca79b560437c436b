//! Errors surfaced to acquisition controllers.

use super::AcquisitionState;
use crate::capture::{DeviceError, ParamError};
use crate::normalize::MalformedFrameError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by worker and scheduler control calls.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("failed to bring up the device: {0}")]
    DeviceInit(#[source] DeviceError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("rejected parameters: {0}")]
    Param(#[from] ParamError),
    #[error(transparent)]
    Malformed(#[from] MalformedFrameError),
    #[error("acquisition loop did not park within {0:?}")]
    StopTimeout(Duration),
    #[error("cannot proceed while acquisition is {0}")]
    Busy(AcquisitionState),
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),
}
