//! Device bring-up, teardown and the per-frame step shared by both models.

use super::AcquisitionStats;
use crate::capture::{DeviceError, RawFrame, SensorDevice};
use crate::delivery::FrameSender;
use crate::normalize::{normalize, MalformedFrameError};
use tracing::{debug, warn};

/// Runs init, allocate and start. If start fails the buffers are released
/// again so a failed bring-up never leaves an allocation behind.
pub(crate) fn bring_up<D: SensorDevice + ?Sized>(device: &mut D) -> Result<(), DeviceError> {
    device.init()?;
    device.allocate_buffers()?;
    if let Err(e) = device.start_acquisition() {
        if let Err(release) = device.release_buffers() {
            warn!(error = %release, "Compensating buffer release failed");
        }
        return Err(e);
    }
    debug!(device = %device.name(), "Device acquiring");
    Ok(())
}

/// Stops capture and frees buffers. Release is attempted even when stop
/// fails; the first error is returned.
pub(crate) fn tear_down<D: SensorDevice + ?Sized>(device: &mut D) -> Result<(), DeviceError> {
    let stopped = device.stop_acquisition();
    if let Err(ref e) = stopped {
        warn!(error = %e, "Device stop failed, releasing buffers anyway");
    }
    let released = device.release_buffers();
    if let Err(ref e) = released {
        warn!(error = %e, "Buffer release failed");
    }
    debug!(device = %device.name(), "Device idle");
    stopped.and(released)
}

/// Normalizes a raw frame and publishes it. Returns the frame sequence.
pub(crate) fn deliver_raw(
    raw: RawFrame,
    sender: &FrameSender,
    stats: &AcquisitionStats,
) -> Result<u64, MalformedFrameError> {
    stats.record_acquired();
    let sequence = raw.sequence();
    match normalize(raw) {
        Ok(frame) => {
            sender.deliver(frame);
            stats.record_delivered();
            Ok(sequence)
        }
        Err(e) => {
            stats.record_malformed();
            warn!(sequence, error = %e, "Dropped malformed frame");
            Err(e)
        }
    }
}
