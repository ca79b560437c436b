//! Simulated sensor for tests and the demo binary.
//!
//! Behaves like a strict SDK: calls made out of order fail, the exposure
//! is checked against the frame period, and every call is recorded in a
//! [`CallLog`]. Failures and malformed frames can be injected through
//! [`SensorFaults`] while the sensor is owned by a worker or scheduler.

use super::{
    AcquisitionParameters, ColorMode, DeviceError, DeviceOperation, RawFrame, SensorDevice,
};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Geometry and behavior of a [`SimulatedSensor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Noise generator seed.
    pub seed: u64,
    /// Block in `acquire_frame` until the next frame period, like real hardware.
    pub pace: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            seed: 0,
            pace: true,
        }
    }
}

impl SensorConfig {
    /// Creates an unpaced configuration with the specified dimensions.
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pace: false,
            ..Default::default()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared record of every device call, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<DeviceOperation>>>,
}

impl CallLog {
    fn record(&self, op: DeviceOperation) {
        lock(&self.calls).push(op);
    }

    /// Returns a copy of the recorded calls.
    pub fn calls(&self) -> Vec<DeviceOperation> {
        lock(&self.calls).clone()
    }

    /// Number of times `op` was called.
    pub fn count(&self, op: DeviceOperation) -> usize {
        lock(&self.calls).iter().filter(|c| **c == op).count()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.calls).is_empty()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}

#[derive(Debug, Default)]
struct FaultState {
    failing: HashSet<DeviceOperation>,
    malformed: HashSet<u64>,
    disconnected: bool,
}

/// Fault injection handle shared with a [`SimulatedSensor`].
#[derive(Debug, Clone, Default)]
pub struct SensorFaults {
    state: Arc<Mutex<FaultState>>,
}

impl SensorFaults {
    /// Makes every subsequent call of `op` fail.
    pub fn fail(&self, op: DeviceOperation) {
        lock(&self.state).failing.insert(op);
    }

    /// Lets `op` succeed again.
    pub fn recover(&self, op: DeviceOperation) {
        lock(&self.state).failing.remove(&op);
    }

    /// Truncates the buffer of the frame with this sequence number.
    pub fn malformed_at(&self, sequence: u64) {
        lock(&self.state).malformed.insert(sequence);
    }

    /// Simulates the cable being pulled.
    pub fn disconnect(&self) {
        lock(&self.state).disconnected = true;
    }

    pub fn reconnect(&self) {
        lock(&self.state).disconnected = false;
    }

    fn check(&self, op: DeviceOperation) -> Result<(), DeviceError> {
        let state = lock(&self.state);
        if state.disconnected {
            return Err(DeviceError::new(op, "device disconnected"));
        }
        if state.failing.contains(&op) {
            return Err(DeviceError::new(op, "injected failure"));
        }
        Ok(())
    }

    fn is_malformed(&self, sequence: u64) -> bool {
        lock(&self.state).malformed.contains(&sequence)
    }

    fn is_disconnected(&self) -> bool {
        lock(&self.state).disconnected
    }
}

/// Software sensor producing a moving gradient with seeded noise.
pub struct SimulatedSensor {
    config: SensorConfig,
    params: AcquisitionParameters,
    initialized: bool,
    allocated: bool,
    started: bool,
    sequence: u64,
    last_frame: Option<Instant>,
    rng: ChaCha8Rng,
    log: CallLog,
    faults: SensorFaults,
}

impl SimulatedSensor {
    pub fn new(config: SensorConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            params: AcquisitionParameters::default(),
            initialized: false,
            allocated: false,
            started: false,
            sequence: 0,
            last_frame: None,
            rng,
            log: CallLog::default(),
            faults: SensorFaults::default(),
        }
    }

    /// Handle to the call log, usable after the sensor has been moved.
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    /// Handle for injecting faults, usable after the sensor has been moved.
    pub fn faults(&self) -> SensorFaults {
        self.faults.clone()
    }

    /// Returns true while buffers are allocated.
    pub fn buffers_allocated(&self) -> bool {
        self.allocated
    }

    /// Returns true while the sensor is capturing.
    pub fn is_started(&self) -> bool {
        self.started
    }

    fn enter(&self, op: DeviceOperation) -> Result<(), DeviceError> {
        self.log.record(op);
        self.faults.check(op)
    }

    fn wait_for_next_period(&mut self) {
        let period = Duration::from_secs_f64(1.0 / self.params.frame_rate);
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }

    fn synthesize(&mut self) -> Vec<u8> {
        let mode = self.params.color_mode;
        let max = mode.max_value();
        let width = self.config.width;
        let height = self.config.height;
        let span = (u64::from(width) + u64::from(height)).max(1);
        let mut samples = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                let position = u64::from(x) + u64::from(y) + self.sequence;
                let gradient = (position * u64::from(max) / span) % (u64::from(max) + 1);
                let noise = u64::from(self.rng.next_u32() % 8);
                let value = (gradient + noise + u64::from(self.params.black_level))
                    .min(u64::from(max));
                samples.push(value as u16);
            }
        }
        if mode.bits_per_pixel() <= 8 {
            samples.into_iter().map(|s| s as u8).collect()
        } else {
            samples.into_iter().flat_map(|s| s.to_le_bytes()).collect()
        }
    }
}

impl SensorDevice for SimulatedSensor {
    fn name(&self) -> String {
        format!("simulated-{}x{}", self.config.width, self.config.height)
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        self.enter(DeviceOperation::Init)?;
        self.initialized = true;
        tracing::debug!("SimulatedSensor initialized");
        Ok(())
    }

    fn allocate_buffers(&mut self) -> Result<(), DeviceError> {
        let op = DeviceOperation::AllocateBuffers;
        self.enter(op)?;
        if !self.initialized {
            return Err(DeviceError::new(op, "device not initialized"));
        }
        if self.allocated {
            return Err(DeviceError::new(op, "buffers already allocated"));
        }
        self.allocated = true;
        Ok(())
    }

    fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        let op = DeviceOperation::StartAcquisition;
        self.enter(op)?;
        if !self.allocated {
            return Err(DeviceError::new(op, "no buffers allocated"));
        }
        self.started = true;
        self.last_frame = None;
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<RawFrame, DeviceError> {
        let op = DeviceOperation::AcquireFrame;
        self.enter(op)?;
        if !self.started {
            return Err(DeviceError::new(op, "acquisition not started"));
        }
        if self.config.pace {
            self.wait_for_next_period();
        }

        self.sequence += 1;
        let mut data = self.synthesize();
        if self.faults.is_malformed(self.sequence) {
            data.truncate(data.len() / 2);
        }

        let mode = self.params.color_mode;
        Ok(RawFrame::new(
            data,
            self.config.width,
            self.config.height,
            mode.bits_per_pixel(),
            mode.layout(),
            self.sequence,
        ))
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        let op = DeviceOperation::StopAcquisition;
        self.enter(op)?;
        if !self.started {
            return Err(DeviceError::new(op, "acquisition not started"));
        }
        self.started = false;
        Ok(())
    }

    fn release_buffers(&mut self) -> Result<(), DeviceError> {
        let op = DeviceOperation::ReleaseBuffers;
        self.enter(op)?;
        if self.started {
            return Err(DeviceError::new(op, "acquisition still running"));
        }
        if !self.allocated {
            return Err(DeviceError::new(op, "no buffers allocated"));
        }
        self.allocated = false;
        Ok(())
    }

    fn frame_rate(&self) -> Result<f64, DeviceError> {
        self.enter(DeviceOperation::GetFrameRate)?;
        Ok(self.params.frame_rate)
    }

    fn set_frame_rate(&mut self, fps: f64) -> Result<(), DeviceError> {
        let op = DeviceOperation::SetFrameRate;
        self.enter(op)?;
        let next = AcquisitionParameters {
            frame_rate: fps,
            ..self.params.clone()
        };
        next.validate()
            .map_err(|e| DeviceError::new(op, e.to_string()))?;
        self.params = next;
        Ok(())
    }

    fn exposure(&self) -> Result<f64, DeviceError> {
        self.enter(DeviceOperation::GetExposure)?;
        Ok(self.params.exposure_us)
    }

    fn set_exposure(&mut self, exposure_us: f64) -> Result<(), DeviceError> {
        let op = DeviceOperation::SetExposure;
        self.enter(op)?;
        self.params = self
            .params
            .with_exposure(exposure_us)
            .map_err(|e| DeviceError::new(op, e.to_string()))?;
        Ok(())
    }

    fn black_level(&self) -> Result<u32, DeviceError> {
        self.enter(DeviceOperation::GetBlackLevel)?;
        Ok(self.params.black_level)
    }

    fn set_black_level(&mut self, level: u32) -> Result<(), DeviceError> {
        let op = DeviceOperation::SetBlackLevel;
        self.enter(op)?;
        let max = self.params.color_mode.max_value();
        if level > max {
            return Err(DeviceError::new(op, format!("{level} exceeds {max}")));
        }
        self.params.black_level = level;
        Ok(())
    }

    fn color_mode(&self) -> Result<ColorMode, DeviceError> {
        self.enter(DeviceOperation::GetColorMode)?;
        Ok(self.params.color_mode)
    }

    fn set_color_mode(&mut self, mode: ColorMode) -> Result<(), DeviceError> {
        let op = DeviceOperation::SetColorMode;
        self.enter(op)?;
        if self.allocated {
            return Err(DeviceError::new(op, "buffers allocated for the current format"));
        }
        self.params.color_mode = mode;
        self.params.black_level = self.params.black_level.min(mode.max_value());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.faults.is_disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_sensor() -> SimulatedSensor {
        let mut sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        sensor.init().unwrap();
        sensor.allocate_buffers().unwrap();
        sensor.start_acquisition().unwrap();
        sensor
    }

    #[test]
    fn test_simulated_sensor_lifecycle() {
        let mut sensor = started_sensor();

        let frame = sensor.acquire_frame().unwrap();
        assert_eq!(frame.expected_len(), Some(frame.data().len()));
        assert_eq!(frame.sequence(), 1);
        assert_eq!(sensor.acquire_frame().unwrap().sequence(), 2);

        sensor.stop_acquisition().unwrap();
        sensor.release_buffers().unwrap();
        assert!(!sensor.buffers_allocated());
    }

    #[test]
    fn test_acquire_without_start() {
        let mut sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        let err = sensor.acquire_frame().unwrap_err();
        assert_eq!(err.operation, DeviceOperation::AcquireFrame);
    }

    #[test]
    fn test_double_allocation_rejected() {
        let mut sensor = started_sensor();
        assert!(sensor.allocate_buffers().is_err());
    }

    #[test]
    fn test_deep_color_mode_frames() {
        let mut sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        sensor.set_color_mode(ColorMode::Mono12).unwrap();
        sensor.init().unwrap();
        sensor.allocate_buffers().unwrap();
        sensor.start_acquisition().unwrap();

        let frame = sensor.acquire_frame().unwrap();
        assert_eq!(frame.bit_depth(), 12);
        assert_eq!(frame.data().len(), 8 * 4 * 2);
        assert!(frame.samples().all(|s| s <= 4095));
    }

    #[test]
    fn test_color_mode_locked_while_allocated() {
        let mut sensor = started_sensor();
        assert!(sensor.set_color_mode(ColorMode::Mono16).is_err());
    }

    #[test]
    fn test_injected_faults() {
        let mut sensor = started_sensor();
        let faults = sensor.faults();

        faults.malformed_at(2);
        assert_eq!(sensor.acquire_frame().unwrap().data().len(), 32);
        assert_eq!(sensor.acquire_frame().unwrap().data().len(), 16);

        faults.fail(DeviceOperation::AcquireFrame);
        assert!(sensor.acquire_frame().is_err());
        faults.recover(DeviceOperation::AcquireFrame);
        assert!(sensor.acquire_frame().is_ok());

        faults.disconnect();
        assert!(!sensor.is_connected());
        assert!(sensor.frame_rate().is_err());
    }

    #[test]
    fn test_call_log_records_in_order() {
        let sensor = started_sensor();
        assert_eq!(
            sensor.call_log().calls(),
            vec![
                DeviceOperation::Init,
                DeviceOperation::AllocateBuffers,
                DeviceOperation::StartAcquisition,
            ]
        );
    }
}
