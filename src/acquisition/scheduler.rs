//! Pull model: a periodic timer drives one acquisition per tick.
//!
//! There is no background thread. The owner calls [`AcquisitionScheduler::tick_if_due`]
//! from its event loop, or hands the calling thread over to
//! [`AcquisitionScheduler::run_until`]. Ticks take `&mut self`, so two ticks
//! can never overlap.

use super::lifecycle::{bring_up, deliver_raw, tear_down};
use super::{AcquisitionError, AcquisitionState, AcquisitionStats};
use crate::capture::{
    apply_parameters, read_parameters, AcquisitionParameters, DeviceError, DeviceOperation,
    ParamError, RawFrame, SensorDevice,
};
use crate::delivery::FrameSender;
use crate::normalize::{normalize, DisplayFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Extra time added to the frame period to absorb device and display jitter.
pub const DEFAULT_MARGIN_MS: u64 = 10;

/// Longest sleep in [`AcquisitionScheduler::run_until`] before the stop flag
/// is checked again.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Timer interval for a frame rate: `max(1, round(1000 / fps) + margin)` ms.
pub fn polling_interval(frame_rate: f64, margin_ms: u64) -> Duration {
    let period_ms = (1000.0 / frame_rate).round().max(0.0) as u64;
    Duration::from_millis(period_ms.saturating_add(margin_ms).max(1))
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Milliseconds added to the frame period.
    pub margin_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            margin_ms: DEFAULT_MARGIN_MS,
        }
    }
}

/// Why a tick did not acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The timer is stopped.
    Disarmed,
    /// The device reports no connection.
    NotConnected,
    /// The device is not capturing.
    NotAcquiring,
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame with this sequence number was delivered.
    Delivered(u64),
    /// The device returned a malformed frame; it was dropped.
    Dropped,
    /// The device call failed. The timer stays armed.
    Failed,
    Skipped(SkipReason),
}

#[derive(Debug)]
struct Timer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Timer {
    fn arm(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    fn disarm(&mut self) {
        self.next_due = None;
    }

    fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    /// Changes the interval; an armed timer restarts from `now`.
    fn set_interval(&mut self, interval: Duration, now: Instant) {
        self.interval = interval;
        if self.is_armed() {
            self.arm(now);
        }
    }

    /// Consumes the deadline if it has passed and schedules the next one.
    fn fire(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                let next = due + self.interval;
                self.next_due = Some(if next > now { next } else { now + self.interval });
                true
            }
            _ => false,
        }
    }
}

/// Owns a device and acquires one frame per timer tick.
pub struct AcquisitionScheduler<D: SensorDevice> {
    device: D,
    sender: FrameSender,
    state: AcquisitionState,
    params: AcquisitionParameters,
    timer: Timer,
    config: SchedulerConfig,
    stats: Arc<AcquisitionStats>,
}

impl<D: SensorDevice> AcquisitionScheduler<D> {
    /// Takes ownership of `device`; the timer starts disarmed.
    pub fn new(
        device: D,
        sender: FrameSender,
        config: SchedulerConfig,
    ) -> Result<Self, AcquisitionError> {
        let params = read_parameters(&device)?;
        let timer = Timer {
            interval: polling_interval(params.frame_rate, config.margin_ms),
            next_due: None,
        };
        Ok(Self {
            device,
            sender,
            state: AcquisitionState::Idle,
            params,
            timer,
            config,
            stats: Arc::new(AcquisitionStats::new()),
        })
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Returns true while the device is capturing.
    pub fn is_acquiring(&self) -> bool {
        self.state.is_acquiring()
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_connected()
    }

    /// Returns true while the timer is armed.
    pub fn is_timer_active(&self) -> bool {
        self.timer.is_armed()
    }

    /// Current timer interval.
    pub fn interval(&self) -> Duration {
        self.timer.interval
    }

    /// Deadline of the next tick, if the timer is armed.
    pub fn next_due(&self) -> Option<Instant> {
        self.timer.next_due
    }

    pub fn parameters(&self) -> &AcquisitionParameters {
        &self.params
    }

    pub fn stats(&self) -> Arc<AcquisitionStats> {
        Arc::clone(&self.stats)
    }

    /// Brings the device up if idle and arms the timer.
    pub fn start_acquisition(&mut self) -> Result<(), AcquisitionError> {
        if !self.device.is_connected() {
            return Err(AcquisitionError::DeviceInit(DeviceError::new(
                DeviceOperation::Init,
                "device not connected",
            )));
        }
        self.ensure_acquiring()?;
        self.timer.arm(Instant::now());
        info!(
            interval_ms = self.timer.interval.as_millis() as u64,
            "Acquisition timer started"
        );
        Ok(())
    }

    /// Disarms the timer. Unless `keep_active`, also stops the device and
    /// releases its buffers.
    pub fn stop_acquisition(&mut self, keep_active: bool) -> Result<(), AcquisitionError> {
        if self.timer.is_armed() {
            self.timer.disarm();
            debug!("Acquisition timer stopped");
        }
        if keep_active || self.state != AcquisitionState::Acquiring {
            return Ok(());
        }

        self.state = AcquisitionState::Stopping;
        let torn_down = tear_down(&mut self.device);
        self.state = AcquisitionState::Idle;
        torn_down?;
        info!("Acquisition stopped");
        Ok(())
    }

    /// Acquires, normalizes and delivers one frame.
    ///
    /// Never fails: problems are logged, counted and reported in the
    /// outcome, and the timer keeps running.
    pub fn tick(&mut self) -> TickOutcome {
        let skipped = if !self.timer.is_armed() {
            Some(SkipReason::Disarmed)
        } else if !self.device.is_connected() {
            Some(SkipReason::NotConnected)
        } else if self.state != AcquisitionState::Acquiring {
            Some(SkipReason::NotAcquiring)
        } else {
            None
        };
        if let Some(reason) = skipped {
            self.stats.record_skipped_tick();
            debug!(?reason, "Tick skipped");
            return TickOutcome::Skipped(reason);
        }

        match self.device.acquire_frame() {
            Ok(raw) => match deliver_raw(raw, &self.sender, &self.stats) {
                Ok(sequence) => TickOutcome::Delivered(sequence),
                Err(_) => TickOutcome::Dropped,
            },
            Err(e) => {
                self.stats.record_device_error();
                warn!(error = %e, "Tick failed");
                TickOutcome::Failed
            }
        }
    }

    /// Runs a tick if the timer deadline has passed.
    pub fn tick_if_due(&mut self, now: Instant) -> Option<TickOutcome> {
        if self.timer.fire(now) {
            Some(self.tick())
        } else {
            None
        }
    }

    /// Drives the timer on the calling thread until `stop` is set or the
    /// timer is disarmed.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            let Some(due) = self.timer.next_due else {
                return;
            };
            let now = Instant::now();
            if due > now {
                std::thread::sleep((due - now).min(STOP_POLL));
                continue;
            }
            self.tick_if_due(now);
        }
    }

    /// Acquires one raw frame synchronously, bringing the device up if
    /// needed. The timer is left alone.
    pub fn grab_raw_frame(&mut self) -> Result<RawFrame, AcquisitionError> {
        self.ensure_acquiring()?;
        let raw = self.device.acquire_frame()?;
        self.stats.record_acquired();
        Ok(raw)
    }

    /// Acquires and normalizes one frame synchronously.
    pub fn grab_frame(&mut self) -> Result<DisplayFrame, AcquisitionError> {
        let raw = self.grab_raw_frame()?;
        Ok(normalize(raw)?)
    }

    /// Validates and applies a full parameter set, re-arming the timer
    /// when the frame rate changes.
    pub fn set_parameters(&mut self, params: AcquisitionParameters) -> Result<(), AcquisitionError> {
        params.validate()?;
        if params == self.params {
            return Ok(());
        }
        if params.color_mode != self.params.color_mode && self.state != AcquisitionState::Idle {
            return Err(ParamError::ColorModeLocked.into());
        }

        if let Err(e) = apply_parameters(&mut self.device, &self.params, &params) {
            if let Ok(actual) = read_parameters(&self.device) {
                self.params = actual;
            }
            self.rearm();
            return Err(e.into());
        }

        let rate_changed = params.frame_rate != self.params.frame_rate;
        self.params = params;
        if rate_changed {
            self.rearm();
        }
        Ok(())
    }

    /// Changes the frame rate, shortening the exposure if needed.
    pub fn set_frame_rate(&mut self, fps: f64) -> Result<(), AcquisitionError> {
        let next = self.params.with_frame_rate(fps)?;
        self.set_parameters(next)
    }

    /// Changes the exposure time in microseconds.
    pub fn set_exposure(&mut self, exposure_us: f64) -> Result<(), AcquisitionError> {
        let next = self.params.with_exposure(exposure_us)?;
        self.set_parameters(next)
    }

    /// Stops acquisition and hands back the device and the frame sender.
    pub fn into_parts(mut self) -> Result<(D, FrameSender), AcquisitionError> {
        self.stop_acquisition(false)?;
        Ok((self.device, self.sender))
    }

    /// Stops acquisition and hands back the device. Dropping the sender
    /// disconnects the receiver.
    pub fn into_device(self) -> Result<D, AcquisitionError> {
        self.into_parts().map(|(device, _)| device)
    }

    fn ensure_acquiring(&mut self) -> Result<(), AcquisitionError> {
        match self.state {
            AcquisitionState::Acquiring => Ok(()),
            AcquisitionState::Idle => {
                self.state = AcquisitionState::Initializing;
                if let Err(e) = bring_up(&mut self.device) {
                    self.state = AcquisitionState::Idle;
                    warn!(error = %e, "Device bring-up failed");
                    return Err(AcquisitionError::DeviceInit(e));
                }
                self.state = AcquisitionState::Acquiring;
                Ok(())
            }
            state => Err(AcquisitionError::Busy(state)),
        }
    }

    fn rearm(&mut self) {
        let interval = polling_interval(self.params.frame_rate, self.config.margin_ms);
        if interval != self.timer.interval {
            self.timer.set_interval(interval, Instant::now());
            debug!(
                interval_ms = interval.as_millis() as u64,
                "Acquisition timer re-armed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ColorMode, SensorConfig, SimulatedSensor};
    use crate::delivery::{channel, FrameReceiver};
    use std::thread;

    fn scheduler() -> (AcquisitionScheduler<SimulatedSensor>, FrameReceiver) {
        let sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        let (tx, rx) = channel();
        let scheduler = AcquisitionScheduler::new(sensor, tx, SchedulerConfig::default()).unwrap();
        (scheduler, rx)
    }

    #[test]
    fn test_polling_interval() {
        assert_eq!(polling_interval(10.0, 10), Duration::from_millis(110));
        assert_eq!(polling_interval(25.0, 10), Duration::from_millis(50));
        assert_eq!(polling_interval(30.0, 10), Duration::from_millis(43));
        assert_eq!(polling_interval(5000.0, 0), Duration::from_millis(1));
    }

    #[test]
    fn test_interval_follows_frame_rate() {
        let (mut scheduler, _rx) = scheduler();
        scheduler.start_acquisition().unwrap();
        assert_eq!(scheduler.interval(), Duration::from_millis(110));

        scheduler.set_frame_rate(25.0).unwrap();
        assert_eq!(scheduler.interval(), Duration::from_millis(50));
        assert!(scheduler.is_timer_active());

        scheduler.stop_acquisition(false).unwrap();
    }

    #[test]
    fn test_tick_delivers_and_survives_bad_frame() {
        let sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        sensor.faults().malformed_at(2);
        let (tx, rx) = channel();
        let mut scheduler =
            AcquisitionScheduler::new(sensor, tx, SchedulerConfig::default()).unwrap();

        scheduler.start_acquisition().unwrap();
        assert_eq!(scheduler.tick(), TickOutcome::Delivered(1));
        assert_eq!(rx.try_take().unwrap().sequence(), 1);

        assert_eq!(scheduler.tick(), TickOutcome::Dropped);
        assert!(rx.try_take().is_none());

        assert_eq!(scheduler.tick(), TickOutcome::Delivered(3));
        assert_eq!(rx.try_take().unwrap().sequence(), 3);
        assert!(scheduler.is_timer_active());
        assert_eq!(scheduler.stats().snapshot().malformed, 1);
    }

    #[test]
    fn test_device_failure_keeps_timer() {
        let sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        let faults = sensor.faults();
        let (tx, _rx) = channel();
        let mut scheduler =
            AcquisitionScheduler::new(sensor, tx, SchedulerConfig::default()).unwrap();
        scheduler.start_acquisition().unwrap();

        faults.fail(DeviceOperation::AcquireFrame);
        assert_eq!(scheduler.tick(), TickOutcome::Failed);
        assert!(scheduler.is_timer_active());

        faults.recover(DeviceOperation::AcquireFrame);
        assert!(matches!(scheduler.tick(), TickOutcome::Delivered(_)));
        assert_eq!(scheduler.stats().snapshot().device_errors, 1);
    }

    #[test]
    fn test_disconnected_tick_skipped() {
        let sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        let faults = sensor.faults();
        let (tx, _rx) = channel();
        let mut scheduler =
            AcquisitionScheduler::new(sensor, tx, SchedulerConfig::default()).unwrap();
        scheduler.start_acquisition().unwrap();

        faults.disconnect();
        assert_eq!(
            scheduler.tick(),
            TickOutcome::Skipped(SkipReason::NotConnected)
        );
        faults.reconnect();
        assert!(matches!(scheduler.tick(), TickOutcome::Delivered(_)));
    }

    #[test]
    fn test_disarmed_tick_skipped() {
        let (mut scheduler, _rx) = scheduler();
        assert_eq!(scheduler.tick(), TickOutcome::Skipped(SkipReason::Disarmed));
        assert_eq!(scheduler.stats().snapshot().skipped_ticks, 1);
    }

    #[test]
    fn test_keep_active_stops_timer_only() {
        let sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        let log = sensor.call_log();
        let (tx, _rx) = channel();
        let mut scheduler =
            AcquisitionScheduler::new(sensor, tx, SchedulerConfig::default()).unwrap();
        scheduler.start_acquisition().unwrap();

        scheduler.stop_acquisition(true).unwrap();
        assert!(!scheduler.is_timer_active());
        assert!(scheduler.is_acquiring());
        assert_eq!(log.count(DeviceOperation::StopAcquisition), 0);

        let frame = scheduler.grab_frame().unwrap();
        assert_eq!(frame.pixels().len(), 32);
        assert_eq!(log.count(DeviceOperation::Init), 1);

        scheduler.stop_acquisition(false).unwrap();
        assert_eq!(scheduler.state(), AcquisitionState::Idle);
        assert_eq!(log.count(DeviceOperation::ReleaseBuffers), 1);

        // Stopping again touches nothing.
        log.clear();
        scheduler.stop_acquisition(false).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_grab_raw_frame_keeps_bit_depth() {
        let mut sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        sensor.set_color_mode(ColorMode::Mono12).unwrap();
        let (tx, _rx) = channel();
        let mut scheduler =
            AcquisitionScheduler::new(sensor, tx, SchedulerConfig::default()).unwrap();

        let raw = scheduler.grab_raw_frame().unwrap();
        assert_eq!(raw.bit_depth(), 12);
        assert!(scheduler.is_acquiring());
        assert!(!scheduler.is_timer_active());
    }

    #[test]
    fn test_tick_if_due_respects_deadline() {
        let (mut scheduler, _rx) = scheduler();
        scheduler.start_acquisition().unwrap();
        let due = scheduler.next_due().unwrap();

        assert_eq!(scheduler.tick_if_due(due - Duration::from_millis(1)), None);
        assert!(matches!(
            scheduler.tick_if_due(due),
            Some(TickOutcome::Delivered(1))
        ));
        assert_eq!(scheduler.next_due(), Some(due + Duration::from_millis(110)));
        assert_eq!(scheduler.tick_if_due(due), None);
    }

    #[test]
    fn test_failed_start_leaves_timer_off() {
        let sensor = SimulatedSensor::new(SensorConfig::with_dimensions(8, 4));
        sensor.faults().fail(DeviceOperation::AllocateBuffers);
        let (tx, _rx) = channel();
        let mut scheduler =
            AcquisitionScheduler::new(sensor, tx, SchedulerConfig::default()).unwrap();

        assert!(matches!(
            scheduler.start_acquisition(),
            Err(AcquisitionError::DeviceInit(_))
        ));
        assert_eq!(scheduler.state(), AcquisitionState::Idle);
        assert!(!scheduler.is_timer_active());
    }

    #[test]
    fn test_exposure_rejected_at_fifty_fps() {
        let (mut scheduler, _rx) = scheduler();
        scheduler.set_frame_rate(50.0).unwrap();

        let err = scheduler.set_exposure(20_000.0).unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Param(ParamError::ExposureExceedsFramePeriod { .. })
        ));
        assert_eq!(scheduler.parameters().exposure_us, 10_000.0);
        assert_eq!(scheduler.parameters().frame_rate, 50.0);
    }

    #[test]
    fn test_run_until_stop_flag() {
        let (mut scheduler, rx) = scheduler();
        scheduler.set_frame_rate(100.0).unwrap();
        scheduler.start_acquisition().unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            flag.store(true, Ordering::Relaxed);
        });

        scheduler.run_until(&stop);
        stopper.join().unwrap();
        assert!(rx.delivered_count() > 0);

        let (device, _sender) = scheduler.into_parts().unwrap();
        assert!(!device.buffers_allocated());
    }
}
