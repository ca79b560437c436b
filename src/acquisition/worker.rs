//! Push model: a dedicated thread acquires continuously.
//!
//! # Stop protocol
//!
//! ```text
//! controller                         loop thread
//! ----------                         -----------
//! phase = StopRequested  ─────────►  sees phase != Running
//! state = Stopping                   phase = Parked, notify
//! wait_timeout_while(!Parked) ◄────  exits
//! device stop + release
//! state = Idle
//! ```
//!
//! Control state lives behind one mutex paired with one condvar. The device
//! has its own mutex; locks are always taken control first, device second.
//! The loop is the only caller of `acquire_frame` while it runs.

use super::lifecycle::{bring_up, deliver_raw, tear_down};
use super::{AcquisitionError, AcquisitionState, AcquisitionStats};
use crate::capture::{
    apply_parameters, read_parameters, AcquisitionParameters, DeviceError, ParamError,
    SensorDevice,
};
use crate::delivery::FrameSender;
use crate::normalize::{normalize, DisplayFrame};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on how long `request_stop` waits for the loop to park.
    pub stop_timeout: Duration,
    /// Name given to the acquisition thread.
    pub thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(2),
            thread_name: String::from("acquisition"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopPhase {
    Parked,
    Running,
    StopRequested,
}

#[derive(Debug)]
struct Control {
    state: AcquisitionState,
    phase: LoopPhase,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared<D> {
    control: Mutex<Control>,
    parked: Condvar,
    device: Mutex<D>,
    params: Mutex<AcquisitionParameters>,
    sender: FrameSender,
    stats: Arc<AcquisitionStats>,
}

impl<D: SensorDevice> Shared<D> {
    /// Cleanup after the loop died on a device error.
    ///
    /// If a controller is already waiting in `request_stop` it owns the
    /// teardown; otherwise the loop releases the device itself.
    fn abandon(&self) {
        let mut control = lock(&self.control);
        if control.phase == LoopPhase::Running {
            control.phase = LoopPhase::Parked;
            control.state = AcquisitionState::Stopping;
            if let Err(e) = tear_down(&mut *lock(&self.device)) {
                warn!(error = %e, "Teardown after loop failure incomplete");
            }
            control.state = AcquisitionState::Idle;
            info!("Acquisition loop stopped after device error, device idle");
        } else {
            control.phase = LoopPhase::Parked;
        }
        self.parked.notify_all();
    }
}

/// Runs [`Shared::abandon`] if the loop thread unwinds, so a panicking
/// device call still parks the loop and releases the device.
struct ParkOnUnwind<'a, D: SensorDevice>(&'a Shared<D>);

impl<D: SensorDevice> Drop for ParkOnUnwind<'_, D> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.stats.record_device_error();
            error!("Acquisition loop panicked");
            self.0.abandon();
        }
    }
}

fn run_loop<D: SensorDevice>(shared: Arc<Shared<D>>) {
    let _guard = ParkOnUnwind(&shared);
    debug!("Acquisition loop running");
    loop {
        {
            let mut control = lock(&shared.control);
            if control.phase != LoopPhase::Running {
                control.phase = LoopPhase::Parked;
                shared.parked.notify_all();
                debug!("Acquisition loop parked");
                return;
            }
        }

        let acquired = lock(&shared.device).acquire_frame();
        match acquired {
            Ok(raw) => match deliver_raw(raw, &shared.sender, &shared.stats) {
                Ok(_) => {}
                // Already counted and logged; keep streaming.
                Err(_) => continue,
            },
            Err(e) => {
                shared.stats.record_device_error();
                error!(error = %e, "Acquisition loop terminated by device error");
                shared.abandon();
                return;
            }
        }
    }
}

/// Owns a device and pushes its frames into a delivery channel from a
/// background thread.
///
/// All control methods take `&self`, so the worker can be shared with a
/// signal handler or UI thread behind an `Arc`.
pub struct AcquisitionWorker<D: SensorDevice + 'static> {
    shared: Arc<Shared<D>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    config: WorkerConfig,
}

impl<D: SensorDevice + 'static> AcquisitionWorker<D> {
    /// Takes ownership of `device`. Its current parameters are read back
    /// as the starting point for updates.
    pub fn new(
        device: D,
        sender: FrameSender,
        config: WorkerConfig,
    ) -> Result<Self, AcquisitionError> {
        let params = read_parameters(&device)?;
        Ok(Self {
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    state: AcquisitionState::Idle,
                    phase: LoopPhase::Parked,
                }),
                parked: Condvar::new(),
                device: Mutex::new(device),
                params: Mutex::new(params),
                sender,
                stats: Arc::new(AcquisitionStats::new()),
            }),
            handle: Mutex::new(None),
            config,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcquisitionState {
        lock(&self.shared.control).state
    }

    /// Returns true while the device is capturing.
    pub fn is_acquiring(&self) -> bool {
        self.state().is_acquiring()
    }

    /// Returns true while the loop thread is delivering frames.
    pub fn is_streaming(&self) -> bool {
        lock(&self.shared.control).phase == LoopPhase::Running
    }

    /// Last parameters accepted by the device.
    pub fn parameters(&self) -> AcquisitionParameters {
        lock(&self.shared.params).clone()
    }

    pub fn stats(&self) -> Arc<AcquisitionStats> {
        Arc::clone(&self.shared.stats)
    }

    /// Brings the device up and starts the loop.
    ///
    /// A no-op while already initializing or streaming. After
    /// `request_stop(true)` only the loop is restarted.
    pub fn request_start(&self) -> Result<(), AcquisitionError> {
        let mut control = lock(&self.shared.control);
        match (control.state, control.phase) {
            (AcquisitionState::Initializing, _)
            | (AcquisitionState::Acquiring, LoopPhase::Running) => {
                debug!(state = %control.state, "Start ignored, already running");
                return Ok(());
            }
            (AcquisitionState::Acquiring, LoopPhase::Parked) => {
                control.phase = LoopPhase::Running;
                drop(control);
                if let Err(e) = self.spawn_loop() {
                    lock(&self.shared.control).phase = LoopPhase::Parked;
                    return Err(e);
                }
                info!("Acquisition loop resumed");
                return Ok(());
            }
            (AcquisitionState::Acquiring, LoopPhase::StopRequested)
            | (AcquisitionState::Stopping, _) => {
                return Err(AcquisitionError::Busy(control.state));
            }
            (AcquisitionState::Idle, _) => {}
        }

        control.state = AcquisitionState::Initializing;
        drop(control);

        let brought_up = bring_up(&mut *lock(&self.shared.device));

        let mut control = lock(&self.shared.control);
        if let Err(e) = brought_up {
            control.state = AcquisitionState::Idle;
            error!(error = %e, "Device bring-up failed");
            return Err(AcquisitionError::DeviceInit(e));
        }
        control.state = AcquisitionState::Acquiring;
        control.phase = LoopPhase::Running;
        drop(control);

        if let Err(e) = self.spawn_loop() {
            let mut control = lock(&self.shared.control);
            control.phase = LoopPhase::Parked;
            control.state = AcquisitionState::Stopping;
            if let Err(teardown) = tear_down(&mut *lock(&self.shared.device)) {
                warn!(error = %teardown, "Teardown after spawn failure incomplete");
            }
            control.state = AcquisitionState::Idle;
            self.shared.parked.notify_all();
            return Err(e);
        }

        info!("Acquisition started");
        Ok(())
    }

    /// Runs the stop protocol.
    ///
    /// With `keep_device_active` the loop is parked but the device keeps
    /// capturing, so [`grab_frame`](Self::grab_frame) works without paying
    /// for re-initialization. Otherwise the device is stopped, its buffers
    /// released and the state returns to `Idle`. A no-op while idle.
    pub fn request_stop(&self, keep_device_active: bool) -> Result<(), AcquisitionError> {
        let mut control = lock(&self.shared.control);
        match control.state {
            AcquisitionState::Idle => return Ok(()),
            AcquisitionState::Initializing => {
                return Err(AcquisitionError::Busy(control.state));
            }
            AcquisitionState::Acquiring | AcquisitionState::Stopping => {}
        }

        let full_stop = !keep_device_active || control.state == AcquisitionState::Stopping;
        if control.phase == LoopPhase::Running {
            control.phase = LoopPhase::StopRequested;
        }
        if full_stop {
            control.state = AcquisitionState::Stopping;
        }

        let timeout = self.config.stop_timeout;
        let (mut control, waited) = self
            .shared
            .parked
            .wait_timeout_while(control, timeout, |c| c.phase != LoopPhase::Parked)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if waited.timed_out() {
            warn!(?timeout, "Acquisition loop did not park in time");
            return Err(AcquisitionError::StopTimeout(timeout));
        }
        self.join_parked_loop();

        if !full_stop {
            info!("Acquisition loop parked, device kept active");
            return Ok(());
        }

        let torn_down = tear_down(&mut *lock(&self.shared.device));
        control.state = AcquisitionState::Idle;
        drop(control);
        torn_down?;
        info!("Acquisition stopped");
        Ok(())
    }

    /// Validates and applies a full parameter set.
    ///
    /// Rejected parameters never reach the device. The color mode can only
    /// change while idle.
    pub fn set_parameters(&self, params: AcquisitionParameters) -> Result<(), AcquisitionError> {
        params.validate()?;
        let mut current = lock(&self.shared.params);
        if *current == params {
            return Ok(());
        }

        let applied = if params.color_mode != current.color_mode {
            let control = lock(&self.shared.control);
            if control.state != AcquisitionState::Idle {
                return Err(ParamError::ColorModeLocked.into());
            }
            self.apply(&current, &params)
        } else {
            self.apply(&current, &params)
        };

        match applied {
            Ok(()) => {
                *current = params;
                Ok(())
            }
            Err((e, actual)) => {
                if let Some(actual) = actual {
                    *current = actual;
                }
                Err(e.into())
            }
        }
    }

    fn apply(
        &self,
        current: &AcquisitionParameters,
        next: &AcquisitionParameters,
    ) -> Result<(), (DeviceError, Option<AcquisitionParameters>)> {
        let mut device = lock(&self.shared.device);
        apply_parameters(&mut *device, current, next)
            .map_err(|e| (e, read_parameters(&*device).ok()))
    }

    /// Changes the frame rate, shortening the exposure if needed.
    pub fn set_frame_rate(&self, fps: f64) -> Result<(), AcquisitionError> {
        let next = self.parameters().with_frame_rate(fps)?;
        self.set_parameters(next)
    }

    /// Changes the exposure time in microseconds.
    pub fn set_exposure(&self, exposure_us: f64) -> Result<(), AcquisitionError> {
        let next = self.parameters().with_exposure(exposure_us)?;
        self.set_parameters(next)
    }

    /// Acquires one frame synchronously.
    ///
    /// Works while the loop is parked with the device active, or from idle,
    /// in which case the device is brought up and torn down around the grab.
    pub fn grab_frame(&self) -> Result<DisplayFrame, AcquisitionError> {
        let mut control = lock(&self.shared.control);
        let raw = match (control.state, control.phase) {
            (AcquisitionState::Acquiring, LoopPhase::Parked) => {
                lock(&self.shared.device).acquire_frame()?
            }
            (AcquisitionState::Idle, _) => {
                control.state = AcquisitionState::Initializing;
                let mut device = lock(&self.shared.device);
                if let Err(e) = bring_up(&mut *device) {
                    control.state = AcquisitionState::Idle;
                    return Err(AcquisitionError::DeviceInit(e));
                }
                control.state = AcquisitionState::Acquiring;
                let acquired = device.acquire_frame();
                control.state = AcquisitionState::Stopping;
                let torn_down = tear_down(&mut *device);
                control.state = AcquisitionState::Idle;
                let raw = acquired?;
                torn_down?;
                raw
            }
            (state, _) => return Err(AcquisitionError::Busy(state)),
        };
        drop(control);

        self.shared.stats.record_acquired();
        Ok(normalize(raw)?)
    }

    /// Stops acquisition and hands back the device and the frame sender.
    pub fn into_parts(self) -> Result<(D, FrameSender), AcquisitionError> {
        self.request_stop(false)?;
        let shared = Arc::clone(&self.shared);
        drop(self);
        match Arc::try_unwrap(shared) {
            Ok(shared) => {
                let device = shared
                    .device
                    .into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                Ok((device, shared.sender))
            }
            Err(_) => Err(AcquisitionError::Busy(AcquisitionState::Stopping)),
        }
    }

    /// Stops acquisition and hands back the device.
    pub fn into_device(self) -> Result<D, AcquisitionError> {
        self.into_parts().map(|(device, _)| device)
    }

    fn spawn_loop(&self) -> Result<(), AcquisitionError> {
        // A loop that died on a device error exits on its own; reap it.
        self.join_parked_loop();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_loop(shared))
            .map_err(AcquisitionError::Spawn)?;
        *lock(&self.handle) = Some(handle);
        Ok(())
    }

    /// Joins the loop thread. Only called once the loop has parked.
    fn join_parked_loop(&self) {
        if let Some(handle) = lock(&self.handle).take() {
            if handle.join().is_err() {
                error!("Acquisition thread panicked");
            }
        }
    }
}

impl<D: SensorDevice + 'static> Drop for AcquisitionWorker<D> {
    fn drop(&mut self) {
        if let Err(e) = self.request_stop(false) {
            warn!(error = %e, "Stop on drop failed");
        }
        if lock(&self.shared.control).phase == LoopPhase::Parked {
            self.join_parked_loop();
        } else if lock(&self.handle).take().is_some() {
            warn!("Detaching acquisition thread that never parked");
        }
    }
}
