//! Camera Acquisition CLI
//!
//! Streams frames from a simulated sensor through the push or pull
//! acquisition driver and reports what was delivered.

use camera_acquisition::{
    acquisition::{AcquisitionScheduler, AcquisitionWorker, StatsSnapshot},
    capture::{AcquisitionParameters, ColorMode, SensorDevice, SimulatedSensor},
    config::{FileConfig, Mode},
    delivery::{channel, FrameReceiver, FrameSender, RecvError},
    metrics::{MetricsRegistry, MetricsSnapshot},
    normalize::DisplayFrame,
};
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// How long the consumer blocks before re-checking the stop conditions.
const CONSUMER_POLL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "camera-acquisition", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Acquisition strategy: push or pull.
    #[arg(long)]
    mode: Option<Mode>,
    /// Frames per second.
    #[arg(long)]
    fps: Option<f64>,
    /// Exposure time in microseconds.
    #[arg(long)]
    exposure_us: Option<f64>,
    /// Pixel format (Mono8, Mono10, Mono12, Mono16).
    #[arg(long)]
    color_mode: Option<ColorMode>,
    /// Run length in seconds; 0 runs until Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Print Prometheus metrics on exit.
    #[arg(long)]
    print_metrics: bool,
}

/// Stop conditions shared by both drivers.
struct RunLimit {
    interrupted: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RunLimit {
    fn reached(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Consumer-side tally.
#[derive(Default)]
struct Consumed {
    frames: u64,
    last_sequence: u64,
}

impl Consumed {
    fn record(&mut self, frame: &DisplayFrame) {
        self.frames += 1;
        self.last_sequence = frame.sequence();
        debug!(
            sequence = frame.sequence(),
            width = frame.width(),
            height = frame.height(),
            mean = frame.mean(),
            "Frame received"
        );
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!(error = %e, "Acquisition run failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    info!("Camera Acquisition v{}", camera_acquisition::VERSION);

    let mut config = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.acquisition.mode = mode;
    }
    if let Some(secs) = args.duration_secs {
        config.output.duration_secs = secs;
    }
    config.output.print_metrics |= args.print_metrics;
    let params = override_parameters(config.parameters.clone(), &args)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))?;

    let limit = RunLimit {
        interrupted,
        deadline: (config.output.duration_secs > 0)
            .then(|| Instant::now() + Duration::from_secs(config.output.duration_secs)),
    };

    let sensor = SimulatedSensor::new(config.sensor.clone());
    info!(
        device = sensor.name(),
        mode = %config.acquisition.mode,
        width = config.sensor.width,
        height = config.sensor.height,
        frame_rate = params.frame_rate,
        exposure_us = params.exposure_us,
        color_mode = %params.color_mode,
        "Starting acquisition"
    );

    let (tx, rx) = channel();
    let (stats, consumed) = match config.acquisition.mode {
        Mode::Push => run_push(sensor, tx, &config, params, &rx, &limit)?,
        Mode::Pull => run_pull(sensor, tx, &config, params, &rx, &limit)?,
    };

    info!(
        consumed = consumed.frames,
        last_sequence = consumed.last_sequence,
        acquired = stats.acquired,
        delivered = stats.delivered,
        overwritten = rx.overwritten_count(),
        malformed = stats.malformed,
        device_errors = stats.device_errors,
        skipped_ticks = stats.skipped_ticks,
        "Acquisition finished"
    );

    if config.output.print_metrics {
        let registry = MetricsRegistry::new()?;
        registry.update(&MetricsSnapshot::from_components(&stats, &rx, false));
        print!("{}", registry.encode()?);
    }
    Ok(())
}

fn override_parameters(
    mut params: AcquisitionParameters,
    args: &Args,
) -> Result<AcquisitionParameters, Box<dyn Error>> {
    if let Some(fps) = args.fps {
        params = params.with_frame_rate(fps)?;
    }
    if let Some(exposure_us) = args.exposure_us {
        params = params.with_exposure(exposure_us)?;
    }
    if let Some(color_mode) = args.color_mode {
        params.color_mode = color_mode;
    }
    params.validate()?;
    Ok(params)
}

fn run_push(
    sensor: SimulatedSensor,
    tx: FrameSender,
    config: &FileConfig,
    params: AcquisitionParameters,
    rx: &FrameReceiver,
    limit: &RunLimit,
) -> Result<(StatsSnapshot, Consumed), Box<dyn Error>> {
    let worker = AcquisitionWorker::new(sensor, tx, config.acquisition.worker_config())?;
    worker.set_parameters(params)?;
    worker.request_start()?;

    let mut consumed = Consumed::default();
    while !limit.reached() {
        match rx.recv_timeout(CONSUMER_POLL) {
            Ok(frame) => consumed.record(&frame),
            Err(RecvError::Timeout) => {
                if !worker.is_acquiring() {
                    info!("Acquisition ended by the device");
                    break;
                }
            }
            Err(RecvError::Disconnected) => break,
        }
    }

    worker.request_stop(false)?;
    Ok((worker.stats().snapshot(), consumed))
}

fn run_pull(
    sensor: SimulatedSensor,
    tx: FrameSender,
    config: &FileConfig,
    params: AcquisitionParameters,
    rx: &FrameReceiver,
    limit: &RunLimit,
) -> Result<(StatsSnapshot, Consumed), Box<dyn Error>> {
    let mut scheduler = AcquisitionScheduler::new(sensor, tx, config.acquisition.scheduler_config())?;
    scheduler.set_parameters(params)?;
    scheduler.start_acquisition()?;
    info!(
        interval_ms = scheduler.interval().as_millis() as u64,
        "Polling timer armed"
    );

    let mut consumed = Consumed::default();
    while !limit.reached() {
        let Some(due) = scheduler.next_due() else {
            break;
        };
        let now = Instant::now();
        if now < due {
            std::thread::sleep((due - now).min(CONSUMER_POLL));
            continue;
        }
        if scheduler.tick_if_due(now).is_some() {
            if let Some(frame) = rx.try_take() {
                consumed.record(&frame);
            }
        }
    }

    scheduler.stop_acquisition(false)?;
    Ok((scheduler.stats().snapshot(), consumed))
}
