//! Run configuration.
//!
//! Loaded from a TOML file; every section is optional and falls back to its
//! defaults.
//!
//! ```toml
//! [sensor]
//! width = 640
//! height = 480
//!
//! [parameters]
//! frame_rate = 25.0
//! exposure_us = 20000.0
//! color_mode = "Mono12"
//!
//! [acquisition]
//! mode = "pull"
//! poll_margin_ms = 10
//!
//! [output]
//! duration_secs = 5
//! ```

use crate::acquisition::{SchedulerConfig, WorkerConfig, DEFAULT_MARGIN_MS};
use crate::capture::{AcquisitionParameters, ParamError, SensorConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Largest accepted sensor width or height.
pub const MAX_DIMENSION: u32 = 65_535;

/// Acquisition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Dedicated acquisition thread.
    #[default]
    Push,
    /// Timer-driven ticks on the caller's thread.
    Pull,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::Pull => f.write_str("pull"),
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Acquisition driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub mode: Mode,
    /// Milliseconds added to the frame period in pull mode.
    pub poll_margin_ms: u64,
    /// Longest wait for the push loop to park on stop.
    pub stop_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Push,
            poll_margin_ms: DEFAULT_MARGIN_MS,
            stop_timeout_ms: 2000,
        }
    }
}

impl AcquisitionConfig {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            ..Default::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            margin_ms: self.poll_margin_ms,
        }
    }
}

/// What the binary does with the frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Run length in seconds; 0 runs until interrupted.
    pub duration_secs: u64,
    /// Print Prometheus text metrics on exit.
    pub print_metrics: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            print_metrics: false,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("stop timeout must be non-zero")]
    InvalidStopTimeout,
    #[error("unknown acquisition mode `{0}` (expected push or pull)")]
    UnknownMode(String),
    #[error(transparent)]
    Parameters(#[from] ParamError),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub parameters: AcquisitionParameters,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl FileConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: FileConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (width, height) = (self.sensor.width, self.sensor.height);
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.acquisition.stop_timeout_ms == 0 {
            return Err(ConfigError::InvalidStopTimeout);
        }
        self.parameters.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ColorMode;

    #[test]
    fn test_default_config_valid() {
        let config = FileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.mode, Mode::Push);
        assert_eq!(config.parameters.frame_rate, 10.0);
    }

    #[test]
    fn test_zero_dimensions_invalid() {
        let mut config = FileConfig::default();
        config.sensor.width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDimensions)
        ));
    }

    #[test]
    fn test_oversized_dimensions_invalid() {
        let mut config = FileConfig::default();
        config.sensor.width = u32::MAX;
        config.sensor.height = u32::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDimensions)
        ));

        config.sensor.width = MAX_DIMENSION;
        config.sensor.height = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file() {
        let config: FileConfig = toml::from_str(
            r#"
            [parameters]
            frame_rate = 25.0
            color_mode = "Mono12"

            [acquisition]
            mode = "pull"
            "#,
        )
        .unwrap();

        assert_eq!(config.acquisition.mode, Mode::Pull);
        assert_eq!(config.acquisition.poll_margin_ms, 10);
        assert_eq!(config.parameters.color_mode, ColorMode::Mono12);
        assert_eq!(config.parameters.exposure_us, 10_000.0);
        assert_eq!(config.sensor.width, 640);
        assert_eq!(
            config.acquisition.scheduler_config().margin_ms,
            DEFAULT_MARGIN_MS
        );
    }

    #[test]
    fn test_exposure_longer_than_period_invalid() {
        let config: FileConfig = toml::from_str(
            r#"
            [parameters]
            frame_rate = 50.0
            exposure_us = 20000.0
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Parameters(
                ParamError::ExposureExceedsFramePeriod { .. }
            ))
        ));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("PULL".parse::<Mode>().unwrap(), Mode::Pull);
        assert!(matches!(
            "both".parse::<Mode>(),
            Err(ConfigError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_missing_file_reported() {
        assert!(matches!(
            FileConfig::from_file("/nonexistent/camera.toml"),
            Err(ConfigError::FileReadError(_))
        ));
    }
}
