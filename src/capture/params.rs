//! Acquisition parameters and their consistency rules.
//!
//! The exposure time must always fit inside the frame period. Every
//! constructor here either preserves that or reports a [`ParamError`].

use super::PixelLayout;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sensor pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorMode {
    /// 8-bit monochrome.
    #[default]
    Mono8,
    /// 10-bit monochrome, two bytes per sample.
    Mono10,
    /// 12-bit monochrome, two bytes per sample.
    Mono12,
    /// 16-bit monochrome.
    Mono16,
}

impl ColorMode {
    /// Significant bits per sample.
    pub fn bits_per_pixel(self) -> u8 {
        match self {
            Self::Mono8 => 8,
            Self::Mono10 => 10,
            Self::Mono12 => 12,
            Self::Mono16 => 16,
        }
    }

    /// Largest sample value the mode can represent.
    pub fn max_value(self) -> u32 {
        (1u32 << self.bits_per_pixel()) - 1
    }

    /// Pixel layout of frames captured in this mode.
    pub fn layout(self) -> PixelLayout {
        PixelLayout::Mono
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mono8 => "Mono8",
            Self::Mono10 => "Mono10",
            Self::Mono12 => "Mono12",
            Self::Mono16 => "Mono16",
        };
        f.write_str(name)
    }
}

impl FromStr for ColorMode {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mono8" => Ok(Self::Mono8),
            "mono10" => Ok(Self::Mono10),
            "mono12" => Ok(Self::Mono12),
            "mono16" => Ok(Self::Mono16),
            _ => Err(ParamError::UnknownColorMode(s.to_string())),
        }
    }
}

/// Parameter validation errors.
///
/// A rejected update never reaches the device; the previous parameters stay
/// in effect.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("frame rate must be a positive number of frames per second, got {0}")]
    InvalidFrameRate(f64),
    #[error("exposure time must be a positive number of microseconds, got {0}")]
    InvalidExposure(f64),
    #[error("exposure time {exposure_us} us does not fit in the {period_us} us frame period")]
    ExposureExceedsFramePeriod { exposure_us: f64, period_us: f64 },
    #[error("black level {value} exceeds the {max} maximum of the color mode")]
    BlackLevelOutOfRange { value: u32, max: u32 },
    #[error("color mode can only change while acquisition is idle")]
    ColorModeLocked,
    #[error("unknown color mode `{0}`")]
    UnknownColorMode(String),
}

/// Sensor settings that drive acquisition timing and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParameters {
    /// Frames per second.
    pub frame_rate: f64,
    /// Exposure time in microseconds.
    pub exposure_us: f64,
    /// Black level offset in sensor counts.
    pub black_level: u32,
    /// Pixel format.
    pub color_mode: ColorMode,
}

impl Default for AcquisitionParameters {
    fn default() -> Self {
        Self {
            frame_rate: 10.0,
            exposure_us: 10_000.0, // 10ms
            black_level: 0,
            color_mode: ColorMode::Mono8,
        }
    }
}

impl AcquisitionParameters {
    /// Length of one frame in microseconds.
    pub fn frame_period_us(&self) -> f64 {
        1e6 / self.frame_rate
    }

    /// Checks every field and the exposure/frame-period invariant.
    pub fn validate(&self) -> Result<(), ParamError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ParamError::InvalidFrameRate(self.frame_rate));
        }
        if !self.exposure_us.is_finite() || self.exposure_us <= 0.0 {
            return Err(ParamError::InvalidExposure(self.exposure_us));
        }
        let period_us = self.frame_period_us();
        if self.exposure_us >= period_us {
            return Err(ParamError::ExposureExceedsFramePeriod {
                exposure_us: self.exposure_us,
                period_us,
            });
        }
        let max = self.color_mode.max_value();
        if self.black_level > max {
            return Err(ParamError::BlackLevelOutOfRange {
                value: self.black_level,
                max,
            });
        }
        Ok(())
    }

    /// Returns a copy running at `fps`, shortening the exposure if it no
    /// longer fits.
    ///
    /// A clamped exposure leaves one millisecond of headroom below the
    /// frame period, or half the period for very fast rates.
    pub fn with_frame_rate(&self, fps: f64) -> Result<Self, ParamError> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(ParamError::InvalidFrameRate(fps));
        }
        let mut next = Self {
            frame_rate: fps,
            ..self.clone()
        };
        let period_us = next.frame_period_us();
        if next.exposure_us >= period_us {
            let headroom_us = ((1000.0 / fps).floor() - 1.0) * 1000.0;
            next.exposure_us = if headroom_us > 0.0 {
                headroom_us
            } else {
                period_us / 2.0
            };
            tracing::debug!(
                fps,
                exposure_us = next.exposure_us,
                "Exposure clamped to new frame period"
            );
        }
        next.validate()?;
        Ok(next)
    }

    /// Returns a copy with a new exposure time, validated against the
    /// current frame rate.
    pub fn with_exposure(&self, exposure_us: f64) -> Result<Self, ParamError> {
        let next = Self {
            exposure_us,
            ..self.clone()
        };
        next.validate()?;
        Ok(next)
    }
}
