//! Raw sensor frame as handed over by the device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Arrangement of samples in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelLayout {
    /// One intensity sample per pixel.
    #[default]
    Mono,
    /// Unprocessed color filter mosaic, one sample per photosite.
    Bayer,
}

/// A single frame in the sensor's native bit depth.
///
/// Samples of up to 8 bits take one byte each. Deeper samples take two
/// bytes, little-endian. The buffer is owned; nothing aliases device memory
/// once the frame has been returned.
#[derive(Clone)]
pub struct RawFrame {
    /// Sample bytes.
    data: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Significant bits per sample.
    bit_depth: u8,
    layout: PixelLayout,
    /// Monotonic sequence number assigned by the device.
    sequence: u64,
    /// Wall-clock capture time.
    captured_at: DateTime<Utc>,
}

impl RawFrame {
    /// Creates a frame stamped with the current time.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        bit_depth: u8,
        layout: PixelLayout,
        sequence: u64,
    ) -> Self {
        Self {
            data,
            width,
            height,
            bit_depth,
            layout,
            sequence,
            captured_at: Utc::now(),
        }
    }

    /// Builds a deep frame from 16-bit samples.
    pub fn from_samples(
        samples: &[u16],
        width: u32,
        height: u32,
        bit_depth: u8,
        sequence: u64,
    ) -> Self {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(data, width, height, bit_depth, PixelLayout::Mono, sequence)
    }

    /// Returns the raw sample bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the frame and returns its sample bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the declared bit depth.
    #[inline]
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    #[inline]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the capture timestamp.
    #[inline]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Bytes used by one sample at the declared bit depth.
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        bytes_per_sample(self.bit_depth)
    }

    /// Returns the total number of pixels (width * height), or `None` if
    /// the declared dimensions do not fit in `usize`.
    #[inline]
    pub fn pixel_count(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }

    /// Buffer length implied by the dimensions and bit depth.
    pub fn expected_len(&self) -> Option<usize> {
        self.pixel_count()?.checked_mul(self.bytes_per_sample())
    }

    /// Iterates over samples widened to `u16`.
    pub fn samples(&self) -> impl Iterator<Item = u16> + '_ {
        let wide = self.bytes_per_sample() == 2;
        let step = if wide { 2 } else { 1 };
        self.data.chunks_exact(step).map(move |chunk| {
            if wide {
                u16::from_le_bytes([chunk[0], chunk[1]])
            } else {
                u16::from(chunk[0])
            }
        })
    }
}

/// Bytes needed to store one sample of `bit_depth` bits.
#[inline]
pub fn bytes_per_sample(bit_depth: u8) -> usize {
    if bit_depth <= 8 {
        1
    } else {
        2
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bit_depth", &self.bit_depth)
            .field("layout", &self.layout)
            .field("sequence", &self.sequence)
            .field("data_bytes", &self.data.len())
            .finish()
    }
}
