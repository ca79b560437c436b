//! Normalized 8-bit frame ready for rendering.

use crate::capture::PixelLayout;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// An immutable 8-bit frame with the dimensions of its source.
///
/// Pixel data is reference counted, so cloning a frame for several
/// consumers does not copy the image.
#[derive(Clone)]
pub struct DisplayFrame {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    layout: PixelLayout,
    /// Sequence number of the source frame.
    sequence: u64,
    captured_at: DateTime<Utc>,
}

impl DisplayFrame {
    pub(crate) fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        sequence: u64,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            layout,
            sequence,
            captured_at,
        }
    }

    /// Returns the 8-bit samples, row major.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Capture time of the source frame.
    #[inline]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Sample at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y as usize) * (self.width as usize) + (x as usize);
        self.pixels.get(index).copied()
    }

    /// Mean intensity, used for exposure feedback in the CLI.
    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| u64::from(p)).sum();
        sum as f64 / self.pixels.len() as f64
    }
}

impl std::fmt::Debug for DisplayFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("sequence", &self.sequence)
            .finish()
    }
}
