//! Bit-depth normalization.
//!
//! Every raw frame goes through [`normalize`] before it reaches a consumer,
//! so display and export share one conversion rule.
//!
//! # Conversion
//!
//! ```text
//! depth <= 8   sample bytes copied unchanged
//! depth  > 8   v -> v >> (depth - 8), saturating at 255
//! ```

mod display;

pub use display::DisplayFrame;

use crate::capture::{bytes_per_sample, RawFrame};
use thiserror::Error;

/// Deepest sample the normalizer accepts.
pub const MAX_BIT_DEPTH: u8 = 16;

/// A raw frame whose buffer does not match its declared shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedFrameError {
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("frame has zero width or height")]
    EmptyDimensions,
    #[error("frame dimensions {width}x{height} exceed addressable memory")]
    DimensionsTooLarge { width: u32, height: u32 },
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u8),
}

/// Converts a raw frame to 8 bits per sample.
///
/// Pure and deterministic. The raw buffer is consumed; for 8-bit frames it
/// becomes the display buffer without a copy.
pub fn normalize(raw: RawFrame) -> Result<DisplayFrame, MalformedFrameError> {
    let depth = raw.bit_depth();
    if depth == 0 || depth > MAX_BIT_DEPTH {
        return Err(MalformedFrameError::UnsupportedBitDepth(depth));
    }
    if raw.width() == 0 || raw.height() == 0 {
        return Err(MalformedFrameError::EmptyDimensions);
    }
    let expected = raw
        .pixel_count()
        .and_then(|n| n.checked_mul(bytes_per_sample(depth)))
        .ok_or(MalformedFrameError::DimensionsTooLarge {
            width: raw.width(),
            height: raw.height(),
        })?;
    if raw.data().len() != expected {
        return Err(MalformedFrameError::LengthMismatch {
            expected,
            actual: raw.data().len(),
        });
    }

    let (width, height) = (raw.width(), raw.height());
    let (layout, sequence, captured_at) = (raw.layout(), raw.sequence(), raw.captured_at());

    let pixels = if depth <= 8 {
        raw.into_data()
    } else {
        let shift = u32::from(depth - 8);
        raw.samples()
            .map(|v| (v >> shift).min(u16::from(u8::MAX)) as u8)
            .collect()
    };

    Ok(DisplayFrame::new(
        pixels,
        width,
        height,
        layout,
        sequence,
        captured_at,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelLayout;
    use proptest::prelude::*;

    #[test]
    fn test_eight_bit_is_identity() {
        let data: Vec<u8> = (0..=255).collect();
        let raw = RawFrame::new(data.clone(), 16, 16, 8, PixelLayout::Mono, 3);

        let frame = normalize(raw).unwrap();
        assert_eq!(frame.pixels(), &data[..]);
        assert_eq!(frame.sequence(), 3);
    }

    #[test]
    fn test_twelve_bit_divides_by_sixteen() {
        let raw = RawFrame::from_samples(&[4095, 16, 0, 31], 2, 2, 12, 1);

        let frame = normalize(raw).unwrap();
        assert_eq!(frame.pixels(), &[255, 1, 0, 1]);
    }

    #[test]
    fn test_out_of_range_sample_saturates() {
        // 12-bit frame carrying a value the sensor should never produce.
        let raw = RawFrame::from_samples(&[u16::MAX, 4096], 2, 1, 12, 1);

        let frame = normalize(raw).unwrap();
        assert_eq!(frame.pixels(), &[255, 255]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let raw = RawFrame::new(vec![0u8; 10], 4, 4, 8, PixelLayout::Mono, 1);
        assert_eq!(
            normalize(raw).unwrap_err(),
            MalformedFrameError::LengthMismatch {
                expected: 16,
                actual: 10
            }
        );

        // A deep frame needs two bytes per sample.
        let raw = RawFrame::new(vec![0u8; 16], 4, 4, 12, PixelLayout::Mono, 1);
        assert!(matches!(
            normalize(raw),
            Err(MalformedFrameError::LengthMismatch { expected: 32, .. })
        ));
    }

    #[test]
    fn test_invalid_shape_rejected() {
        let raw = RawFrame::new(Vec::new(), 0, 4, 8, PixelLayout::Mono, 1);
        assert_eq!(normalize(raw).unwrap_err(), MalformedFrameError::EmptyDimensions);

        let raw = RawFrame::new(vec![0u8; 8], 2, 2, 17, PixelLayout::Mono, 1);
        assert_eq!(
            normalize(raw).unwrap_err(),
            MalformedFrameError::UnsupportedBitDepth(17)
        );
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let raw = RawFrame::new(vec![0u8; 4], u32::MAX, u32::MAX, 12, PixelLayout::Mono, 1);
        assert_eq!(
            normalize(raw).unwrap_err(),
            MalformedFrameError::DimensionsTooLarge {
                width: u32::MAX,
                height: u32::MAX
            }
        );

        let raw = RawFrame::new(vec![0u8; 4], u32::MAX, 2, 16, PixelLayout::Mono, 1);
        assert!(normalize(raw).is_err());
    }

    #[test]
    fn test_layout_preserved() {
        let raw = RawFrame::new(vec![7u8; 4], 2, 2, 8, PixelLayout::Bayer, 1);
        assert_eq!(normalize(raw).unwrap().layout(), PixelLayout::Bayer);
    }

    fn deep_frame() -> impl Strategy<Value = (u8, u32, u32, Vec<u16>)> {
        (prop::sample::select(vec![10u8, 12, 16]), 1u32..16, 1u32..16).prop_flat_map(
            |(depth, w, h)| {
                let max = ((1u32 << depth) - 1) as u16;
                (
                    Just(depth),
                    Just(w),
                    Just(h),
                    prop::collection::vec(0..=max, (w * h) as usize),
                )
            },
        )
    }

    proptest! {
        #[test]
        fn prop_output_has_one_byte_per_pixel((depth, w, h, samples) in deep_frame()) {
            let raw = RawFrame::from_samples(&samples, w, h, depth, 1);
            let frame = normalize(raw).unwrap();

            prop_assert_eq!(frame.pixels().len(), (w * h) as usize);
            for (out, v) in frame.pixels().iter().zip(&samples) {
                prop_assert_eq!(u32::from(*out), u32::from(*v) / (1u32 << (depth - 8)));
            }
        }

        #[test]
        fn prop_eight_bit_identity(w in 1u32..16, h in 1u32..16, seed in any::<u8>()) {
            let data: Vec<u8> = (0..w * h).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect();
            let raw = RawFrame::new(data.clone(), w, h, 8, PixelLayout::Mono, 1);

            let frame = normalize(raw).unwrap();
            prop_assert_eq!(frame.pixels(), &data[..]);
        }

        #[test]
        fn prop_normalize_is_deterministic((depth, w, h, samples) in deep_frame()) {
            let a = normalize(RawFrame::from_samples(&samples, w, h, depth, 1)).unwrap();
            let b = normalize(RawFrame::from_samples(&samples, w, h, depth, 1)).unwrap();
            prop_assert_eq!(a.pixels(), b.pixels());
        }
    }
}
