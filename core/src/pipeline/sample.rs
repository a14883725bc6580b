//! Downsample planning: how much to subsample a source before decoding it.

use tracing::debug;

use crate::codec::DecodeOptions;
use crate::types::{ImageDimensions, PixelFormat};

/// Largest factor produced; keeps the doubling loop bounded for degenerate targets.
const MAX_SAMPLE_SIZE: u32 = 1 << 31;

/// Decode configuration derived from source bounds and a target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownsamplePlan {
    pub sample_size: u32,
    pub preferred_format: PixelFormat,
    pub options: DecodeOptions,
}

impl DownsamplePlan {
    /// Dimensions the decoder will produce for `source` under this plan.
    pub fn output_dimensions(&self, source: ImageDimensions) -> ImageDimensions {
        sampled_dimensions(source, self.sample_size)
    }
}

/// Smallest power-of-two factor that fits `source` into the `max` box.
///
/// Returns 1 when the source already fits. Both sides are divided by the same factor.
pub fn compute_downsample(
    source_width: u32,
    source_height: u32,
    max_width: u32,
    max_height: u32,
) -> u32 {
    let source = ImageDimensions::new(source_width, source_height);
    if source.fits_within(ImageDimensions::new(max_width, max_height)) {
        return 1;
    }

    let mut sample_size = 1u32;
    while source_width / sample_size > max_width || source_height / sample_size > max_height {
        if sample_size >= MAX_SAMPLE_SIZE {
            break;
        }
        sample_size *= 2;
    }
    sample_size
}

/// Two bytes per pixel are enough when no alpha channel is needed.
pub fn preferred_format(has_alpha: bool) -> PixelFormat {
    if has_alpha { PixelFormat::Argb8888 } else { PixelFormat::Rgb565 }
}

/// Plan a decode of `bounds` into the `max` box.
pub fn plan_decode(
    bounds: ImageDimensions,
    max: ImageDimensions,
    has_alpha: bool,
) -> DownsamplePlan {
    let sample_size = compute_downsample(bounds.width, bounds.height, max.width, max.height);
    let preferred_format = preferred_format(has_alpha);
    if sample_size > 1 {
        debug!(
            target: "pipeline::sample",
            width = bounds.width,
            height = bounds.height,
            sample_size,
            "downsampling source"
        );
    }

    DownsamplePlan {
        sample_size,
        preferred_format,
        options: DecodeOptions { sample_size, preferred_format, mutable: true },
    }
}

/// Dimensions after integer subsampling, never below one pixel.
pub fn sampled_dimensions(source: ImageDimensions, sample_size: u32) -> ImageDimensions {
    let sample = sample_size.max(1);
    ImageDimensions {
        width: (source.width / sample).max(1),
        height: (source.height / sample).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitting_source_is_not_sampled() {
        assert_eq!(compute_downsample(100, 100, 200, 200), 1);
        assert_eq!(compute_downsample(200, 200, 200, 200), 1);
    }

    #[test]
    fn picks_first_power_of_two_satisfying_both_sides() {
        // 1000 / 4 = 250 still exceeds 200; 1000 / 8 = 125 fits.
        assert_eq!(compute_downsample(1000, 500, 200, 200), 8);
        assert_eq!(compute_downsample(400, 100, 200, 200), 2);
        assert_eq!(compute_downsample(100, 1000, 200, 200), 8);
    }

    #[test]
    fn zero_target_terminates() {
        assert_eq!(compute_downsample(5, 5, 0, 0), 8);
        assert_eq!(compute_downsample(u32::MAX, 1, 0, 0), MAX_SAMPLE_SIZE);
    }

    #[test]
    fn alpha_selects_format() {
        assert_eq!(preferred_format(true), PixelFormat::Argb8888);
        assert_eq!(preferred_format(false), PixelFormat::Rgb565);
    }

    #[test]
    fn plan_carries_decode_options() {
        let plan =
            plan_decode(ImageDimensions::new(1000, 500), ImageDimensions::new(200, 200), false);
        assert_eq!(plan.sample_size, 8);
        assert_eq!(plan.options.sample_size, 8);
        assert_eq!(plan.options.preferred_format, PixelFormat::Rgb565);
        assert!(plan.options.mutable);
        assert_eq!(
            plan.output_dimensions(ImageDimensions::new(1000, 500)),
            ImageDimensions::new(125, 62)
        );
    }
}
