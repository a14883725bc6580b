//! RGBA resampling on top of `fast_image_resize`, used to apply a sample size after decode.

use anyhow::{anyhow, ensure};
use fast_image_resize as fir;

use crate::types::ImageDimensions;

use super::Result;
use super::sample::sampled_dimensions;

/// Filtering kernels supported by the resizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
    /// Point sampling, closest to what a subsampling decoder does.
    Nearest,
    /// Area averaging; the default for power-of-two reductions.
    #[default]
    Box,
    Bilinear,
    /// Lanczos3 for high quality arbitrary scaling.
    Lanczos3,
}

impl From<ResizeFilter> for fir::ResizeAlg {
    fn from(value: ResizeFilter) -> Self {
        use fir::FilterType;
        match value {
            ResizeFilter::Nearest => fir::ResizeAlg::Nearest,
            ResizeFilter::Box => fir::ResizeAlg::Convolution(FilterType::Box),
            ResizeFilter::Bilinear => fir::ResizeAlg::Convolution(FilterType::Bilinear),
            ResizeFilter::Lanczos3 => fir::ResizeAlg::Convolution(FilterType::Lanczos3),
        }
    }
}

/// Straight-alpha RGBA8888 pixels, row-major from the top-left corner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub dimensions: ImageDimensions,
    pub pixels: Vec<u8>,
}

impl RgbaFrame {
    pub fn new(dimensions: ImageDimensions, pixels: Vec<u8>) -> Self {
        Self { dimensions, pixels }
    }

    pub fn width(&self) -> u32 {
        self.dimensions.width
    }

    pub fn height(&self) -> u32 {
        self.dimensions.height
    }
}

/// Resize `source` to `target` with the given kernel.
pub fn resize_rgba(
    source: &RgbaFrame,
    target: ImageDimensions,
    filter: ResizeFilter,
) -> Result<RgbaFrame> {
    ensure!(source.width() > 0 && source.height() > 0, "source image has zero dimensions");
    ensure!(target.width > 0 && target.height > 0, "target dimensions must be non-zero");

    if source.dimensions == target {
        return Ok(source.clone());
    }

    ensure!(
        source.pixels.len() >= source.dimensions.pixel_count() * 4,
        "source buffer is smaller than expected"
    );

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        &source.pixels,
        fir::PixelType::U8x4,
    )
    .map_err(|err| anyhow!("failed to prepare source image: {err}"))?;

    let mut dst_image = fir::images::Image::new(target.width, target.height, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new().resize_alg(filter.into()).use_alpha(true);

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| anyhow!("fast image resize failed: {err}"))?;

    Ok(RgbaFrame { dimensions: target, pixels: dst_image.into_vec() })
}

/// Reduce both sides by `sample_size` (integer division, at least one pixel).
pub fn subsample(source: RgbaFrame, sample_size: u32, filter: ResizeFilter) -> Result<RgbaFrame> {
    if sample_size <= 1 {
        return Ok(source);
    }
    let target = sampled_dimensions(source.dimensions, sample_size);
    resize_rgba(&source, target, filter)
}
