//! Raster decoder built on the `image` crate.
//!
//! Decodes JPEG, PNG, WebP, and GIF (first frame), applies EXIF orientation, subsamples by
//! the requested factor, and packs the result into the requested [`PixelFormat`]. When a
//! compatible reuse target is offered, the pixels are written into its existing storage and
//! its stored format takes precedence over the requested one.

use std::io::Cursor;
use std::sync::Arc;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder as _, ImageReader};
use tracing::{debug, trace};

use crate::bitmap::{Bitmap, pack_rgba};
use crate::cache::pool::{ReuseCandidate, ReuseRequest, can_reuse};
use crate::pipeline::resize::{ResizeFilter, RgbaFrame, subsample};
use crate::types::{ImageDimensions, PixelFormat, ReuseContract};

use super::{DecodeError, DecodeOptions, Decoded, ImageDecoder};

/// Default [`ImageDecoder`] implementation.
#[derive(Debug, Clone, Copy)]
pub struct RasterDecoder {
    contract: ReuseContract,
    filter: ResizeFilter,
}

impl RasterDecoder {
    /// Decoder honouring reuse targets according to `contract`.
    pub fn new(contract: ReuseContract) -> Self {
        Self { contract, filter: ResizeFilter::default() }
    }

    fn decode_rgba(&self, data: &[u8]) -> Result<RgbaFrame, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::EmptyInput);
        }

        let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
        let mut decoder = reader.into_decoder()?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

        let mut image = DynamicImage::from_decoder(decoder)?;
        if orientation != Orientation::NoTransforms {
            image.apply_orientation(orientation);
        }

        let rgba = image.into_rgba8();
        let dimensions = ImageDimensions::new(rgba.width(), rgba.height());
        if dimensions.width == 0 || dimensions.height == 0 {
            return Err(DecodeError::ZeroDimensions);
        }
        Ok(RgbaFrame::new(dimensions, rgba.into_raw()))
    }

    /// Write `frame` into `target` when the contract and its allocation allow it.
    fn write_into(
        &self,
        target: &Bitmap,
        source: ImageDimensions,
        frame: &RgbaFrame,
        sample_size: u32,
    ) -> bool {
        if !target.is_mutable() || target.is_recycled() {
            return false;
        }
        let candidate = ReuseCandidate::of(target);
        let request = ReuseRequest::new(source.width, source.height, sample_size);
        if !can_reuse(self.contract, &candidate, &request) {
            return false;
        }
        let packed = pack_rgba(&frame.pixels, candidate.format);
        target.reconfigure(frame.dimensions, candidate.format, &packed)
    }
}

impl Default for RasterDecoder {
    fn default() -> Self {
        Self::new(ReuseContract::default())
    }
}

impl ImageDecoder for RasterDecoder {
    fn probe_bounds(&self, data: &[u8]) -> Result<ImageDimensions, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::EmptyInput);
        }
        let (width, height) =
            ImageReader::new(Cursor::new(data)).with_guessed_format()?.into_dimensions()?;
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroDimensions);
        }
        Ok(ImageDimensions::new(width, height))
    }

    fn decode(
        &self,
        data: &[u8],
        options: &DecodeOptions,
        reuse: Option<&Arc<Bitmap>>,
    ) -> Result<Decoded, DecodeError> {
        if options.preferred_format == PixelFormat::Alpha8 {
            return Err(DecodeError::UnsupportedFormat(options.preferred_format));
        }

        let full = self.decode_rgba(data)?;
        let source = full.dimensions;
        let frame = subsample(full, options.sample_size, self.filter)
            .map_err(|err| DecodeError::Resize(err.to_string()))?;

        if let Some(target) = reuse {
            if self.write_into(target, source, &frame, options.sample_size) {
                trace!(target: "codec::image", id = target.id().as_u64(), "decoded into target");
                return Ok(Decoded { bitmap: Arc::clone(target), reused: true });
            }
            debug!(
                target: "codec::image",
                id = target.id().as_u64(),
                width = frame.width(),
                height = frame.height(),
                "reuse target incompatible, allocating"
            );
        }

        let packed = pack_rgba(&frame.pixels, options.preferred_format);
        let bitmap =
            Bitmap::from_pixels(frame.dimensions, options.preferred_format, packed, options.mutable)
                .map_err(|err| DecodeError::Buffer(err.to_string()))?;
        Ok(Decoded { bitmap: Arc::new(bitmap), reused: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgba};

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 0, 255])
        });
        let dynamic = DynamicImage::ImageRgba8(image);
        // The JPEG encoder only takes opaque layouts.
        let dynamic = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(dynamic.to_rgb8()),
            _ => dynamic,
        };
        let mut cursor = Cursor::new(Vec::new());
        dynamic.write_to(&mut cursor, format).expect("encode sample");
        cursor.into_inner()
    }

    fn target_bitmap(width: u32, height: u32) -> Arc<Bitmap> {
        Arc::new(Bitmap::new(ImageDimensions::new(width, height), PixelFormat::Argb8888, true))
    }

    fn options(sample_size: u32, preferred_format: PixelFormat) -> DecodeOptions {
        DecodeOptions { sample_size, preferred_format, mutable: true }
    }

    #[test]
    fn probes_bounds_without_decoding() {
        let decoder = RasterDecoder::default();
        let bytes = encode(40, 24, ImageFormat::Png);
        assert_eq!(decoder.probe_bounds(&bytes).unwrap(), ImageDimensions::new(40, 24));
    }

    #[test]
    fn decodes_subsampled_rgb565() {
        let decoder = RasterDecoder::default();
        let bytes = encode(40, 24, ImageFormat::Png);
        let decoded = decoder.decode(&bytes, &options(4, PixelFormat::Rgb565), None).unwrap();

        assert!(!decoded.reused);
        assert_eq!(decoded.bitmap.dimensions(), ImageDimensions::new(10, 6));
        assert_eq!(decoded.bitmap.format(), PixelFormat::Rgb565);
        assert_eq!(decoded.bitmap.byte_count(), 10 * 6 * 2);
        assert!(decoded.bitmap.is_mutable());
    }

    #[test]
    fn decodes_jpeg_and_webp() {
        let decoder = RasterDecoder::default();
        for format in [ImageFormat::Jpeg, ImageFormat::WebP, ImageFormat::Gif] {
            let bytes = encode(8, 8, format);
            let decoded =
                decoder.decode(&bytes, &options(1, PixelFormat::Argb8888), None).unwrap();
            assert_eq!(decoded.bitmap.dimensions(), ImageDimensions::new(8, 8));
        }
    }

    #[test]
    fn compatible_target_is_reused_with_its_own_format() {
        let decoder = RasterDecoder::new(ReuseContract::Capacity);
        let target = target_bitmap(20, 20);
        let bytes = encode(20, 12, ImageFormat::Png);

        let decoded =
            decoder.decode(&bytes, &options(1, PixelFormat::Rgb565), Some(&target)).unwrap();
        assert!(decoded.reused);
        assert!(Arc::ptr_eq(&decoded.bitmap, &target));
        assert_eq!(target.dimensions(), ImageDimensions::new(20, 12));
        assert_eq!(target.format(), PixelFormat::Argb8888);
        assert_eq!(target.allocation_byte_count(), 20 * 20 * 4);
    }

    #[test]
    fn incompatible_target_falls_back_to_fresh_allocation() {
        let decoder = RasterDecoder::new(ReuseContract::Capacity);
        let target = target_bitmap(4, 4);
        let bytes = encode(32, 32, ImageFormat::Png);

        let decoded =
            decoder.decode(&bytes, &options(1, PixelFormat::Argb8888), Some(&target)).unwrap();
        assert!(!decoded.reused);
        assert!(!Arc::ptr_eq(&decoded.bitmap, &target));
        assert_eq!(target.dimensions(), ImageDimensions::new(4, 4));
    }

    #[test]
    fn strict_contract_refuses_sampled_reuse() {
        let decoder = RasterDecoder::new(ReuseContract::Strict);
        let target = target_bitmap(64, 64);
        let bytes = encode(16, 16, ImageFormat::Png);

        let decoded =
            decoder.decode(&bytes, &options(2, PixelFormat::Argb8888), Some(&target)).unwrap();
        assert!(!decoded.reused);
    }

    #[test]
    fn malformed_and_empty_input_fail() {
        let decoder = RasterDecoder::default();
        assert!(matches!(
            decoder.decode(&[], &options(1, PixelFormat::Argb8888), None),
            Err(DecodeError::EmptyInput)
        ));
        assert!(matches!(
            decoder.decode(b"not an image", &options(1, PixelFormat::Argb8888), None),
            Err(DecodeError::Malformed(_))
        ));
    }
}
