//! Decoder boundary: the trait the cache decodes through, and its raster implementation.

pub mod image;

use std::sync::Arc;

use thiserror::Error;

use crate::bitmap::Bitmap;
use crate::types::{ImageDimensions, PixelFormat};

pub use self::image::RasterDecoder;

pub type Result<T> = crate::Result<T>;

/// Parameters handed to [`ImageDecoder::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Power-of-two divisor applied to both sides.
    pub sample_size: u32,
    /// Requested layout; a reused target keeps its own.
    pub preferred_format: PixelFormat,
    /// Whether freshly allocated bitmaps may later host other decodes.
    pub mutable: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { sample_size: 1, preferred_format: PixelFormat::Argb8888, mutable: true }
    }
}

/// Output of a decode.
#[derive(Debug)]
pub struct Decoded {
    pub bitmap: Arc<Bitmap>,
    /// True when the pixels were written into the offered reuse target.
    pub reused: bool,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty image data")]
    EmptyInput,
    #[error("malformed image data: {0}")]
    Malformed(#[from] ::image::ImageError),
    #[error("reading image data: {0}")]
    Io(#[from] std::io::Error),
    #[error("image has zero dimensions")]
    ZeroDimensions,
    #[error("decoder cannot produce {0:?} pixels")]
    UnsupportedFormat(PixelFormat),
    #[error("resampling failed: {0}")]
    Resize(String),
    #[error("invalid pixel buffer: {0}")]
    Buffer(String),
}

/// Image decoder consumed by the cache.
///
/// Implementations may ignore an incompatible reuse target; they must then allocate a fresh
/// bitmap and report `reused == false`. The target stays owned by the caller either way.
pub trait ImageDecoder: Send + Sync + std::fmt::Debug {
    /// Read the source dimensions without decoding pixels.
    fn probe_bounds(&self, data: &[u8]) -> std::result::Result<ImageDimensions, DecodeError>;

    fn decode(
        &self,
        data: &[u8],
        options: &DecodeOptions,
        reuse: Option<&Arc<Bitmap>>,
    ) -> std::result::Result<Decoded, DecodeError>;
}
