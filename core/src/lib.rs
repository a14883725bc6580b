//! Bounded bitmap cache with eviction-fed buffer reuse.

#![deny(missing_debug_implementations)]

pub mod bitmap;
pub mod cache;
pub mod codec;
pub mod config;
pub mod log;
pub mod pipeline;
pub mod stats;
pub mod types;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

pub use bitmap::{Bitmap, BitmapId};
pub use cache::{BitmapCache, LoadRequest};
pub use codec::{DecodeError, DecodeOptions, Decoded, ImageDecoder, RasterDecoder};
pub use config::CacheConfig;
pub use pipeline::compute_downsample;
pub use types::{CacheBudget, ImageDimensions, ImageKey, PixelFormat, ReuseContract};

/// Returns the version of the core crate for telemetry and debugging.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
