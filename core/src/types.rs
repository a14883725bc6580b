//! Shared data structures exchanged between the cache, the reuse pool, and the decoder.

use serde::{Deserialize, Serialize};

/// Identifier of a cached image. Unique per cached bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub cache_key: String,
}

impl ImageKey {
    pub fn new(cache_key: impl Into<String>) -> Self {
        Self { cache_key: cache_key.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.cache_key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True when both sides fit inside `bounds`.
    pub fn fits_within(self, bounds: ImageDimensions) -> bool {
        self.width <= bounds.width && self.height <= bounds.height
    }
}

/// In-memory pixel layout of a decoded bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8 bits per channel, alpha included.
    Argb8888,
    /// Packed 5-6-5 RGB without alpha.
    Rgb565,
    /// Single alpha channel.
    Alpha8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Argb8888 => 4,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Alpha8 => 1,
        }
    }

    pub fn has_alpha(self) -> bool {
        !matches!(self, PixelFormat::Rgb565)
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::Argb8888
    }
}

/// Total byte budget of the in-memory cache, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheBudget {
    pub bytes_max: usize,
}

impl CacheBudget {
    pub fn new(bytes_max: usize) -> Self {
        Self { bytes_max }
    }

    /// One eighth of the process memory class, expressed in megabytes.
    ///
    /// The division happens on whole megabytes, so classes below 8 MB yield an empty budget.
    pub fn from_memory_class(memory_class_mb: usize) -> Self {
        Self { bytes_max: memory_class_mb / 8 * 1024 * 1024 }
    }
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self { bytes_max: 64 * 1024 * 1024 }
    }
}

/// Decode-reuse contract offered by the platform decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseContract {
    /// Buffer reuse is not available at all.
    Unsupported,
    /// Reuse requires identical dimensions and no subsampling.
    Strict,
    /// Any stored buffer with enough allocated bytes may host the decode.
    Capacity,
}

impl ReuseContract {
    /// Map a platform API level onto the contract it implements.
    pub fn from_platform_level(level: u32) -> Self {
        match level {
            0..=10 => ReuseContract::Unsupported,
            11..=18 => ReuseContract::Strict,
            _ => ReuseContract::Capacity,
        }
    }

    pub fn is_enabled(self) -> bool {
        !matches!(self, ReuseContract::Unsupported)
    }
}

impl Default for ReuseContract {
    fn default() -> Self {
        Self::Capacity
    }
}
