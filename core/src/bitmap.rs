//! Decoded bitmap buffers with explicitly releasable pixel storage.
//!
//! A [`Bitmap`] is shared as `Arc<Bitmap>`. Its pixel storage stands in for memory the
//! allocator does not reclaim on its own: it is released either explicitly through
//! [`Bitmap::recycle`] or, for bitmaps parked in the reuse pool, by the reclamation monitor
//! once the last strong handle goes away.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;

use anyhow::ensure;
use parking_lot::Mutex;
use tracing::trace;

use crate::cache::monitor::{ReclaimEvent, ReclaimTicket};
use crate::types::{ImageDimensions, PixelFormat};

static NEXT_BITMAP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a bitmap allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitmapId(u64);

impl BitmapId {
    fn next() -> Self {
        Self(NEXT_BITMAP_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Layout {
    dimensions: ImageDimensions,
    format: PixelFormat,
    pixels: Option<Vec<u8>>,
}

/// Pixel buffer produced by the decoder and held by the cache.
pub struct Bitmap {
    id: BitmapId,
    mutable: bool,
    allocation_bytes: usize,
    layout: Mutex<Layout>,
    notifier: Mutex<Option<Sender<ReclaimEvent>>>,
}

impl Bitmap {
    /// Allocate a zero-filled bitmap.
    pub fn new(dimensions: ImageDimensions, format: PixelFormat, mutable: bool) -> Self {
        let len = dimensions.pixel_count() * format.bytes_per_pixel();
        Self::with_storage(dimensions, format, vec![0; len], mutable)
    }

    /// Wrap already packed pixels. The slice length must match the layout exactly.
    pub fn from_pixels(
        dimensions: ImageDimensions,
        format: PixelFormat,
        pixels: Vec<u8>,
        mutable: bool,
    ) -> crate::Result<Self> {
        let expected = dimensions.pixel_count() * format.bytes_per_pixel();
        ensure!(
            pixels.len() == expected,
            "pixel buffer holds {} bytes but {}x{} {:?} needs {expected}",
            pixels.len(),
            dimensions.width,
            dimensions.height,
            format
        );
        Ok(Self::with_storage(dimensions, format, pixels, mutable))
    }

    fn with_storage(
        dimensions: ImageDimensions,
        format: PixelFormat,
        pixels: Vec<u8>,
        mutable: bool,
    ) -> Self {
        Self {
            id: BitmapId::next(),
            mutable,
            allocation_bytes: pixels.len(),
            layout: Mutex::new(Layout { dimensions, format, pixels: Some(pixels) }),
            notifier: Mutex::new(None),
        }
    }

    pub fn id(&self) -> BitmapId {
        self.id
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.layout.lock().dimensions
    }

    pub fn width(&self) -> u32 {
        self.dimensions().width
    }

    pub fn height(&self) -> u32 {
        self.dimensions().height
    }

    pub fn format(&self) -> PixelFormat {
        self.layout.lock().format
    }

    /// Bytes needed by the current configuration.
    pub fn byte_count(&self) -> usize {
        let layout = self.layout.lock();
        layout.dimensions.pixel_count() * layout.format.bytes_per_pixel()
    }

    /// Bytes reserved for the pixel storage. Never shrinks when the bitmap is reconfigured.
    pub fn allocation_byte_count(&self) -> usize {
        self.allocation_bytes
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn is_recycled(&self) -> bool {
        self.layout.lock().pixels.is_none()
    }

    /// Release the pixel storage. Returns `false` when it was already released.
    pub fn recycle(&self) -> bool {
        let released = self.layout.lock().pixels.take();
        match released {
            Some(storage) => {
                trace!(target: "bitmap", id = self.id.0, bytes = storage.len(), "recycled");
                true
            }
            None => false,
        }
    }

    /// Run `f` over the packed pixels, or return `None` once recycled.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let layout = self.layout.lock();
        layout.pixels.as_ref().map(|pixels| {
            let used = layout.dimensions.pixel_count() * layout.format.bytes_per_pixel();
            f(&pixels[..used])
        })
    }

    /// Expand the current pixels to straight RGBA8888.
    pub fn to_rgba8(&self) -> Option<Vec<u8>> {
        let format = self.format();
        self.with_pixels(|pixels| unpack_to_rgba(pixels, format))
    }

    /// Overwrite the storage in place with a new configuration.
    ///
    /// Fails when the bitmap is immutable, recycled, or the new pixels exceed the allocation.
    pub fn reconfigure(
        &self,
        dimensions: ImageDimensions,
        format: PixelFormat,
        pixels: &[u8],
    ) -> bool {
        if !self.mutable || pixels.len() > self.allocation_bytes {
            return false;
        }
        if pixels.len() != dimensions.pixel_count() * format.bytes_per_pixel() {
            return false;
        }

        let mut layout = self.layout.lock();
        let Some(storage) = layout.pixels.as_mut() else {
            return false;
        };
        storage.clear();
        storage.extend_from_slice(pixels);
        layout.dimensions = dimensions;
        layout.format = format;
        true
    }

    /// Deliver the storage to the reclamation monitor when the last strong handle drops.
    pub(crate) fn arm_reclaim(&self, notifier: Sender<ReclaimEvent>) {
        *self.notifier.lock() = Some(notifier);
    }

    pub(crate) fn disarm_reclaim(&self) {
        self.notifier.lock().take();
    }
}

impl Drop for Bitmap {
    fn drop(&mut self) {
        let Some(notifier) = self.notifier.get_mut().take() else {
            return;
        };
        let storage = self.layout.get_mut().pixels.take();
        let ticket = ReclaimTicket::new(self.id, storage);
        if notifier.send(ReclaimEvent::Reclaim(ticket)).is_err() {
            // Monitor is gone; the returned ticket is dropped here and frees the storage.
            trace!(target: "bitmap", id = self.id.0, "reclaim notification undeliverable");
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = self.layout.lock();
        f.debug_struct("Bitmap")
            .field("id", &self.id)
            .field("dimensions", &layout.dimensions)
            .field("format", &layout.format)
            .field("allocation_bytes", &self.allocation_bytes)
            .field("mutable", &self.mutable)
            .field("recycled", &layout.pixels.is_none())
            .finish()
    }
}

/// Pack straight RGBA8888 pixels into `format`.
pub fn pack_rgba(rgba: &[u8], format: PixelFormat) -> Vec<u8> {
    match format {
        PixelFormat::Argb8888 => rgba.to_vec(),
        PixelFormat::Rgb565 => {
            let mut out = Vec::with_capacity(rgba.len() / 2);
            for px in rgba.chunks_exact(4) {
                let r = u16::from(px[0] >> 3);
                let g = u16::from(px[1] >> 2);
                let b = u16::from(px[2] >> 3);
                out.extend_from_slice(&((r << 11) | (g << 5) | b).to_le_bytes());
            }
            out
        }
        PixelFormat::Alpha8 => rgba.chunks_exact(4).map(|px| px[3]).collect(),
    }
}

/// Inverse of [`pack_rgba`], up to the precision `format` keeps.
pub fn unpack_to_rgba(pixels: &[u8], format: PixelFormat) -> Vec<u8> {
    match format {
        PixelFormat::Argb8888 => pixels.to_vec(),
        PixelFormat::Rgb565 => {
            let mut out = Vec::with_capacity(pixels.len() * 2);
            for px in pixels.chunks_exact(2) {
                let value = u16::from_le_bytes([px[0], px[1]]);
                let r = ((value >> 11) & 0x1F) as u8;
                let g = ((value >> 5) & 0x3F) as u8;
                let b = (value & 0x1F) as u8;
                out.extend_from_slice(&[
                    (r << 3) | (r >> 2),
                    (g << 2) | (g >> 4),
                    (b << 3) | (b >> 2),
                    255,
                ]);
            }
            out
        }
        PixelFormat::Alpha8 => pixels.iter().flat_map(|&a| [0, 0, 0, a]).collect(),
    }
}
