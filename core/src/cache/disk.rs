//! Disk-backed fallback tier for decoded bitmaps.
//!
//! Each bitmap is stored as a PNG under `<root>/<aa>/<bb>/<rest>.png`, where the segments come
//! from the blake3 hash of the key. The tier is only consulted after the memory cache misses.

use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use image::{ImageFormat, RgbaImage};
use tempfile::NamedTempFile;

use crate::bitmap::Bitmap;
use crate::types::ImageKey;

use super::Result;

/// Hex characters per directory level.
const SEGMENT: usize = 2;

#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating disk tier at {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &ImageKey) -> PathBuf {
        let digest = blake3::hash(key.as_str().as_bytes()).to_hex();
        let digest = digest.as_str();
        self.dir
            .join(&digest[..SEGMENT])
            .join(&digest[SEGMENT..SEGMENT * 2])
            .join(format!("{}.png", &digest[SEGMENT * 2..]))
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Encoded bytes stored for `key`; `None` when nothing was written.
    pub fn read(&self, key: &ImageKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        missing_as_none(std::fs::read(&path))
            .with_context(|| format!("reading disk entry {}", path.display()))
    }

    /// Persist `bitmap` as PNG. Returns the file written.
    pub fn write_bitmap(&self, key: &ImageKey, bitmap: &Bitmap) -> Result<PathBuf> {
        let size = bitmap.dimensions();
        let rgba = bitmap
            .to_rgba8()
            .ok_or_else(|| anyhow!("bitmap for {:?} was recycled", key.as_str()))?;
        let image = RgbaImage::from_raw(size.width, size.height, rgba)
            .ok_or_else(|| anyhow!("bitmap for {:?} has a short pixel buffer", key.as_str()))?;

        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png).context("encoding png")?;

        let path = self.path_for(key);
        atomic_write(&path, png.get_ref())?;
        Ok(path)
    }

    /// Delete the entry for `key`. Deleting a missing entry succeeds.
    pub fn remove(&self, key: &ImageKey) -> Result<()> {
        let path = self.path_for(key);
        missing_as_none(std::fs::remove_file(&path))
            .with_context(|| format!("removing disk entry {}", path.display()))?;
        Ok(())
    }
}

fn missing_as_none<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Write through a sibling temp file so readers never observe a partial PNG.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let shard = path
        .parent()
        .ok_or_else(|| anyhow!("disk entry {} has no parent directory", path.display()))?;
    std::fs::create_dir_all(shard).with_context(|| format!("creating shard {}", shard.display()))?;

    let mut staged = NamedTempFile::new_in(shard)
        .with_context(|| format!("staging write in {}", shard.display()))?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.flush())
        .with_context(|| format!("writing {}", path.display()))?;
    staged
        .persist(path)
        .map_err(|err| anyhow!(err.error))
        .with_context(|| format!("committing {}", path.display()))?;
    Ok(())
}
