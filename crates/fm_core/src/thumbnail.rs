//! Thumbnail cache
//!
//! Thumbnails live under their own root, at the same virtual path as the
//! source image. They are created on first request and moved or removed
//! together with their source. A thumbnail older than its source is
//! regenerated on the next request.

use crate::config::FmConfig;
use crate::policy::ExtensionSet;
use crate::{FmError, Result};
use fm_fs::{FsError, LocalStorage, Storage, VirtualPath};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::PathBuf;
use std::time::SystemTime;

/// A persisted thumbnail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailHandle {
    pub path: VirtualPath,
    pub real_path: PathBuf,
    pub size: u64,
}

#[derive(Debug)]
pub struct ThumbnailCache {
    store: LocalStorage,
    images: ExtensionSet,
    max_width: u32,
    max_height: u32,
}

impl ThumbnailCache {
    /// Open the thumbnail root (created if missing)
    pub fn open(config: &FmConfig) -> Result<Self> {
        let store = LocalStorage::open(config.thumbnail_root())?;
        let thumbnail = &config.images.thumbnail;

        Ok(Self {
            store,
            images: ExtensionSet::new(&config.images.extensions),
            max_width: thumbnail.max_width.max(1),
            max_height: thumbnail.max_height.max(1),
        })
    }

    pub fn root(&self) -> &std::path::Path {
        self.store.root()
    }

    /// Up-to-date thumbnail, generated on demand when `create` is set
    ///
    /// Generation failures are logged and reported as `None`.
    pub fn get<S: Storage + ?Sized>(
        &self,
        source: &S,
        path: &VirtualPath,
        create: bool,
    ) -> Option<ThumbnailHandle> {
        let name = path.name()?;
        if path.is_dir() || !self.images.contains_name(name) {
            return None;
        }

        if let Ok(stat) = self.store.read_entry(path) {
            if !stat.is_dir {
                let source_modified = source.read_entry(path).ok().and_then(|s| s.modified);
                if !is_stale(stat.modified, source_modified) {
                    return Some(self.handle(path, stat.len));
                }
                tracing::debug!("Stale thumbnail: {}", path);
            }
        }

        if !create {
            return None;
        }

        match self.generate(source, path) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Thumbnail generation failed for {}: {}", path, e);
                None
            }
        }
    }

    pub fn read(&self, handle: &ThumbnailHandle) -> Result<Vec<u8>> {
        Ok(self.store.read_bytes(&handle.path)?)
    }

    fn generate<S: Storage + ?Sized>(
        &self,
        source: &S,
        path: &VirtualPath,
    ) -> Result<ThumbnailHandle> {
        let stat = source.read_entry(path)?;
        if stat.is_dir || !stat.readable || stat.len == 0 {
            return Err(FmError::Server(format!("Not a readable image: {}", path)));
        }

        let data = self.render(source, path)?;

        if let Some(parent) = path.parent() {
            self.ensure_dir(&parent)?;
        }
        self.store.write_entry(path, &data)?;

        tracing::debug!("Generated thumbnail: {} ({} bytes)", path, data.len());
        Ok(self.handle(path, data.len() as u64))
    }

    /// Scale the source image without persisting it
    pub fn render<S: Storage + ?Sized>(&self, source: &S, path: &VirtualPath) -> Result<Vec<u8>> {
        let reader = ImageReader::new(source.open_entry(path)?).with_guessed_format()?;
        let format = reader.format().unwrap_or(ImageFormat::Png);
        let image = reader.decode()?;

        let (width, height) =
            fit_to_width(image.width(), image.height(), self.max_width, self.max_height);

        let scaled = if (width, height) == (image.width(), image.height()) {
            image
        } else {
            image.resize_exact(width, height, FilterType::Lanczos3)
        };

        // JPEG has no alpha channel
        let scaled = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(scaled.to_rgb8()),
            _ => DynamicImage::ImageRgba8(scaled.to_rgba8()),
        };

        let mut buffer = Cursor::new(Vec::new());
        scaled.write_to(&mut buffer, format)?;
        Ok(buffer.into_inner())
    }

    /// Follow a move or rename of the source (file or directory)
    pub fn relocate(&self, from: &VirtualPath, to: &VirtualPath) -> Result<()> {
        if !self.store.exists(from) {
            return Ok(());
        }

        if let Some(parent) = to.parent() {
            self.ensure_dir(&parent)?;
        }
        if self.store.exists(to) {
            self.store.delete_entry(to)?;
        }

        self.store.move_entry(from, to)?;
        tracing::debug!("Relocated thumbnail: {} -> {}", from, to);
        Ok(())
    }

    /// Remove the thumbnail (or thumbnail subtree) of `path`
    pub fn purge(&self, path: &VirtualPath) -> Result<()> {
        if path.is_root() {
            return Ok(());
        }

        match self.store.delete_entry(path) {
            Ok(()) => {
                tracing::debug!("Purged thumbnail: {}", path);
                Ok(())
            }
            Err(FsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, path: &VirtualPath) -> bool {
        self.store.exists(path)
    }

    fn ensure_dir(&self, dir: &VirtualPath) -> Result<()> {
        if dir.is_root() || self.store.exists(dir) {
            return Ok(());
        }

        match self.store.create_dir(dir) {
            Ok(()) | Err(FsError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn handle(&self, path: &VirtualPath, size: u64) -> ThumbnailHandle {
        ThumbnailHandle {
            path: path.clone(),
            real_path: self.store.resolve(path),
            size,
        }
    }
}

fn is_stale(thumbnail: Option<SystemTime>, source: Option<SystemTime>) -> bool {
    matches!((thumbnail, source), (Some(thumbnail), Some(source)) if source > thumbnail)
}

/// Target size: width set to `max_width` with the aspect ratio kept, unless the
/// height would then exceed `max_height`. Images already inside the box are kept.
pub fn fit_to_width(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return (width, height);
    }

    let scale = |value: u32, numerator: u32, denominator: u32| -> u32 {
        let scaled = (value as u64 * numerator as u64 + denominator as u64 / 2) / denominator as u64;
        scaled.clamp(1, u32::MAX as u64) as u32
    };

    let new_height = scale(height, max_width, width);
    if new_height <= max_height {
        (max_width, new_height)
    } else {
        (scale(width, max_height, height), max_height)
    }
}
