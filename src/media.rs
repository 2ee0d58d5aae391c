//! Thumbnail generation and image metadata extraction.
//!
//! Both capabilities sit behind traits so ingestion tests can substitute
//! stubs without touching real image files. The production implementations
//! use the `image` crate and run their decode work on the blocking pool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::models::ImageMeta;

#[async_trait]
pub trait Thumbnailer: Send + Sync {
    /// Produce a thumbnail for `source`, returning its path relative to the
    /// data root (e.g. `thumbnails/<hash>.jpg`).
    async fn create_thumbnail(&self, source: &Path, file_hash: &str) -> Result<String>;
}

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Read pixel dimensions without decoding the full image.
    async fn extract(&self, source: &Path) -> Result<ImageMeta>;
}

/// Writes JPEG thumbnails named by content hash, so the same file under two
/// paths shares one thumbnail.
pub struct ImageThumbnailer {
    thumbnails_dir: PathBuf,
    size: u32,
}

impl ImageThumbnailer {
    pub fn new(thumbnails_dir: PathBuf, size: u32) -> Self {
        Self {
            thumbnails_dir,
            size,
        }
    }
}

#[async_trait]
impl Thumbnailer for ImageThumbnailer {
    async fn create_thumbnail(&self, source: &Path, file_hash: &str) -> Result<String> {
        let source = source.to_path_buf();
        let dest_dir = self.thumbnails_dir.clone();
        let file_name = format!("{}.jpg", file_hash);
        let size = self.size;

        let relative = tokio::task::spawn_blocking(move || -> Result<String> {
            std::fs::create_dir_all(&dest_dir)
                .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
            let dest = dest_dir.join(&file_name);
            if !dest.exists() {
                let img = image::open(&source)
                    .with_context(|| format!("Failed to decode {}", source.display()))?;
                let thumb = img.thumbnail(size, size);
                // RGBA sources cannot be written as JPEG directly.
                thumb
                    .to_rgb8()
                    .save_with_format(&dest, image::ImageFormat::Jpeg)
                    .with_context(|| format!("Failed to write {}", dest.display()))?;
            }
            Ok(format!("thumbnails/{}", file_name))
        })
        .await??;

        Ok(relative)
    }
}

/// Reads dimensions from the image header only.
pub struct ImageMetadataExtractor;

#[async_trait]
impl MetadataExtractor for ImageMetadataExtractor {
    async fn extract(&self, source: &Path) -> Result<ImageMeta> {
        let source = source.to_path_buf();
        let meta = tokio::task::spawn_blocking(move || -> Result<ImageMeta> {
            let (width, height) = image::image_dimensions(&source)
                .with_context(|| format!("Failed to read dimensions of {}", source.display()))?;
            Ok(ImageMeta {
                width: Some(width),
                height: Some(height),
            })
        })
        .await??;
        Ok(meta)
    }
}
