//! Decode and display collaborators.
//!
//! The viewer core never touches pixels directly. It calls a
//! [`ThumbnailDecoder`] from worker threads, an [`ImageDecoder`] for
//! full-resolution loads and a [`DisplayUploader`] to turn bitmaps into
//! bindable handles. [`RasterCodec`] and [`HeadlessUploader`] are the defaults.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use image::{DynamicImage, ImageFormat, ImageReader};
use thumbview_cache::{CachedThumbnail, ThumbnailBitmap};
use tracing::debug;

use crate::error::ImageError;

/// Full-resolution RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Bytes held by the pixel data.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Options shared by both decode paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Reject files whose content does not match their extension
    pub strict: bool,
    /// Longest edge of generated thumbnails, in pixels
    pub thumbnail_size: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            strict: false,
            thumbnail_size: 256,
        }
    }
}

/// Produces a thumbnail and the source dimensions for a file.
///
/// Called from worker threads.
pub trait ThumbnailDecoder: Send + Sync {
    fn decode_thumbnail(&self, path: &Path, options: &DecodeOptions) -> Result<CachedThumbnail, ImageError>;
}

/// Decodes a file at full resolution.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path, options: &DecodeOptions) -> Result<PixelBuffer, ImageError>;
}

/// Opaque handle to a display-resident resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayHandle(pub u64);

/// Uploads bitmaps to whatever surface draws them.
///
/// Handles are never modified in place: a changed bitmap is released and
/// uploaded again.
pub trait DisplayUploader: Send + Sync {
    fn upload(&self, width: u32, height: u32, pixels: &[u8]) -> DisplayHandle;
    fn release(&self, handle: DisplayHandle);
}

/// Decoder backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl RasterCodec {
    pub fn new() -> Self {
        Self
    }

    fn open(&self, path: &Path, options: &DecodeOptions) -> Result<DynamicImage, ImageError> {
        let reader = ImageReader::open(path)
            .map_err(|e| ImageError::io(path, e))?
            .with_guessed_format()
            .map_err(|e| ImageError::io(path, e))?;

        if options.strict {
            let declared = ImageFormat::from_path(path)
                .map_err(|_| ImageError::decode(path, "unsupported file extension"))?;
            match reader.format() {
                Some(actual) if actual == declared => {}
                Some(actual) => {
                    return Err(ImageError::decode(
                        path,
                        format!("content is {:?} but extension says {:?}", actual, declared),
                    ))
                }
                None => return Err(ImageError::decode(path, "unrecognised image content")),
            }
        }

        reader.decode().map_err(|e| match e {
            image::ImageError::IoError(io) => ImageError::io(path, io),
            other => ImageError::decode(path, other),
        })
    }
}

impl ThumbnailDecoder for RasterCodec {
    fn decode_thumbnail(&self, path: &Path, options: &DecodeOptions) -> Result<CachedThumbnail, ImageError> {
        let img = self.open(path, options)?;
        let thumb = img.thumbnail(options.thumbnail_size, options.thumbnail_size).to_rgba8();
        debug!(
            path = %path.display(),
            width = thumb.width(),
            height = thumb.height(),
            "decoded thumbnail"
        );

        Ok(CachedThumbnail {
            bitmap: ThumbnailBitmap::new(thumb.width(), thumb.height(), thumb.into_raw()),
            source_width: img.width(),
            source_height: img.height(),
        })
    }
}

impl ImageDecoder for RasterCodec {
    fn decode(&self, path: &Path, options: &DecodeOptions) -> Result<PixelBuffer, ImageError> {
        let rgba = self.open(path, options)?.to_rgba8();
        Ok(PixelBuffer::new(rgba.width(), rgba.height(), rgba.into_raw()))
    }
}

/// Uploader for runs without a display: hands out sequential handles and
/// keeps count.
#[derive(Debug, Default)]
pub struct HeadlessUploader {
    next: AtomicU64,
    uploads: AtomicUsize,
    releases: AtomicUsize,
    live: Mutex<HashSet<DisplayHandle>>,
}

impl HeadlessUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total uploads performed
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Total handles released
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Handles uploaded and not yet released
    pub fn live_handles(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn is_live(&self, handle: DisplayHandle) -> bool {
        self.live.lock().unwrap().contains(&handle)
    }
}

impl DisplayUploader for HeadlessUploader {
    fn upload(&self, _width: u32, _height: u32, _pixels: &[u8]) -> DisplayHandle {
        let handle = DisplayHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(handle);
        handle
    }

    fn release(&self, handle: DisplayHandle) {
        if self.live.lock().unwrap().remove(&handle) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}
