//! Per-file image records and their state machines.
//!
//! An [`Image`] is owned by the catalog and mutated only by the control
//! thread. The thumbnail half of its state lives in a [`ThumbnailSlot`]
//! shared with at most one worker; the slot lock is the gate that keeps a
//! second job from ever being submitted for the same image.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use thumbview_cache::{CachedThumbnail, SourceIdentity, ThumbnailBitmap};
use tracing::{debug, error, warn};

use crate::codec::{DecodeOptions, DisplayHandle, DisplayUploader, ImageDecoder, PixelBuffer};
use crate::error::ImageError;

/// Identifier of an image record, unique for the lifetime of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ImageId(pub u64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// File type derived from the extension.
///
/// Declaration order is the order used when sorting by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    Webp,
    Tga,
    Ico,
    Pnm,
    Qoi,
    Unknown,
}

impl FileType {
    pub fn from_path(path: &Path) -> Self {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_ascii_lowercase(),
            None => return FileType::Unknown,
        };
        match ext.as_str() {
            "png" => FileType::Png,
            "jpg" | "jpeg" => FileType::Jpeg,
            "gif" => FileType::Gif,
            "bmp" => FileType::Bmp,
            "tif" | "tiff" => FileType::Tiff,
            "webp" => FileType::Webp,
            "tga" => FileType::Tga,
            "ico" => FileType::Ico,
            "pbm" | "pgm" | "ppm" | "pnm" => FileType::Pnm,
            "qoi" => FileType::Qoi,
            _ => FileType::Unknown,
        }
    }
}

/// Thumbnail lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThumbnailState {
    NotRequested,
    Requested,
    Generating,
    Ready,
    Failed,
}

/// Full-resolution decode lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug)]
struct SlotInner {
    state: ThumbnailState,
    bitmap: Option<Arc<ThumbnailBitmap>>,
    failure: Option<ImageError>,
    /// Bumped on every successful completion
    generation: u64,
    /// Source dimensions reported with the thumbnail
    dimensions: Option<(u32, u32)>,
}

/// Thumbnail state shared between the control thread and one worker.
#[derive(Debug)]
pub struct ThumbnailSlot {
    id: ImageId,
    identity: SourceIdentity,
    inner: Mutex<SlotInner>,
}

impl ThumbnailSlot {
    pub(crate) fn new(id: ImageId, identity: SourceIdentity) -> Self {
        Self {
            id,
            identity,
            inner: Mutex::new(SlotInner {
                state: ThumbnailState::NotRequested,
                bitmap: None,
                failure: None,
                generation: 0,
                dimensions: None,
            }),
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    pub fn state(&self) -> ThumbnailState {
        self.inner.lock().unwrap().state
    }

    pub fn failure(&self) -> Option<ImageError> {
        self.inner.lock().unwrap().failure.clone()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.inner.lock().unwrap().dimensions
    }

    /// `NotRequested | Failed -> Requested`.
    ///
    /// Returns `false`, leaving the state untouched, from any other state.
    pub(crate) fn try_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            ThumbnailState::NotRequested | ThumbnailState::Failed => {
                inner.state = ThumbnailState::Requested;
                inner.failure = None;
                true
            }
            _ => false,
        }
    }

    /// `Requested -> NotRequested` for a job that was dropped before it ran.
    pub(crate) fn withdraw_request(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ThumbnailState::Requested {
            inner.state = ThumbnailState::NotRequested;
        }
    }

    /// `Requested -> Generating`, called by the worker that owns the job.
    pub(crate) fn begin_generating(&self) -> Result<(), ImageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ThumbnailState::Requested {
            error!(image = %self.id, state = ?inner.state, "generation started outside Requested");
            return Err(ImageError::InvariantViolation("generation started outside Requested state"));
        }
        inner.state = ThumbnailState::Generating;
        Ok(())
    }

    /// `Generating -> Ready | Failed`.
    pub(crate) fn complete(&self, result: Result<CachedThumbnail, ImageError>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ThumbnailState::Generating {
            error!(image = %self.id, state = ?inner.state, "completion for a slot that is not generating");
            return;
        }

        match result {
            Ok(thumbnail) => {
                inner.dimensions = Some((thumbnail.source_width, thumbnail.source_height));
                inner.bitmap = Some(Arc::new(thumbnail.bitmap));
                inner.generation += 1;
                inner.state = ThumbnailState::Ready;
            }
            Err(err) => {
                debug!(image = %self.id, error = %err, "thumbnail failed");
                inner.failure = Some(err);
                inner.state = ThumbnailState::Failed;
            }
        }
    }

    /// Bitmap and its generation, when `Ready`.
    fn ready_bitmap(&self) -> Option<(u64, Arc<ThumbnailBitmap>)> {
        let inner = self.inner.lock().unwrap();
        match (&inner.state, &inner.bitmap) {
            (ThumbnailState::Ready, Some(bitmap)) => Some((inner.generation, bitmap.clone())),
            _ => None,
        }
    }
}

/// One file of the active directory.
#[derive(Debug)]
pub struct Image {
    id: ImageId,
    identity: SourceIdentity,
    file_type: FileType,
    sort_name: String,
    slot: Arc<ThumbnailSlot>,
    /// Generation of the slot bitmap that `handle` was uploaded from
    thumbnail_binding: Option<(u64, DisplayHandle)>,
    decode_state: DecodeState,
    pixels: Option<PixelBuffer>,
    display: Option<DisplayHandle>,
    load_failure: Option<ImageError>,
    loaded_at: Option<Instant>,
    modified: bool,
    /// Dimensions from the last full decode, kept across unloads
    decoded_dimensions: Option<(u32, u32)>,
}

impl Image {
    pub fn new(id: ImageId, identity: SourceIdentity) -> Self {
        let file_type = FileType::from_path(&identity.path);
        let sort_name = identity.file_name().to_lowercase();
        Self {
            id,
            file_type,
            sort_name,
            slot: Arc::new(ThumbnailSlot::new(id, identity.clone())),
            identity,
            thumbnail_binding: None,
            decode_state: DecodeState::Unloaded,
            pixels: None,
            display: None,
            load_failure: None,
            loaded_at: None,
            modified: false,
            decoded_dimensions: None,
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.identity.path
    }

    pub fn file_name(&self) -> String {
        self.identity.file_name()
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Lowercased file name used for name ordering.
    pub(crate) fn sort_name(&self) -> &str {
        &self.sort_name
    }

    pub(crate) fn slot(&self) -> &Arc<ThumbnailSlot> {
        &self.slot
    }

    pub fn thumbnail_state(&self) -> ThumbnailState {
        self.slot.state()
    }

    pub fn thumbnail_failure(&self) -> Option<ImageError> {
        self.slot.failure()
    }

    pub fn decode_state(&self) -> DecodeState {
        self.decode_state
    }

    pub fn is_loaded(&self) -> bool {
        self.decode_state == DecodeState::Loaded
    }

    pub fn load_failure(&self) -> Option<&ImageError> {
        self.load_failure.as_ref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn pixels(&self) -> Option<&PixelBuffer> {
        self.pixels.as_ref()
    }

    /// Width and height, once known.
    ///
    /// Taken from the pixel buffer when loaded, then from the last full
    /// decode, then from the source dimensions recorded with the thumbnail.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.pixels {
            Some(p) => Some((p.width, p.height)),
            None => self.decoded_dimensions.or_else(|| self.slot.dimensions()),
        }
    }

    /// Width, or 0 while unknown.
    pub fn width(&self) -> u32 {
        self.dimensions().map_or(0, |(w, _)| w)
    }

    /// Height, or 0 while unknown.
    pub fn height(&self) -> u32 {
        self.dimensions().map_or(0, |(_, h)| h)
    }

    /// Pixel area, or 0 while unknown.
    pub fn area(&self) -> u64 {
        self.dimensions().map_or(0, |(w, h)| w as u64 * h as u64)
    }

    /// Bytes held by the full-resolution buffer.
    pub fn memory_bytes(&self) -> usize {
        self.pixels.as_ref().map_or(0, PixelBuffer::byte_size)
    }

    pub fn loaded_at(&self) -> Option<Instant> {
        self.loaded_at
    }

    /// Decode at full resolution. Returns `true` if the image is loaded.
    pub fn load(&mut self, decoder: &dyn ImageDecoder, options: &DecodeOptions) -> bool {
        if self.is_loaded() {
            return true;
        }

        self.decode_state = DecodeState::Loading;
        match decoder.decode(self.path(), options) {
            Ok(buffer) => {
                debug!(image = %self.id, bytes = buffer.byte_size(), "image loaded");
                self.decoded_dimensions = Some((buffer.width, buffer.height));
                self.pixels = Some(buffer);
                self.loaded_at = Some(Instant::now());
                self.load_failure = None;
                self.decode_state = DecodeState::Loaded;
                true
            }
            Err(err) => {
                warn!(image = %self.id, error = %err, "could not load image");
                self.load_failure = Some(err);
                self.decode_state = DecodeState::Failed;
                false
            }
        }
    }

    /// Drop the full-resolution buffer and its display handle.
    ///
    /// A modified image is kept unless `force` is set. Thumbnail state is
    /// untouched. Returns `true` if the image was unloaded.
    pub fn unload(&mut self, uploader: &dyn DisplayUploader, force: bool) -> bool {
        if !self.is_loaded() {
            return false;
        }
        if self.modified && !force {
            return false;
        }

        if let Some(handle) = self.display.take() {
            uploader.release(handle);
        }
        self.pixels = None;
        self.loaded_at = None;
        self.modified = false;
        self.decode_state = DecodeState::Unloaded;
        true
    }

    /// Displayable thumbnail handle, uploading at most once per completed
    /// generation. Never blocks on generation.
    pub fn bind_thumbnail(&mut self, uploader: &dyn DisplayUploader) -> Option<DisplayHandle> {
        let (generation, bitmap) = self.slot.ready_bitmap()?;

        if let Some((bound, handle)) = self.thumbnail_binding {
            if bound == generation {
                return Some(handle);
            }
            uploader.release(handle);
        }

        let handle = uploader.upload(bitmap.width, bitmap.height, &bitmap.pixels);
        self.thumbnail_binding = Some((generation, handle));
        Some(handle)
    }

    /// Displayable handle for the full-resolution image.
    pub fn bind(&mut self, uploader: &dyn DisplayUploader) -> Option<DisplayHandle> {
        if let Some(handle) = self.display {
            return Some(handle);
        }
        let pixels = self.pixels.as_ref()?;
        let handle = uploader.upload(pixels.width, pixels.height, &pixels.pixels);
        self.display = Some(handle);
        Some(handle)
    }

    /// Mutate the full-resolution pixels.
    ///
    /// The bound display handle is released first; the next `bind` uploads the
    /// edited pixels. Returns `false` if the image is not loaded.
    pub fn edit_pixels<F>(&mut self, uploader: &dyn DisplayUploader, edit: F) -> bool
    where
        F: FnOnce(&mut PixelBuffer),
    {
        let Some(pixels) = self.pixels.as_mut() else {
            return false;
        };
        if let Some(handle) = self.display.take() {
            uploader.release(handle);
        }
        edit(pixels);
        self.modified = true;
        true
    }

    /// Release every display handle held by this record.
    pub(crate) fn release_handles(&mut self, uploader: &dyn DisplayUploader) {
        if let Some(handle) = self.display.take() {
            uploader.release(handle);
        }
        if let Some((_, handle)) = self.thumbnail_binding.take() {
            uploader.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HeadlessUploader;
    use std::path::PathBuf;
    use std::time::{Duration, UNIX_EPOCH};

    struct FixedDecoder(Result<PixelBuffer, ImageError>);

    impl ImageDecoder for FixedDecoder {
        fn decode(&self, _path: &Path, _options: &DecodeOptions) -> Result<PixelBuffer, ImageError> {
            self.0.clone()
        }
    }

    fn image(name: &str) -> Image {
        let identity = SourceIdentity::new(format!("/photos/{}", name), 10, UNIX_EPOCH + Duration::from_secs(1));
        Image::new(ImageId(1), identity)
    }

    fn thumbnail() -> CachedThumbnail {
        CachedThumbnail {
            bitmap: ThumbnailBitmap::solid(2, 1, [1, 2, 3, 4]),
            source_width: 200,
            source_height: 100,
        }
    }

    fn ok_decoder() -> FixedDecoder {
        FixedDecoder(Ok(PixelBuffer::new(4, 3, vec![0; 48])))
    }

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_path(Path::new("a.PNG")), FileType::Png);
        assert_eq!(FileType::from_path(Path::new("a.jpeg")), FileType::Jpeg);
        assert_eq!(FileType::from_path(Path::new("a.tif")), FileType::Tiff);
        assert_eq!(FileType::from_path(Path::new("noext")), FileType::Unknown);
        assert!(FileType::Png < FileType::Unknown);
    }

    #[test]
    fn test_thumbnail_state_machine() {
        let img = image("a.png");
        let slot = img.slot().clone();
        assert_eq!(slot.state(), ThumbnailState::NotRequested);

        assert!(slot.try_request());
        assert!(!slot.try_request());
        assert_eq!(slot.state(), ThumbnailState::Requested);

        slot.begin_generating().unwrap();
        assert!(!slot.try_request());
        assert_eq!(slot.state(), ThumbnailState::Generating);

        slot.complete(Ok(thumbnail()));
        assert_eq!(slot.state(), ThumbnailState::Ready);
        assert!(!slot.try_request());
        assert_eq!(img.dimensions(), Some((200, 100)));
        assert_eq!(img.area(), 20_000);
    }

    #[test]
    fn test_failed_thumbnail_records_reason_and_can_retry() {
        let img = image("bad.png");
        let slot = img.slot();
        slot.try_request();
        slot.begin_generating().unwrap();
        slot.complete(Err(ImageError::decode("/photos/bad.png", "truncated")));

        assert_eq!(img.thumbnail_state(), ThumbnailState::Failed);
        assert!(matches!(img.thumbnail_failure(), Some(ImageError::Decode { .. })));

        assert!(slot.try_request());
        assert_eq!(img.thumbnail_state(), ThumbnailState::Requested);
        assert!(img.thumbnail_failure().is_none());
    }

    #[test]
    fn test_generating_without_request_is_refused() {
        let img = image("a.png");
        let err = img.slot().begin_generating().unwrap_err();
        assert!(matches!(err, ImageError::InvariantViolation(_)));
        assert_eq!(img.thumbnail_state(), ThumbnailState::NotRequested);
    }

    #[test]
    fn test_withdraw_only_affects_requested() {
        let img = image("a.png");
        img.slot().try_request();
        img.slot().withdraw_request();
        assert_eq!(img.thumbnail_state(), ThumbnailState::NotRequested);
    }

    #[test]
    fn test_bind_thumbnail_uploads_once_per_generation() {
        let uploader = HeadlessUploader::new();
        let mut img = image("a.png");
        assert!(img.bind_thumbnail(&uploader).is_none());

        img.slot().try_request();
        img.slot().begin_generating().unwrap();
        assert!(img.bind_thumbnail(&uploader).is_none());
        img.slot().complete(Ok(thumbnail()));

        let first = img.bind_thumbnail(&uploader).unwrap();
        let second = img.bind_thumbnail(&uploader).unwrap();
        assert_eq!(first, second);
        assert_eq!(uploader.uploads(), 1);
    }

    #[test]
    fn test_load_and_unload() {
        let uploader = HeadlessUploader::new();
        let mut img = image("a.png");

        assert!(img.load(&ok_decoder(), &DecodeOptions::default()));
        assert_eq!(img.decode_state(), DecodeState::Loaded);
        assert_eq!(img.memory_bytes(), 48);
        assert!(img.loaded_at().is_some());
        assert_eq!(img.dimensions(), Some((4, 3)));

        let handle = img.bind(&uploader).unwrap();
        assert!(uploader.is_live(handle));

        assert!(img.unload(&uploader, false));
        assert_eq!(img.decode_state(), DecodeState::Unloaded);
        assert_eq!(img.memory_bytes(), 0);
        assert!(!uploader.is_live(handle));
        assert!(!img.unload(&uploader, false));
    }

    #[test]
    fn test_dimensions_survive_unload() {
        let uploader = HeadlessUploader::new();
        let mut img = image("a.png");
        assert_eq!(img.dimensions(), None);

        img.load(&ok_decoder(), &DecodeOptions::default());
        assert!(img.unload(&uploader, false));
        assert_eq!(img.dimensions(), Some((4, 3)));
        assert_eq!(img.area(), 12);

        // The full decode wins over thumbnail source dimensions
        img.slot().try_request();
        img.slot().begin_generating().unwrap();
        img.slot().complete(Ok(thumbnail()));
        assert_eq!(img.dimensions(), Some((4, 3)));
    }

    #[test]
    fn test_load_failure_then_retry() {
        let mut img = image("a.png");
        let bad = FixedDecoder(Err(ImageError::io(PathBuf::from("/photos/a.png"), "denied")));

        assert!(!img.load(&bad, &DecodeOptions::default()));
        assert_eq!(img.decode_state(), DecodeState::Failed);
        assert!(img.load_failure().is_some());

        assert!(img.load(&ok_decoder(), &DecodeOptions::default()));
        assert!(img.load_failure().is_none());
    }

    #[test]
    fn test_edit_invalidates_binding_and_blocks_unforced_unload() {
        let uploader = HeadlessUploader::new();
        let mut img = image("a.png");
        img.load(&ok_decoder(), &DecodeOptions::default());
        let before = img.bind(&uploader).unwrap();

        assert!(img.edit_pixels(&uploader, |p| p.pixels[0] = 255));
        assert!(!uploader.is_live(before));
        assert!(img.is_modified());

        let after = img.bind(&uploader).unwrap();
        assert_ne!(before, after);
        assert_eq!(img.pixels().unwrap().pixels[0], 255);

        assert!(!img.unload(&uploader, false));
        assert!(img.unload(&uploader, true));
        assert!(!img.is_modified());
    }

    #[test]
    fn test_edit_requires_loaded_pixels() {
        let uploader = HeadlessUploader::new();
        let mut img = image("a.png");
        assert!(!img.edit_pixels(&uploader, |_| {}));
    }
}
