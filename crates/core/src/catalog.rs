//! Ordered image records for the active directory.
//!
//! Records are created wholesale from a directory listing and torn down
//! wholesale on rescan. Only the control thread touches the catalog.

use std::path::Path;

use thumbview_cache::SourceIdentity;
use tracing::{debug, info};

use crate::codec::{DecodeOptions, DisplayUploader, ImageDecoder};
use crate::image::{Image, ImageId};
use crate::sort::{sort_images, SortSpec};

#[derive(Debug, Default)]
pub struct Catalog {
    images: Vec<Image>,
    next_id: u64,
    current: Option<ImageId>,
    sort: SortSpec,
    listing_hash: Option<[u8; 32]>,
    /// `dimensions_known()` at the time of the last sort
    sorted_with_known: usize,
}

impl Catalog {
    pub fn new(sort: SortSpec) -> Self {
        Self {
            sort,
            ..Self::default()
        }
    }

    /// Replace every record with one per entry.
    ///
    /// Display handles of the old records are released. The current image is
    /// cleared and the active sort is applied.
    pub fn populate(&mut self, entries: Vec<SourceIdentity>, uploader: &dyn DisplayUploader) {
        self.teardown(uploader);
        self.listing_hash = Some(listing_hash(&entries));

        self.images = entries
            .into_iter()
            .map(|identity| {
                self.next_id += 1;
                Image::new(ImageId(self.next_id), identity)
            })
            .collect();
        self.apply_sort();

        info!(images = self.images.len(), sort = %self.sort.key, "catalog populated");
    }

    /// Drop every record, releasing display handles.
    pub fn teardown(&mut self, uploader: &dyn DisplayUploader) {
        for image in &mut self.images {
            image.release_handles(uploader);
        }
        self.images.clear();
        self.current = None;
        self.listing_hash = None;
        self.sorted_with_known = 0;
    }

    /// True when `entries` names a different set of files than the last
    /// `populate`. Compares names only, case-insensitively.
    pub fn listing_changed(&self, entries: &[SourceIdentity]) -> bool {
        self.listing_hash != Some(listing_hash(entries))
    }

    pub fn sort_spec(&self) -> SortSpec {
        self.sort
    }

    pub fn sort(&mut self, spec: SortSpec) {
        self.sort = spec;
        self.apply_sort();
    }

    /// Re-sort when the active key depends on dimensions and more of them
    /// have become known since the last sort. Returns `true` if it sorted.
    pub fn resort_if_dimensions_changed(&mut self) -> bool {
        if !self.sort.key.depends_on_dimensions() {
            return false;
        }
        if self.dimensions_known() == self.sorted_with_known {
            return false;
        }
        self.apply_sort();
        debug!(known = self.sorted_with_known, "re-sorted after new dimensions");
        true
    }

    /// Number of records whose dimensions are known.
    pub fn dimensions_known(&self) -> usize {
        self.images.iter().filter(|i| i.dimensions().is_some()).count()
    }

    fn apply_sort(&mut self) {
        sort_images(&mut self.images, self.sort);
        self.sorted_with_known = self.dimensions_known();
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Records in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    pub(crate) fn images_mut(&mut self) -> &mut [Image] {
        &mut self.images
    }

    pub fn ids(&self) -> Vec<ImageId> {
        self.images.iter().map(Image::id).collect()
    }

    pub fn position(&self, id: ImageId) -> Option<usize> {
        self.images.iter().position(|i| i.id() == id)
    }

    pub fn get(&self, id: ImageId) -> Option<&Image> {
        self.images.iter().find(|i| i.id() == id)
    }

    pub fn get_mut(&mut self, id: ImageId) -> Option<&mut Image> {
        self.images.iter_mut().find(|i| i.id() == id)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<ImageId> {
        self.images.iter().find(|i| i.path() == path).map(Image::id)
    }

    pub fn current(&self) -> Option<ImageId> {
        self.current
    }

    /// Make `id` the displayed image. Returns `false` for unknown ids.
    pub fn set_current(&mut self, id: ImageId) -> bool {
        if self.position(id).is_none() {
            return false;
        }
        self.current = Some(id);
        true
    }

    /// The record before or after `id` in display order.
    ///
    /// With `wrap`, stepping past either end continues from the other.
    pub fn neighbour(&self, id: ImageId, forward: bool, wrap: bool) -> Option<ImageId> {
        let len = self.images.len();
        let index = self.position(id)?;

        let next = match (forward, wrap) {
            (true, _) if index + 1 < len => index + 1,
            (true, true) => 0,
            (false, _) if index > 0 => index - 1,
            (false, true) => len - 1,
            _ => return None,
        };
        if next == index {
            return None;
        }
        Some(self.images[next].id())
    }

    /// Full-resolution load. Returns `true` if the image is loaded.
    pub fn load(&mut self, id: ImageId, decoder: &dyn ImageDecoder, options: &DecodeOptions) -> bool {
        self.get_mut(id).is_some_and(|image| image.load(decoder, options))
    }

    pub fn unload(&mut self, id: ImageId, uploader: &dyn DisplayUploader, force: bool) -> bool {
        self.get_mut(id).is_some_and(|image| image.unload(uploader, force))
    }

    pub fn is_loaded(&self, id: ImageId) -> bool {
        self.get(id).is_some_and(Image::is_loaded)
    }

    /// Bytes of full-resolution pixels currently held.
    pub fn resident_bytes(&self) -> usize {
        self.images.iter().map(Image::memory_bytes).sum()
    }
}

fn listing_hash(entries: &[SourceIdentity]) -> [u8; 32] {
    let mut names: Vec<String> = entries.iter().map(|e| e.file_name().to_lowercase()).collect();
    names.sort();

    let mut hasher = blake3::Hasher::new();
    for name in &names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }
    *hasher.finalize().as_bytes()
}
