//! Per-pass thumbnail scheduling.
//!
//! Each display pass walks the catalog in display order. Visible rows always
//! request their thumbnail and get a handle back, real or placeholder.
//! Off-screen rows only request while off-screen capacity is spare, so they
//! fill idle workers in catalog order without delaying anything on screen.

use serde::Serialize;
use thumbview_scheduler::Visibility;

use crate::catalog::Catalog;
use crate::codec::{DisplayHandle, DisplayUploader};
use crate::image::{Image, ImageId, ThumbnailState};
use crate::thumbnail::{RequestOutcome, ThumbnailPipeline};

/// What a visible row should draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowThumbnail {
    pub id: ImageId,
    pub handle: DisplayHandle,
    /// `handle` is the shared placeholder, not this image's thumbnail
    pub placeholder: bool,
}

/// Summary of one display pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    #[serde(skip)]
    pub rows: Vec<RowThumbnail>,
    /// New or promoted visible jobs
    pub requested_visible: usize,
    /// New off-screen jobs
    pub requested_offscreen: usize,
    /// Off-screen rows left for a later pass
    pub deferred: usize,
    /// Images whose thumbnail is ready
    pub ready: usize,
    pub total: usize,
    /// Catalog order changed before the walk
    pub resorted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct VisibilityScheduler {
    placeholder: DisplayHandle,
}

impl VisibilityScheduler {
    /// `placeholder` is drawn for rows without a ready thumbnail.
    pub fn new(placeholder: DisplayHandle) -> Self {
        Self { placeholder }
    }

    pub fn placeholder(&self) -> DisplayHandle {
        self.placeholder
    }

    /// Run one pass. `is_visible` receives each row's display index.
    pub fn run_pass<F>(
        &self,
        catalog: &mut Catalog,
        pipeline: &ThumbnailPipeline,
        uploader: &dyn DisplayUploader,
        is_visible: F,
    ) -> PassReport
    where
        F: Fn(usize, &Image) -> bool,
    {
        let mut report = PassReport {
            resorted: catalog.resort_if_dimensions_changed(),
            total: catalog.len(),
            ..PassReport::default()
        };

        for (index, image) in catalog.images_mut().iter_mut().enumerate() {
            if is_visible(index, &*image) {
                // Failures stay put until refreshed
                if image.thumbnail_state() != ThumbnailState::Failed {
                    match pipeline.request(image, Visibility::Visible) {
                        RequestOutcome::Enqueued(_) | RequestOutcome::Promoted => report.requested_visible += 1,
                        RequestOutcome::AlreadyRequested | RequestOutcome::Deferred => {}
                    }
                }
                let row = match image.bind_thumbnail(uploader) {
                    Some(handle) => RowThumbnail {
                        id: image.id(),
                        handle,
                        placeholder: false,
                    },
                    None => RowThumbnail {
                        id: image.id(),
                        handle: self.placeholder,
                        placeholder: true,
                    },
                };
                report.rows.push(row);
            } else if needs_request(image) {
                if pipeline.offscreen_in_flight() < pipeline.offscreen_cap() {
                    match pipeline.request(image, Visibility::OffScreen) {
                        RequestOutcome::Enqueued(_) => report.requested_offscreen += 1,
                        RequestOutcome::Deferred => report.deferred += 1,
                        RequestOutcome::Promoted | RequestOutcome::AlreadyRequested => {}
                    }
                } else {
                    report.deferred += 1;
                }
            }

            if image.thumbnail_state() == ThumbnailState::Ready {
                report.ready += 1;
            }
        }

        report
    }
}

/// Off-screen rows only request from a fresh state.
fn needs_request(image: &Image) -> bool {
    image.thumbnail_state() == ThumbnailState::NotRequested
}
