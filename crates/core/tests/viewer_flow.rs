use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use thumbview_cache::CachedThumbnail;
use thumbview_core::{
    Collaborators, DecodeOptions, FsScanner, HeadlessUploader, ImageError, RasterCodec, ThumbnailDecoder,
    ThumbnailState, ViewerConfig, ViewerContext,
};

fn write_png(path: &Path, width: u32, height: u32) {
    image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]))
        .save(path)
        .unwrap();
}

fn photo_dir(root: &Path, count: usize, size: u32) -> PathBuf {
    let dir = root.join("photos");
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        write_png(&dir.join(format!("img{:02}.png", i + 1)), size, size);
    }
    dir
}

fn config(root: &Path) -> ViewerConfig {
    let mut config = ViewerConfig {
        worker_threads: 3,
        shutdown_timeout_ms: 2_000,
        ..ViewerConfig::default()
    };
    config.cache = config.cache.with_cache_dir(root.join("cache"));
    config
}

/// Real decoding, counted, optionally held until released.
#[derive(Default)]
struct CountingCodec {
    calls: AtomicUsize,
    held: Mutex<bool>,
    released: Condvar,
}

impl CountingCodec {
    fn held() -> Self {
        Self {
            held: Mutex::new(true),
            ..Self::default()
        }
    }

    fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }
}

impl ThumbnailDecoder for CountingCodec {
    fn decode_thumbnail(&self, path: &Path, options: &DecodeOptions) -> Result<CachedThumbnail, ImageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
        drop(held);
        RasterCodec.decode_thumbnail(path, options)
    }
}

fn collaborators(thumbnails: Arc<CountingCodec>, uploader: Arc<HeadlessUploader>) -> Collaborators {
    Collaborators {
        scanner: Arc::new(FsScanner::new()),
        thumbnails,
        images: Arc::new(RasterCodec::new()),
        uploader,
    }
}

fn passes_until_ready(viewer: &mut ViewerContext, visible: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let report = viewer.display_pass(|index, _| index < visible);
        if report.ready == report.total {
            return;
        }
        assert!(Instant::now() < deadline, "thumbnails never completed");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn corrupt_source_shows_placeholder_until_refreshed() {
    let root = tempfile::tempdir().unwrap();
    let dir = photo_dir(root.path(), 1, 8);
    let broken = dir.join("broken.png");
    std::fs::write(&broken, b"definitely not a png").unwrap();

    let uploader = Arc::new(HeadlessUploader::new());
    let mut viewer =
        ViewerContext::open(config(root.path()), collaborators(Arc::new(CountingCodec::default()), uploader)).unwrap();
    viewer.open_directory(&dir).unwrap();
    let id = viewer.catalog().find_by_path(&broken).unwrap();

    viewer.display_pass(|_, _| true);
    assert!(viewer.wait_for_thumbnails(Duration::from_secs(5)));

    let image = viewer.catalog().get(id).unwrap();
    assert_eq!(image.thumbnail_state(), ThumbnailState::Failed);
    assert!(image.thumbnail_failure().is_some());

    let report = viewer.display_pass(|_, _| true);
    let row = report.rows.iter().find(|r| r.id == id).unwrap();
    assert!(row.placeholder);
    assert_eq!(row.handle, viewer.placeholder());
    assert_eq!(report.ready, 1);

    // Passes do not retry failures on their own
    viewer.display_pass(|_, _| true);
    assert!(viewer.wait_for_thumbnails(Duration::from_secs(5)));
    assert_eq!(viewer.pipeline_stats().failed, 1);

    write_png(&broken, 16, 12);
    viewer.refresh_thumbnail(id).unwrap();
    assert!(viewer.wait_for_thumbnails(Duration::from_secs(5)));

    let image = viewer.catalog().get(id).unwrap();
    assert_eq!(image.thumbnail_state(), ThumbnailState::Ready);
    assert_eq!(image.dimensions(), Some((16, 12)));
    let report = viewer.display_pass(|_, _| true);
    assert!(report.rows.iter().all(|r| !r.placeholder));
    viewer.shutdown().unwrap();
}

#[test]
fn second_run_is_served_from_cache() {
    let root = tempfile::tempdir().unwrap();
    let dir = photo_dir(root.path(), 5, 20);
    let codec = Arc::new(CountingCodec::default());

    let mut first = ViewerContext::open(
        config(root.path()),
        collaborators(codec.clone(), Arc::new(HeadlessUploader::new())),
    )
    .unwrap();
    first.open_directory(&dir).unwrap();
    passes_until_ready(&mut first, 2);
    assert_eq!(first.pipeline_stats().generated, 5);
    let report = first.shutdown().unwrap();
    assert!(report.pipeline.idle);
    assert_eq!(report.sweep.unwrap().removed, 0);
    assert_eq!(codec.calls.load(Ordering::SeqCst), 5);

    let mut second = ViewerContext::open(
        config(root.path()),
        collaborators(codec.clone(), Arc::new(HeadlessUploader::new())),
    )
    .unwrap();
    second.open_directory(&dir).unwrap();
    passes_until_ready(&mut second, 2);

    assert_eq!(codec.calls.load(Ordering::SeqCst), 5);
    assert_eq!(second.pipeline_stats().from_cache, 5);
    assert!(second.catalog().iter().all(|i| i.dimensions() == Some((20, 20))));
    second.shutdown().unwrap();
}

#[test]
fn changed_source_is_regenerated() {
    let root = tempfile::tempdir().unwrap();
    let dir = photo_dir(root.path(), 2, 10);
    let codec = Arc::new(CountingCodec::default());

    let mut first = ViewerContext::open(
        config(root.path()),
        collaborators(codec.clone(), Arc::new(HeadlessUploader::new())),
    )
    .unwrap();
    first.open_directory(&dir).unwrap();
    passes_until_ready(&mut first, 2);
    first.shutdown().unwrap();

    // Different size gives a different fingerprint
    write_png(&dir.join("img01.png"), 30, 30);

    let mut second = ViewerContext::open(
        config(root.path()),
        collaborators(codec.clone(), Arc::new(HeadlessUploader::new())),
    )
    .unwrap();
    second.open_directory(&dir).unwrap();
    passes_until_ready(&mut second, 2);

    assert_eq!(second.pipeline_stats().generated, 1);
    assert_eq!(second.pipeline_stats().from_cache, 1);
    assert_eq!(codec.calls.load(Ordering::SeqCst), 3);
    second.shutdown().unwrap();
}

#[test]
fn offscreen_work_respects_the_cap() {
    let root = tempfile::tempdir().unwrap();
    let dir = photo_dir(root.path(), 12, 4);
    let codec = Arc::new(CountingCodec::held());
    let mut config = config(root.path());
    config.offscreen_concurrency = 2;
    config.worker_threads = 4;

    let mut viewer = ViewerContext::open(config, collaborators(codec.clone(), Arc::new(HeadlessUploader::new()))).unwrap();
    viewer.open_directory(&dir).unwrap();

    for _ in 0..5 {
        let report = viewer.display_pass(|index, _| index == 0);
        assert!(viewer.offscreen_in_flight() <= 2);
        assert_eq!(report.rows.len(), 1);
    }
    assert_eq!(viewer.offscreen_in_flight(), 2);
    let requested = viewer
        .catalog()
        .iter()
        .filter(|i| i.thumbnail_state() != ThumbnailState::NotRequested)
        .count();
    assert_eq!(requested, 3);

    codec.release();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let report = viewer.display_pass(|index, _| index == 0);
        assert!(viewer.offscreen_in_flight() <= 2);
        if report.ready == report.total {
            break;
        }
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(codec.calls.load(Ordering::SeqCst), 12);
    viewer.shutdown().unwrap();
}

#[test]
fn memory_budget_keeps_recent_images() {
    let root = tempfile::tempdir().unwrap();
    // 300x300 RGBA is 360_000 bytes; two fit into 1 MiB, three do not
    let dir = photo_dir(root.path(), 5, 300);
    let mut config = config(root.path());
    config.memory_budget_mb = 1;

    let mut viewer = ViewerContext::open(
        config,
        collaborators(Arc::new(CountingCodec::default()), Arc::new(HeadlessUploader::new())),
    )
    .unwrap();
    viewer.open_directory(&dir).unwrap();
    let ids = viewer.catalog().ids();

    for _ in &ids {
        viewer.show_next().unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }

    let resident: Vec<_> = ids.iter().copied().filter(|id| viewer.is_loaded(*id)).collect();
    assert_eq!(resident, ids[3..].to_vec());
    assert_eq!(viewer.memory_in_use(), 720_000);
    assert_eq!(viewer.catalog().current(), Some(ids[4]));
    viewer.shutdown().unwrap();
}

#[test]
fn shutdown_releases_every_handle() {
    let root = tempfile::tempdir().unwrap();
    let dir = photo_dir(root.path(), 3, 6);
    let uploader = Arc::new(HeadlessUploader::new());
    let mut viewer = ViewerContext::open(
        config(root.path()),
        collaborators(Arc::new(CountingCodec::default()), uploader.clone()),
    )
    .unwrap();
    viewer.open_directory(&dir).unwrap();
    passes_until_ready(&mut viewer, 3);
    viewer.show_next().unwrap();
    assert!(uploader.live_handles() >= 5);

    viewer.shutdown().unwrap();
    assert_eq!(uploader.live_handles(), 0);
}
