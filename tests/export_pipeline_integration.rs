use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use memotile::config::{BakeOptions, ExportTarget, QueueOptions};
use memotile::error::Error;
use memotile::events::AdvanceOutcome;
use memotile::photo::{ImageRef, Photo, PhotoSet};
use memotile::processing::filters::FilterParams;
use memotile::processing::geometry::{CropRect, CropView, Dimensions, FrameRect, Size, Transform};
use memotile::processing::imaging;
use memotile::tasks::baker::{FilterBaker, RenderSurface};
use memotile::tasks::export_queue::ExportQueue;
use memotile::tasks::exporter::{ExportPipeline, ExportSettings};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

struct NeverReady;

impl RenderSurface for NeverReady {
    fn submit(&self, _frame: RgbaImage, _params: FilterParams) -> Option<oneshot::Receiver<()>> {
        None
    }

    fn snapshot(&self) -> Option<RgbaImage> {
        None
    }
}

fn settings(dir: &Path, ready_timeout: Duration) -> ExportSettings {
    ExportSettings {
        output_dir: dir.join("out"),
        preview: ExportTarget {
            max_dim: 120,
            bake_max_dim: 64,
            quality: 85,
        },
        print: ExportTarget {
            max_dim: 2048,
            bake_max_dim: 3072,
            quality: 92,
        },
        queue: QueueOptions {
            poll_interval: Duration::from_millis(5),
            ready_timeout,
        },
    }
}

/// 400x300 original with a 128x96 working copy.
fn photo(dir: &Path, name: &str) -> Photo {
    let source = dir.join(format!("{name}.png"));
    RgbaImage::from_fn(400, 300, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255]))
        .save(&source)
        .unwrap();
    let working = dir.join(format!("{name}-working.jpg"));
    let working_dims = imaging::write_derivative(&source, &working, 128, 90).unwrap();
    assert_eq!(working_dims, Dimensions::new(128, 96));
    let mut photo = Photo::new(ImageRef::new(source, Dimensions::new(400, 300)));
    photo.working = Some(ImageRef::new(working, working_dims));
    photo
}

fn view(transform: Transform) -> CropView {
    let container = Size::new(1000.0, 1000.0);
    CropView {
        container,
        frame: FrameRect::centered_square(container, 0.0),
        transform,
    }
}

fn pipeline_with(
    photos: &PhotoSet,
    surface: Arc<dyn RenderSurface>,
    bake: BakeOptions,
    settings: ExportSettings,
) -> ExportPipeline {
    ExportPipeline::new(
        photos.clone(),
        Arc::new(FilterBaker::new(surface, bake)),
        ExportQueue::new(),
        settings,
        CancellationToken::new(),
    )
}

fn pipeline(photos: &PhotoSet, dir: &Path) -> ExportPipeline {
    pipeline_with(
        photos,
        Arc::new(memotile::tasks::baker::CpuSurface::new()),
        BakeOptions::default(),
        settings(dir, Duration::from_secs(10)),
    )
}

/// Occupy the queue until the returned sender fires.
fn block_queue(queue: &ExportQueue) -> oneshot::Sender<()> {
    let (release_tx, release_rx) = oneshot::channel::<()>();
    queue.enqueue("blocker", async move {
        let _ = release_rx.await;
        Ok(())
    });
    release_tx
}

fn file_name(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preview_is_immediate_and_print_follows() {
    let dir = tempfile::tempdir().unwrap();
    let photos = PhotoSet::new(vec![photo(dir.path(), "a"), photo(dir.path(), "b")]);
    let pipeline = pipeline(&photos, dir.path());

    let outcome = pipeline
        .advance(0, Some(view(Transform::default())))
        .await
        .unwrap();
    assert_eq!(outcome, AdvanceOutcome::Advanced { next: 1 });

    let first = photos.get(0).unwrap();
    let committed = first.committed.clone().unwrap();
    assert_eq!(
        committed.crop_px,
        CropRect {
            x: 50,
            y: 0,
            width: 300,
            height: 300
        }
    );
    let preview = first.output.preview_uri.clone().unwrap();
    // UI-space rect on the 128x96 working copy is 96x96
    assert_eq!(image::image_dimensions(&preview).unwrap(), (96, 96));

    assert!(
        pipeline
            .queue()
            .wait_idle(Duration::from_millis(5), Duration::from_secs(10))
            .await
    );
    let first = photos.get(0).unwrap();
    let print = first.output.view_uri.clone().unwrap();
    assert_eq!(image::image_dimensions(&print).unwrap(), (300, 300));
    assert!(photos.get(1).unwrap().output.view_uri.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_photo_waits_for_every_print() {
    let dir = tempfile::tempdir().unwrap();
    let photos = PhotoSet::new(vec![photo(dir.path(), "a"), photo(dir.path(), "b")]);
    let pipeline = pipeline(&photos, dir.path());

    photos.update(1, |p| p.edit.filter_id = "bw".into()).unwrap();
    pipeline
        .advance(0, Some(view(Transform::new(2.0, 0.0, 0.0))))
        .await
        .unwrap();
    let outcome = pipeline
        .advance(1, Some(view(Transform::default())))
        .await
        .unwrap();
    assert_eq!(outcome, AdvanceOutcome::ReadyForCheckout);
    assert!(photos.all_views_ready());

    let zoomed = photos.get(0).unwrap();
    assert_eq!(zoomed.committed.unwrap().crop_px.width, 150);
    assert_eq!(zoomed.edit.crop, Transform::new(2.0, 0.0, 0.0));

    let filtered = photos.get(1).unwrap();
    assert!(file_name(&filtered.output.preview_uri).ends_with("-filtered.jpg"));
    assert!(file_name(&filtered.output.view_uri).ends_with("-filtered.jpg"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn teardown_suppresses_pending_print() {
    let dir = tempfile::tempdir().unwrap();
    let photos = PhotoSet::new(vec![photo(dir.path(), "a"), photo(dir.path(), "b")]);
    let pipeline = pipeline(&photos, dir.path());
    let release = block_queue(pipeline.queue());

    pipeline
        .advance(0, Some(view(Transform::default())))
        .await
        .unwrap();
    assert_eq!(pipeline.generation(0), 1);
    assert_eq!(pipeline.queue().pending_count(), 1);

    // session goes away while job A is still queued; it then gets to run anyway
    pipeline.liveness().cancel();
    release.send(()).unwrap();
    assert!(
        pipeline
            .queue()
            .wait_idle(Duration::from_millis(5), Duration::from_secs(10))
            .await
    );
    let first = photos.get(0).unwrap();
    assert!(first.output.view_uri.is_none());
    assert!(first.output.preview_uri.is_some());

    let err = pipeline
        .advance(1, Some(view(Transform::default())))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StaleWriteSuppressed { index: 1, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_drops_queued_prints() {
    let dir = tempfile::tempdir().unwrap();
    let photos = PhotoSet::new(vec![photo(dir.path(), "a"), photo(dir.path(), "b")]);
    let pipeline = pipeline(&photos, dir.path());
    let release = block_queue(pipeline.queue());

    pipeline
        .advance(0, Some(view(Transform::default())))
        .await
        .unwrap();
    pipeline.shutdown();
    assert_eq!(pipeline.queue().pending_count(), 0);
    release.send(()).unwrap();
    assert!(
        pipeline
            .queue()
            .wait_idle(Duration::from_millis(5), Duration::from_secs(10))
            .await
    );
    assert!(photos.get(0).unwrap().output.view_uri.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn re_edit_supersedes_older_print() {
    let dir = tempfile::tempdir().unwrap();
    let photos = PhotoSet::new(vec![photo(dir.path(), "a"), photo(dir.path(), "b")]);
    let pipeline = pipeline(&photos, dir.path());
    let release = block_queue(pipeline.queue());

    pipeline
        .advance(0, Some(view(Transform::default())))
        .await
        .unwrap();
    pipeline
        .advance(0, Some(view(Transform::new(2.0, 0.0, 0.0))))
        .await
        .unwrap();
    assert_eq!(pipeline.generation(0), 2);
    assert_eq!(pipeline.queue().pending_count(), 2);

    release.send(()).unwrap();
    assert!(
        pipeline
            .queue()
            .wait_idle(Duration::from_millis(5), Duration::from_secs(10))
            .await
    );
    let photo = photos.get(0).unwrap();
    assert!(file_name(&photo.output.view_uri).starts_with("000-g2"));
    assert_eq!(
        image::image_dimensions(photo.output.view_uri.unwrap()).unwrap(),
        (150, 150)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checkout_gate_times_out_then_retries() {
    let dir = tempfile::tempdir().unwrap();
    let photos = PhotoSet::new(vec![photo(dir.path(), "a")]);
    let pipeline = pipeline_with(
        &photos,
        Arc::new(memotile::tasks::baker::CpuSurface::new()),
        BakeOptions::default(),
        settings(dir.path(), Duration::from_millis(60)),
    );
    let release = block_queue(pipeline.queue());

    let err = pipeline
        .advance(0, Some(view(Transform::default())))
        .await
        .unwrap_err();
    match &err {
        Error::QueueTimeout { pending, waited } => {
            assert_eq!(*pending, 1);
            assert!(*waited >= Duration::from_millis(60));
        }
        other => panic!("expected queue timeout, got {other:?}"),
    }
    assert!(!err.is_degradable());

    release.send(()).unwrap();
    let mut ready = false;
    for _ in 0..200 {
        if pipeline.wait_for_checkout().await.is_ok() {
            ready = true;
            break;
        }
    }
    assert!(ready);
    assert!(photos.all_views_ready());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_bake_falls_back_to_unfiltered_crop() {
    let dir = tempfile::tempdir().unwrap();
    let photos = PhotoSet::new(vec![photo(dir.path(), "a")]);
    let pipeline = pipeline_with(
        &photos,
        Arc::new(NeverReady),
        BakeOptions {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
        },
        settings(dir.path(), Duration::from_secs(10)),
    );
    photos.update(0, |p| p.edit.filter_id = "vintage".into()).unwrap();

    let outcome = pipeline
        .advance(0, Some(view(Transform::default())))
        .await
        .unwrap();
    assert_eq!(outcome, AdvanceOutcome::ReadyForCheckout);
    let photo = photos.get(0).unwrap();
    assert_eq!(file_name(&photo.output.preview_uri), "000-g1.jpg");
    assert_eq!(file_name(&photo.output.view_uri), "000-g1.jpg");
    assert_eq!(photo.committed.unwrap().filter_id, "vintage");
}

#[tokio::test]
async fn corrupt_original_leaves_print_unset() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken = photo(dir.path(), "a");
    std::fs::write(&broken.source.uri, b"not an image").unwrap();
    broken.source.dimensions = Dimensions::new(400, 300);
    let photos = PhotoSet::new(vec![broken, photo(dir.path(), "b")]);
    let pipeline = pipeline(&photos, dir.path());

    pipeline
        .advance(0, Some(view(Transform::default())))
        .await
        .unwrap();
    assert!(
        pipeline
            .queue()
            .wait_idle(Duration::from_millis(5), Duration::from_secs(10))
            .await
    );
    let first = photos.get(0).unwrap();
    assert!(first.output.preview_uri.is_some());
    assert!(first.output.view_uri.is_none());
    assert_eq!(photos.pending_views(), vec![0, 1]);
}
