//! Filter baking: turn a colour matrix (plus overlay) into real pixels.
//!
//! Live previews apply filters on the compositor; exports need the result as
//! a file. A [`RenderSurface`] composites one frame at a time and may finish
//! after `submit` returns, so the baker polls for the snapshot with a bounded
//! retry budget. The surface is shared, so the baker holds it behind an async
//! mutex for the whole submit/poll cycle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::RgbaImage;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use crate::config::BakeOptions;
use crate::error::Error;
use crate::processing::filters::{FilterParams, apply_filter};
use crate::processing::geometry::Dimensions;
use crate::processing::imaging::{decode_rgba8_apply_exif, downscale_to, encode_jpeg};
use crate::processing::layout::within;

/// A request to bake `params` into the image at `source`.
#[derive(Debug, Clone)]
pub struct BakeJob {
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
    pub params: FilterParams,
}

/// Resolution and encode quality for one bake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BakeTarget {
    pub max_dim: u32,
    pub quality: u8,
}

/// Offscreen surface that composites a filtered frame asynchronously.
pub trait RenderSurface: Send + Sync {
    /// Start compositing `frame`. May return a signal fired once the frame is done.
    fn submit(&self, frame: RgbaImage, params: FilterParams) -> Option<oneshot::Receiver<()>>;

    /// Take the composited frame for the latest submit, if it is ready.
    fn snapshot(&self) -> Option<RgbaImage>;
}

#[derive(Default)]
struct CpuSlot {
    frame_id: u64,
    ready: Option<(u64, RgbaImage)>,
}

/// Surface that rasterises on the blocking pool.
#[derive(Default)]
pub struct CpuSurface {
    slot: Arc<Mutex<CpuSlot>>,
}

impl CpuSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderSurface for CpuSurface {
    fn submit(&self, mut frame: RgbaImage, params: FilterParams) -> Option<oneshot::Receiver<()>> {
        let frame_id = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.frame_id += 1;
            slot.ready = None;
            slot.frame_id
        };
        let (done_tx, done_rx) = oneshot::channel();
        let slot = Arc::clone(&self.slot);
        tokio::task::spawn_blocking(move || {
            apply_filter(&mut frame, &params);
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            // a newer submit supersedes this frame
            if slot.frame_id == frame_id {
                slot.ready = Some((frame_id, frame));
            }
            drop(slot);
            let _ = done_tx.send(());
        });
        Some(done_rx)
    }

    fn snapshot(&self) -> Option<RgbaImage> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.ready.take() {
            Some((id, frame)) if id == slot.frame_id => Some(frame),
            _ => None,
        }
    }
}

pub struct FilterBaker {
    surface: tokio::sync::Mutex<Arc<dyn RenderSurface>>,
    options: BakeOptions,
}

impl FilterBaker {
    pub fn new(surface: Arc<dyn RenderSurface>, options: BakeOptions) -> Self {
        Self {
            surface: tokio::sync::Mutex::new(surface),
            options,
        }
    }

    pub fn with_cpu_surface(options: BakeOptions) -> Self {
        Self::new(Arc::new(CpuSurface::new()), options)
    }

    /// Bake `job` and encode the result to `dest`.
    ///
    /// A job whose filter is a no-op is not rasterised: the source path comes back unchanged.
    pub async fn bake(&self, job: &BakeJob, target: BakeTarget, dest: &Path) -> Result<PathBuf, Error> {
        if job.params.is_noop() {
            trace!(source = %job.source.display(), "identity filter; bake skipped");
            return Ok(job.source.clone());
        }
        if !within(Dimensions::new(job.width, job.height), target.max_dim) {
            debug!(
                source = %job.source.display(),
                width = job.width,
                height = job.height,
                max_dim = target.max_dim,
                "downscaling before bake"
            );
        }

        let source = job.source.clone();
        let max_dim = target.max_dim;
        let frame = tokio::task::spawn_blocking(move || {
            decode_rgba8_apply_exif(&source).and_then(|img| downscale_to(img, max_dim))
        })
        .await
        .map_err(|err| Error::export_io(&job.source, err))?
        .map_err(|err| Error::export_io(&job.source, format!("{err:#}")))?;

        let snapshot = {
            let surface = self.surface.lock().await;
            let done = surface.submit(frame, job.params);
            self.poll_snapshot(surface.as_ref(), done).await?
        };

        let dest = dest.to_path_buf();
        let out = dest.clone();
        let quality = target.quality;
        tokio::task::spawn_blocking(move || encode_jpeg(&snapshot, &out, quality))
            .await
            .map_err(|err| Error::export_io(&dest, err))?
            .map_err(|err| Error::export_io(&dest, format!("{err:#}")))?;
        debug!(dest = %dest.display(), "bake written");
        Ok(dest)
    }

    /// [`bake`](Self::bake), degrading to the unbaked source on any failure.
    pub async fn bake_or_passthrough(&self, job: &BakeJob, target: BakeTarget, dest: &Path) -> PathBuf {
        match self.bake(job, target, dest).await {
            Ok(path) => path,
            Err(err) => {
                warn!(source = %job.source.display(), error = %err, "filter bake failed; keeping unfiltered image");
                job.source.clone()
            }
        }
    }

    async fn poll_snapshot(
        &self,
        surface: &dyn RenderSurface,
        mut done: Option<oneshot::Receiver<()>>,
    ) -> Result<RgbaImage, Error> {
        let attempts = self.options.max_attempts.max(1);
        let delay = self.options.retry_delay;
        for attempt in 1..=attempts {
            if let Some(frame) = surface.snapshot() {
                trace!(attempt, "snapshot ready");
                return Ok(frame);
            }
            match done.as_mut() {
                Some(signal) => {
                    // completed or dropped, either way stop waiting on it
                    if timeout(delay, signal).await.is_ok() {
                        done = None;
                    }
                }
                None => sleep(delay).await,
            }
        }
        Err(Error::BakeTimeout { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::color_matrix::ColorMatrix;
    use image::Rgba;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct NeverReady;

    impl RenderSurface for NeverReady {
        fn submit(&self, _frame: RgbaImage, _params: FilterParams) -> Option<oneshot::Receiver<()>> {
            None
        }

        fn snapshot(&self) -> Option<RgbaImage> {
            None
        }
    }

    /// Produces its frame only after a number of snapshot polls.
    struct LateSurface {
        polls: AtomicU32,
        ready_after: u32,
        frame: Mutex<Option<RgbaImage>>,
    }

    impl RenderSurface for LateSurface {
        fn submit(&self, mut frame: RgbaImage, params: FilterParams) -> Option<oneshot::Receiver<()>> {
            apply_filter(&mut frame, &params);
            *self.frame.lock().unwrap() = Some(frame);
            None
        }

        fn snapshot(&self) -> Option<RgbaImage> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_after {
                self.frame.lock().unwrap().take()
            } else {
                None
            }
        }
    }

    fn write_source(dir: &Path) -> PathBuf {
        let path = dir.join("source.png");
        RgbaImage::from_pixel(40, 20, Rgba([200, 60, 20, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn job(source: PathBuf, params: FilterParams) -> BakeJob {
        BakeJob {
            source,
            width: 40,
            height: 20,
            params,
        }
    }

    const TARGET: BakeTarget = BakeTarget {
        max_dim: 16,
        quality: 90,
    };

    #[tokio::test]
    async fn identity_passes_through_without_surface() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path());
        let baker = FilterBaker::new(Arc::new(NeverReady), BakeOptions::default());
        let out = baker
            .bake(&job(source.clone(), FilterParams::default()), TARGET, &dir.path().join("x.jpg"))
            .await
            .unwrap();
        assert_eq!(out, source);
    }

    #[tokio::test]
    async fn cpu_surface_bakes_and_downscales() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path());
        let baker = FilterBaker::with_cpu_surface(BakeOptions::default());
        let params = FilterParams::new(ColorMatrix::grayscale(1.0), None);
        let dest = dir.path().join("baked").join("gray.jpg");
        let out = baker.bake(&job(source, params), TARGET, &dest).await.unwrap();
        assert_eq!(out, dir.path().join("baked").join("gray.jpg"));
        let img = image::open(&out).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (16, 8));
        let p = img.get_pixel(8, 4);
        assert!((i32::from(p[0]) - i32::from(p[2])).abs() <= 6, "{p:?}");
    }

    #[tokio::test]
    async fn late_snapshot_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path());
        let surface = Arc::new(LateSurface {
            polls: AtomicU32::new(0),
            ready_after: 4,
            frame: Mutex::new(None),
        });
        let options = BakeOptions {
            max_attempts: 10,
            retry_delay: Duration::from_millis(1),
        };
        let baker = FilterBaker::new(surface.clone(), options);
        let params = FilterParams::new(ColorMatrix::sepia(1.0), None);
        let out = baker.bake(&job(source, params), TARGET, &dir.path().join("late.jpg")).await.unwrap();
        assert!(out.exists());
        assert_eq!(surface.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_surface_times_out_and_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path());
        let baker = FilterBaker::new(Arc::new(NeverReady), BakeOptions::default());
        let params = FilterParams::new(ColorMatrix::sepia(1.0), None);
        let bake_job = job(source.clone(), params);

        let dest = dir.path().join("stall.jpg");
        let err = baker.bake(&bake_job, TARGET, &dest).await.unwrap_err();
        assert!(matches!(err, Error::BakeTimeout { attempts: 10 }));

        let fallback = baker.bake_or_passthrough(&bake_job, TARGET, &dest).await;
        assert_eq!(fallback, source);
    }

    #[tokio::test]
    async fn missing_source_is_export_failure() {
        let dir = tempfile::tempdir().unwrap();
        let baker = FilterBaker::with_cpu_surface(BakeOptions::default());
        let params = FilterParams::new(ColorMatrix::sepia(1.0), None);
        let err = baker
            .bake(&job(dir.path().join("missing.png"), params), TARGET, &dir.path().join("m.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExportIo { .. }));
    }
}
