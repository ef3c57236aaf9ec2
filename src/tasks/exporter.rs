//! Dual-resolution export: a fast preview on advance, the print copy in the background.
//!
//! Rules:
//! - The preview is cut from the working copy with the UI-space rect and is
//!   written before `advance` returns.
//! - The print job re-derives the rect against the original file and runs on
//!   the [`ExportQueue`] so the editor never waits for it.
//! - Every write-back carries the photo's generation. Only the latest advance
//!   of a photo, in a live session, may touch its record.
//! - Checkout waits for queue idle and a print artifact on every photo.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ExportTarget, QueueOptions};
use crate::error::Error;
use crate::events::AdvanceOutcome;
use crate::photo::{Committed, EditState, ImageRef, Photo, PhotoSet};
use crate::processing::filters::{self, FilterParams};
use crate::processing::geometry::{CropRect, CropView, Dimensions, crop_or_default};
use crate::processing::imaging;
use crate::tasks::baker::{BakeJob, BakeTarget, FilterBaker};
use crate::tasks::export_queue::ExportQueue;

/// Where and how big the two artifacts are.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    pub preview: ExportTarget,
    pub print: ExportTarget,
    pub queue: QueueOptions,
}

struct Shared {
    photos: PhotoSet,
    baker: Arc<FilterBaker>,
    settings: ExportSettings,
    next_generation: AtomicU64,
    latest: Box<[AtomicU64]>,
    live: CancellationToken,
}

impl Shared {
    fn is_current(&self, index: usize, generation: u64) -> bool {
        !self.live.is_cancelled()
            && self
                .latest
                .get(index)
                .is_some_and(|g| g.load(Ordering::SeqCst) == generation)
    }

    fn write_back<F>(&self, index: usize, generation: u64, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Photo),
    {
        // checked under the photo set's lock so a re-advance cannot slip in between
        let applied = self.photos.update_if(index, |photo| {
            if !self.is_current(index, generation) {
                return false;
            }
            f(photo);
            true
        })?;
        if applied {
            Ok(())
        } else {
            debug!(index, generation, "stale write suppressed");
            Err(Error::StaleWriteSuppressed { index, generation })
        }
    }

    fn artifact_path(&self, kind: &str, index: usize, generation: u64, suffix: &str) -> PathBuf {
        self.settings
            .output_dir
            .join(kind)
            .join(format!("{index:03}-g{generation}{suffix}.jpg"))
    }
}

pub struct ExportPipeline {
    shared: Arc<Shared>,
    queue: ExportQueue,
}

impl ExportPipeline {
    pub fn new(
        photos: PhotoSet,
        baker: Arc<FilterBaker>,
        queue: ExportQueue,
        settings: ExportSettings,
        live: CancellationToken,
    ) -> Self {
        let latest = (0..photos.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            shared: Arc::new(Shared {
                photos,
                baker,
                settings,
                next_generation: AtomicU64::new(0),
                latest,
                live,
            }),
            queue,
        }
    }

    pub fn photos(&self) -> &PhotoSet {
        &self.shared.photos
    }

    pub fn queue(&self) -> &ExportQueue {
        &self.queue
    }

    /// Token whose cancellation turns every outstanding write-back into a no-op.
    pub fn liveness(&self) -> CancellationToken {
        self.shared.live.clone()
    }

    /// Generation of the latest advance of `index`, 0 if never advanced.
    pub fn generation(&self, index: usize) -> u64 {
        self.shared
            .latest
            .get(index)
            .map_or(0, |g| g.load(Ordering::SeqCst))
    }

    /// Commit the photo at `index` and export it.
    ///
    /// `view` is `None` until the editor has a layout; the call is then a no-op.
    pub async fn advance(&self, index: usize, view: Option<CropView>) -> Result<AdvanceOutcome, Error> {
        let Some(view) = view else {
            debug!(index, "advance ignored: layout not established");
            return Ok(AdvanceOutcome::NotReady);
        };
        let photo = self.shared.photos.get(index).ok_or(Error::NoSuchPhoto(index))?;
        if self.shared.live.is_cancelled() {
            return Err(Error::StaleWriteSuppressed {
                index,
                generation: self.generation(index),
            });
        }

        let displayed = photo.displayed().clone();
        let source = photo.source.clone();
        let ui_rect = crop_or_default(&view, displayed.dimensions, displayed.dimensions);
        let source_rect = crop_or_default(&view, displayed.dimensions, source.dimensions);

        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(slot) = self.shared.latest.get(index) {
            slot.store(generation, Ordering::SeqCst);
        }
        let filter_id = photo.edit.filter_id.clone();
        let params = filters::params_for(&filter_id);
        debug!(index, generation, ?ui_rect, ?source_rect, filter = %filter_id, "advance");

        let preview = match render_preview(&self.shared, index, generation, &displayed, ui_rect, params).await {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(index, generation, error = %err, "preview export failed");
                None
            }
        };

        let edit = EditState {
            crop: view.transform,
            filter_id: filter_id.clone(),
        };
        self.shared.write_back(index, generation, move |p| {
            p.edit = edit;
            p.committed = Some(Committed {
                crop_px: source_rect,
                filter_id,
                filter_params: params,
            });
            p.output.preview_uri = preview;
            p.output.view_uri = None;
        })?;

        let shared = Arc::clone(&self.shared);
        self.queue.enqueue(format!("print #{index} g{generation}"), async move {
            render_print(shared, index, generation, view, displayed.dimensions, source, params).await
        });

        if index + 1 < self.shared.photos.len() {
            return Ok(AdvanceOutcome::Advanced { next: index + 1 });
        }
        self.wait_for_checkout().await?;
        Ok(AdvanceOutcome::ReadyForCheckout)
    }

    /// Block until the queue is idle and every photo has its print artifact.
    ///
    /// Safe to call again after a [`Error::QueueTimeout`].
    pub async fn wait_for_checkout(&self) -> Result<(), Error> {
        let QueueOptions {
            poll_interval,
            ready_timeout,
        } = self.shared.settings.queue;
        let started = Instant::now();
        loop {
            if self.queue.is_idle() && self.shared.photos.all_views_ready() {
                info!(waited = ?started.elapsed(), "all print artifacts ready");
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= ready_timeout {
                let pending = self.shared.photos.pending_views().len();
                warn!(?waited, pending, queued = self.queue.pending_count(), "checkout gate timed out");
                return Err(Error::QueueTimeout { waited, pending });
            }
            sleep(poll_interval).await;
        }
    }

    /// Stop every outstanding job from writing and drop queued ones.
    pub fn shutdown(&self) {
        self.shared.live.cancel();
        let dropped = self.queue.clear();
        debug!(dropped, "export pipeline shut down");
    }
}

async fn render_preview(
    shared: &Shared,
    index: usize,
    generation: u64,
    displayed: &ImageRef,
    rect: CropRect,
    params: FilterParams,
) -> Result<PathBuf, Error> {
    let target = shared.settings.preview;
    let cropped = shared.artifact_path("preview", index, generation, "");
    let dims = crop_to_file(&displayed.uri, rect, &cropped, target).await?;
    let baked = shared.artifact_path("preview", index, generation, "-filtered");
    Ok(bake(shared, &cropped, dims, params, target, &baked).await)
}

async fn render_print(
    shared: Arc<Shared>,
    index: usize,
    generation: u64,
    view: CropView,
    displayed: Dimensions,
    source: ImageRef,
    params: FilterParams,
) -> anyhow::Result<()> {
    if !shared.is_current(index, generation) {
        debug!(index, generation, "print job superseded before start");
        return Ok(());
    }

    let uri = source.uri.clone();
    let actual = tokio::task::spawn_blocking(move || imaging::identify(&uri))
        .await?
        .with_context(|| format!("print #{index}: cannot read original"))?;
    if actual != source.dimensions {
        debug!(index, recorded = ?source.dimensions, ?actual, "original dimensions differ from record");
    }
    let rect = crop_or_default(&view, displayed, actual);

    let target = shared.settings.print;
    let cropped = shared.artifact_path("print", index, generation, "");
    let dims = crop_to_file(&source.uri, rect, &cropped, target).await?;
    let baked = shared.artifact_path("print", index, generation, "-filtered");
    let path = bake(&shared, &cropped, dims, params, target, &baked).await;

    let written = path.clone();
    match shared.write_back(index, generation, move |p| {
        p.output.view_uri = Some(written);
        if let Some(committed) = p.committed.as_mut() {
            committed.crop_px = rect;
        }
    }) {
        Ok(()) => {
            info!(index, generation, path = %path.display(), "print artifact ready");
            Ok(())
        }
        Err(Error::StaleWriteSuppressed { .. }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn crop_to_file(
    source: &Path,
    rect: CropRect,
    dest: &Path,
    target: ExportTarget,
) -> Result<Dimensions, Error> {
    let src = source.to_path_buf();
    let out = dest.to_path_buf();
    tokio::task::spawn_blocking(move || imaging::export_crop(&src, rect, &out, target.max_dim, target.quality))
        .await
        .map_err(|err| Error::export_io(dest, err))?
        .map_err(|err| Error::export_io(dest, format!("{err:#}")))
}

async fn bake(
    shared: &Shared,
    input: &Path,
    dims: Dimensions,
    params: FilterParams,
    target: ExportTarget,
    dest: &Path,
) -> PathBuf {
    let job = BakeJob {
        source: input.to_path_buf(),
        width: dims.width,
        height: dims.height,
        params,
    };
    let bake_target = BakeTarget {
        max_dim: target.bake_max_dim,
        quality: target.quality,
    };
    shared.baker.bake_or_passthrough(&job, bake_target, dest).await
}
