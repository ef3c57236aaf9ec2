//! One editing session: the photos, the live controller, and the export machinery.
//!
//! The session creates its own queue, baker, and cancellation token on start and
//! tears them down on [`EditingSession::teardown`]. Nothing here is global.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::draft::DraftStore;
use crate::error::Error;
use crate::events::AdvanceOutcome;
use crate::gesture::TransformController;
use crate::photo::{ImageRef, Photo, PhotoSet};
use crate::processing::filters;
use crate::processing::geometry::{CropView, FrameRect, Size, Transform};
use crate::processing::imaging;
use crate::tasks::autosave::{self, Autosave};
use crate::tasks::baker::{FilterBaker, RenderSurface};
use crate::tasks::export_queue::ExportQueue;
use crate::tasks::exporter::{ExportPipeline, ExportSettings};

pub struct EditingSession {
    config: Configuration,
    photos: PhotoSet,
    pipeline: ExportPipeline,
    controller: TransformController,
    current: usize,
    cancel: CancellationToken,
    drafts: Option<DraftStore>,
    autosave: Option<Autosave>,
}

impl EditingSession {
    /// Prepare working and thumbnail copies, restore any draft, and open photo 0.
    pub async fn start(
        config: Configuration,
        sources: Vec<ImageRef>,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<Self, Error> {
        if sources.is_empty() {
            return Err(Error::NoSuchPhoto(0));
        }

        let mut photos = Vec::with_capacity(sources.len());
        for (index, source) in sources.into_iter().enumerate() {
            photos.push(prepare_photo(&config, index, source).await);
        }

        let drafts = config
            .draft
            .path
            .as_ref()
            .map(|path| DraftStore::new(path, config.draft.ttl));
        if let Some(store) = &drafts {
            match store.load().await {
                Ok(Some(record)) => {
                    let mut restored = 0;
                    for photo in &mut photos {
                        if let Some(draft) = record.find(&photo.source.uri) {
                            photo.apply_draft(draft);
                            drop_missing_outputs(photo);
                            restored += 1;
                        }
                    }
                    info!(restored, saved_at = %record.saved_at, "draft restored");
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "draft could not be loaded"),
            }
        }

        let photos = PhotoSet::new(photos);
        let cancel = CancellationToken::new();
        let queue = ExportQueue::new();
        let baker = Arc::new(FilterBaker::new(surface, config.bake.clone()));
        let settings = ExportSettings {
            output_dir: config.output_dir.clone(),
            preview: config.preview.target(),
            print: config.print.target(),
            queue: config.queue.clone(),
        };
        let pipeline = ExportPipeline::new(photos.clone(), baker, queue, settings, cancel.child_token());

        let container = Size::new(config.viewport.width, config.viewport.height);
        let frame = FrameRect::centered_square(container, config.viewport.frame_margin);
        let first = photos.get(0).ok_or(Error::NoSuchPhoto(0))?;
        let mut controller =
            TransformController::new(first.displayed().dimensions, container, frame, config.gesture.clone());
        controller.load_photo(first.displayed().dimensions, saved_transform(&first));

        let autosave = drafts
            .clone()
            .map(|store| autosave::spawn(store, &photos, config.draft.debounce, cancel.child_token()));

        info!(photos = photos.len(), "editing session started");
        Ok(Self {
            config,
            photos,
            pipeline,
            controller,
            current: 0,
            cancel,
            drafts,
            autosave,
        })
    }

    pub fn photos(&self) -> &PhotoSet {
        &self.photos
    }

    pub fn pipeline(&self) -> &ExportPipeline {
        &self.pipeline
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn controller(&self) -> &TransformController {
        &self.controller
    }

    /// Gesture input goes straight to the controller.
    pub fn controller_mut(&mut self) -> &mut TransformController {
        &mut self.controller
    }

    /// Switch the editor to `index`, persisting the draft first.
    ///
    /// The transform on screen is stored on the photo being left, so coming
    /// back to it later restores the same framing.
    pub async fn select(&mut self, index: usize) -> Result<(), Error> {
        let photo = self.photos.get(index).ok_or(Error::NoSuchPhoto(index))?;
        self.stash_transform()?;
        if let Some(autosave) = &self.autosave {
            autosave.flush().await;
        }
        self.controller
            .load_photo(photo.displayed().dimensions, saved_transform(&photo));
        self.current = index;
        debug!(index, "photo selected");
        Ok(())
    }

    /// Thumbnail strip in photo order; photos without a thumbnail show their source.
    pub fn thumbnails(&self) -> Vec<PathBuf> {
        self.photos
            .snapshot()
            .iter()
            .map(|p| p.thumbnail.as_ref().unwrap_or(&p.source).uri.clone())
            .collect()
    }

    /// Viewport resize: rebuild the crop frame and re-clamp the live transform.
    pub fn resize_viewport(&mut self, width: f64, height: f64) {
        let container = Size::new(width, height);
        let frame = FrameRect::centered_square(container, self.config.viewport.frame_margin);
        self.controller.set_layout(container, frame);
        debug!(width, height, "viewport resized");
    }

    /// Store a settled transform (e.g. from `pan_end`) on the current photo.
    pub fn record_transform(&self, transform: Transform) -> Result<(), Error> {
        self.photos
            .update(self.current, |p| p.edit.crop = transform)
    }

    /// Pick a filter for the current photo; unknown ids fall back to the original look.
    pub fn set_filter(&self, filter_id: &str) -> Result<(), Error> {
        let id = match filters::lookup(filter_id) {
            Some(preset) => preset.id,
            None => {
                warn!(filter = filter_id, "unknown filter; using original");
                filters::ORIGINAL
            }
        };
        self.photos
            .update(self.current, |p| p.edit.filter_id = id.to_string())
    }

    /// The view to export, or `None` while the user is mid-gesture.
    pub fn view(&self) -> Option<CropView> {
        if self.controller.is_gesture_active() {
            return None;
        }
        let view = self.controller.view();
        (view.frame.width > 0.0 && view.frame.height > 0.0).then_some(view)
    }

    /// Next/Finish: export the current photo and move on.
    ///
    /// On the last photo this waits for the checkout gate and may return
    /// [`Error::QueueTimeout`]; call [`retry_checkout`](Self::retry_checkout) to wait again.
    pub async fn advance(&mut self) -> Result<AdvanceOutcome, Error> {
        if self.controller.is_settling() {
            self.controller.tick(self.config.gesture.settle_duration);
        }
        let outcome = self.pipeline.advance(self.current, self.view()).await?;
        if let AdvanceOutcome::Advanced { next } = outcome {
            self.select(next).await?;
        }
        Ok(outcome)
    }

    fn stash_transform(&self) -> Result<(), Error> {
        let resting = self.controller.clamp(self.controller.transform());
        let stored = self.photos.get(self.current).map(|p| p.edit.crop);
        if stored == Some(resting) {
            return Ok(());
        }
        self.record_transform(resting)
    }

    pub async fn retry_checkout(&self) -> Result<(), Error> {
        self.pipeline.wait_for_checkout().await
    }

    /// Order placed: the draft is no longer needed.
    pub async fn complete(self) -> Result<(), Error> {
        let drafts = self.drafts.clone();
        self.teardown().await;
        if let Some(store) = drafts {
            store.clear().await?;
        }
        Ok(())
    }

    /// Stop background work. Queued exports are dropped and late results ignored.
    pub async fn teardown(self) {
        self.pipeline.shutdown();
        self.cancel.cancel();
        if let Some(autosave) = self.autosave {
            autosave.join().await;
        }
        info!("editing session closed");
    }
}

fn saved_transform(photo: &Photo) -> Option<Transform> {
    (photo.committed.is_some() || photo.edit.crop != Transform::default()).then_some(photo.edit.crop)
}

fn drop_missing_outputs(photo: &mut Photo) {
    let exists = |p: &Option<PathBuf>| p.as_deref().is_some_and(Path::exists);
    if !exists(&photo.output.preview_uri) {
        photo.output.preview_uri = None;
    }
    if !exists(&photo.output.view_uri) {
        photo.output.view_uri = None;
    }
}

/// Create the working and thumbnail copies. Failures leave the editor on the source.
async fn prepare_photo(config: &Configuration, index: usize, source: ImageRef) -> Photo {
    let mut photo = Photo::new(source);
    if !photo.source.dimensions.is_valid() {
        warn!(index, path = %photo.source.uri.display(), "photo has no usable dimensions");
        return photo;
    }
    photo.working = derivative(config, &photo.source, "working", index, config.working_max_dim).await;
    photo.thumbnail = derivative(config, &photo.source, "thumbs", index, config.thumbnail_max_dim).await;
    photo
}

async fn derivative(
    config: &Configuration,
    source: &ImageRef,
    kind: &str,
    index: usize,
    max_dim: u32,
) -> Option<ImageRef> {
    let src = source.uri.clone();
    let dest = config
        .output_dir
        .join(kind)
        .join(format!("{index:03}.jpg"));
    let out = dest.clone();
    let quality = config.derivative_quality;
    let result =
        tokio::task::spawn_blocking(move || imaging::write_derivative(&src, &out, max_dim, quality)).await;
    match result {
        Ok(Ok(dimensions)) => Some(ImageRef::new(dest, dimensions)),
        Ok(Err(err)) => {
            warn!(index, kind, error = %format!("{err:#}"), "derivative failed");
            None
        }
        Err(err) => {
            warn!(index, kind, "derivative task aborted: {err}");
            None
        }
    }
}
