//! Photo records and the shared, immutably-replaced photo set.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::trace;

use crate::error::Error;
use crate::processing::filters::{self, FilterParams};
use crate::processing::geometry::{CropRect, Dimensions, Transform, default_crop};

/// A file on disk together with its natural (orientation-corrected) size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub uri: PathBuf,
    pub dimensions: Dimensions,
}

impl ImageRef {
    pub fn new(uri: impl Into<PathBuf>, dimensions: Dimensions) -> Self {
        Self {
            uri: uri.into(),
            dimensions,
        }
    }
}

/// What the user is currently looking at for one photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditState {
    pub crop: Transform,
    pub filter_id: String,
}

impl Default for EditState {
    fn default() -> Self {
        Self {
            crop: Transform::default(),
            filter_id: filters::ORIGINAL.to_string(),
        }
    }
}

/// Crop and filter fixed by the last advance, in source pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Committed {
    pub crop_px: CropRect,
    pub filter_id: String,
    pub filter_params: FilterParams,
}

/// Exported artifacts. `view_uri` stays empty until the print job lands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub preview_uri: Option<PathBuf>,
    pub view_uri: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub source: ImageRef,
    /// Downsampled copy shown in the editor; created once per photo.
    pub working: Option<ImageRef>,
    /// Small copy for the filter strip.
    pub thumbnail: Option<ImageRef>,
    pub edit: EditState,
    pub committed: Option<Committed>,
    pub output: Output,
}

impl Photo {
    pub fn new(source: ImageRef) -> Self {
        Self {
            source,
            working: None,
            thumbnail: None,
            edit: EditState::default(),
            committed: None,
            output: Output::default(),
        }
    }

    /// The image the editor displays: the working copy, or the source until one exists.
    pub fn displayed(&self) -> &ImageRef {
        self.working.as_ref().unwrap_or(&self.source)
    }

    pub fn is_view_ready(&self) -> bool {
        self.output.view_uri.is_some()
    }

    pub fn to_draft(&self) -> PhotoDraft {
        let crop = self
            .committed
            .as_ref()
            .map(|c| c.crop_px)
            .unwrap_or_else(|| default_crop(self.source.dimensions));
        PhotoDraft {
            source: self.source.uri.clone(),
            crop,
            filter_id: self.edit.filter_id.clone(),
            filter_params: self.committed.as_ref().map(|c| c.filter_params),
            ui: self.edit.clone(),
            committed: self.committed.clone(),
            output: self.output.clone(),
        }
    }

    /// Restore edit state from a draft saved for the same source.
    pub fn apply_draft(&mut self, draft: &PhotoDraft) {
        self.edit = draft.ui.clone();
        self.committed = draft.committed.clone();
        self.output = draft.output.clone();
    }
}

/// Per-photo record written to the draft store and read by checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoDraft {
    pub source: PathBuf,
    pub crop: CropRect,
    pub filter_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_params: Option<FilterParams>,
    pub ui: EditState,
    #[serde(default)]
    pub committed: Option<Committed>,
    #[serde(default)]
    pub output: Output,
}

/// Ordered photo sequence shared between the editor and background jobs.
///
/// Every change replaces the whole `Arc<Vec<Photo>>` inside the channel, so a
/// writer always starts from the latest snapshot and readers never see a
/// half-applied edit.
#[derive(Clone)]
pub struct PhotoSet {
    tx: Arc<watch::Sender<Arc<Vec<Photo>>>>,
}

impl PhotoSet {
    pub fn new(photos: Vec<Photo>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(photos));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Arc<Vec<Photo>> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Photo>>> {
        self.tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Photo> {
        self.tx.borrow().get(index).cloned()
    }

    /// Apply `f` to the photo at `index` against the latest snapshot.
    pub fn update<F>(&self, index: usize, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Photo),
    {
        self.update_if(index, |photo| {
            f(photo);
            true
        })
        .map(|_| ())
    }

    /// Like [`update`](Self::update), but `f` may decline by returning `false`.
    ///
    /// `f` runs while the snapshot is locked, so a guard checked inside it cannot
    /// go stale before the write lands. A declined update publishes nothing and
    /// returns `Ok(false)`.
    pub fn update_if<F>(&self, index: usize, f: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut Photo) -> bool,
    {
        let mut f = Some(f);
        let mut found = false;
        let changed = self.tx.send_if_modified(|photos| {
            let Some(apply) = f.take() else {
                return false;
            };
            let Some(current) = photos.get(index) else {
                return false;
            };
            found = true;
            let mut photo = current.clone();
            if !apply(&mut photo) {
                return false;
            }
            let mut next = Vec::clone(photos);
            next[index] = photo;
            *photos = Arc::new(next);
            true
        });
        if !found {
            return Err(Error::NoSuchPhoto(index));
        }
        if changed {
            trace!(index, "photo updated");
        }
        Ok(changed)
    }

    /// Every photo has its print artifact.
    pub fn all_views_ready(&self) -> bool {
        self.tx.borrow().iter().all(Photo::is_view_ready)
    }

    /// Indices still waiting on a print artifact.
    pub fn pending_views(&self) -> Vec<usize> {
        self.tx
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_view_ready())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn drafts(&self) -> Vec<PhotoDraft> {
        self.tx.borrow().iter().map(Photo::to_draft).collect()
    }
}
