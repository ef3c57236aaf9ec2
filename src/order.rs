//! Checkout hand-off: upload finished artifacts and describe each order line.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Error;
use crate::photo::Photo;
use crate::processing::geometry::CropRect;

/// Remote storage for exported artifacts.
pub trait Uploader: Send + Sync {
    /// Store `local` under `remote_path` and return the URL it can be fetched from.
    fn upload(&self, local: &Path, remote_path: &str) -> impl Future<Output = Result<String, Error>> + Send;
}

/// Uploader that copies artifacts under a local directory.
#[derive(Debug, Clone)]
pub struct LocalDirUploader {
    root: PathBuf,
}

impl LocalDirUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Uploader for LocalDirUploader {
    async fn upload(&self, local: &Path, remote_path: &str) -> Result<String, Error> {
        let dest = self.root.join(remote_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &dest)
            .await
            .map_err(|err| Error::export_io(&dest, err))?;
        debug!(from = %local.display(), to = %dest.display(), "artifact copied");
        Ok(dest.display().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Preview,
    Print,
}

impl ArtifactKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Print => "print",
        }
    }
}

#[must_use]
pub fn remote_path(order_id: &str, index: usize, kind: ArtifactKind) -> String {
    format!("orders/{order_id}/{index}-{}.jpg", kind.as_str())
}

/// What order creation records per tile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub index: usize,
    pub source: PathBuf,
    pub crop_px: CropRect,
    pub filter_id: String,
    pub preview_url: String,
    pub print_url: String,
}

/// Upload every photo's artifacts and build its order line.
///
/// # Errors
/// [`Error::MissingArtifact`] if any photo lacks a committed crop or a print
/// artifact; nothing is uploaded in that case.
pub async fn build_order_lines<U: Uploader>(
    photos: &[Photo],
    order_id: &str,
    uploader: &U,
) -> Result<Vec<OrderLine>, Error> {
    if let Some(index) = photos
        .iter()
        .position(|p| p.committed.is_none() || p.output.view_uri.is_none())
    {
        return Err(Error::MissingArtifact(index));
    }

    let mut lines = Vec::with_capacity(photos.len());
    for (index, photo) in photos.iter().enumerate() {
        let (Some(committed), Some(view)) = (&photo.committed, &photo.output.view_uri) else {
            return Err(Error::MissingArtifact(index));
        };
        // the print artifact doubles as preview when the fast path failed
        let preview = photo.output.preview_uri.as_ref().unwrap_or(view);
        let preview_url = uploader
            .upload(preview, &remote_path(order_id, index, ArtifactKind::Preview))
            .await?;
        let print_url = uploader
            .upload(view, &remote_path(order_id, index, ArtifactKind::Print))
            .await?;
        lines.push(OrderLine {
            index,
            source: photo.source.uri.clone(),
            crop_px: committed.crop_px,
            filter_id: committed.filter_id.clone(),
            preview_url,
            print_url,
        });
    }
    info!(order_id, lines = lines.len(), "order lines built");
    Ok(lines)
}
