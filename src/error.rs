use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Library error type for editor and export operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A colour matrix did not have exactly 20 elements.
    #[error("invalid matrix shape: expected 20 elements, got {len}")]
    InvalidMatrixShape { len: usize },

    /// A computed crop rectangle failed the square/in-bounds invariant.
    #[error("invalid crop geometry: {0}")]
    GeometryInvalid(String),

    /// The render surface did not produce a snapshot within the retry budget.
    #[error("filter bake produced no snapshot after {attempts} attempts")]
    BakeTimeout { attempts: u32 },

    /// Crop, resize or encode failed for a specific artifact.
    #[error("export failed for {path}: {reason}")]
    ExportIo { path: PathBuf, reason: String },

    /// Background exports did not finish within the checkout wait.
    #[error("still processing: {pending} export(s) outstanding after {waited:?}")]
    QueueTimeout { waited: Duration, pending: usize },

    /// A superseded or torn-down job tried to write its result.
    #[error("stale write suppressed for photo {index} (generation {generation})")]
    StaleWriteSuppressed { index: usize, generation: u64 },

    /// The editing session has no photo at the requested index.
    #[error("no photo at index {0}")]
    NoSuchPhoto(usize),

    /// Checkout was attempted before a photo had its exported artifacts.
    #[error("photo {0} has no exported artifact yet")]
    MissingArtifact(usize),

    /// A photo input passed on the command line does not exist.
    #[error("input path does not exist: {}", .0.display())]
    MissingInput(PathBuf),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (draft store) error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn export_io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ExportIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors the pipeline absorbs silently (logged, never shown to the user).
    #[must_use]
    pub fn is_degradable(&self) -> bool {
        !matches!(self, Self::QueueTimeout { .. } | Self::MissingArtifact(_))
    }
}
