//! Photo discovery: expand files and directories into an ordered photo list.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::Error;
use crate::photo::ImageRef;
use crate::processing::imaging;

/// Options controlling directory scanning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Whether to recurse into subdirectories.
    pub recursive: bool,
    /// Optional override for allowed extensions (lowercase, without dot).
    pub exts: Option<Vec<&'static str>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            exts: None,
        }
    }
}

#[must_use]
pub fn is_supported_image(path: &Path, exts: Option<&[&str]>) -> bool {
    let default_exts: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
    let exts = exts.unwrap_or(default_exts);
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            exts.iter().any(|e| *e == ext)
        })
}

/// Expand `inputs` in order. Files are taken as given; directories are walked
/// in file-name order.
///
/// # Errors
/// Returns [`Error::MissingInput`] for the first input that does not exist.
pub fn discover(inputs: &[PathBuf], opts: &ScanOptions) -> Result<Vec<PathBuf>, Error> {
    if let Some(missing) = inputs.iter().find(|p| !p.exists()) {
        return Err(Error::MissingInput(missing.clone()));
    }

    let mut out = Vec::new();
    for input in inputs {
        if input.is_file() {
            out.push(input.clone());
            continue;
        }
        let mut wd = WalkDir::new(input).sort_by_file_name();
        if !opts.recursive {
            wd = wd.max_depth(1);
        }
        for entry in wd.into_iter().filter_entry(|e| !is_hidden_dir(e)).flatten() {
            let path = entry.path();
            if entry.file_type().is_file() && is_supported_image(path, opts.exts.as_deref()) {
                out.push(path.to_path_buf());
            }
        }
    }
    debug!(found = out.len(), "photo discovery complete");
    Ok(out)
}

/// Read natural dimensions for each path, skipping files that cannot be identified.
pub fn identify_all(paths: &[PathBuf]) -> Vec<ImageRef> {
    paths
        .iter()
        .filter_map(|path| match imaging::identify(path) {
            Ok(dims) => Some(ImageRef::new(path.clone(), dims)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable photo");
                None
            }
        })
        .collect()
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    // tempdir roots can start with a dot
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| n.starts_with('.'))
}
