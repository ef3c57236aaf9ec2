//! Local draft store: a JSON snapshot of every photo's edit, with an expiry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::photo::PhotoDraft;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRecord {
    pub saved_at: DateTime<Utc>,
    pub photos: Vec<PhotoDraft>,
}

impl DraftRecord {
    pub fn find(&self, source: &Path) -> Option<&PhotoDraft> {
        self.photos.iter().find(|d| d.source == source)
    }
}

#[derive(Debug, Clone)]
pub struct DraftStore {
    path: PathBuf,
    ttl: Duration,
}

impl DraftStore {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, photos: Vec<PhotoDraft>) -> Result<DraftRecord, Error> {
        let record = DraftRecord {
            saved_at: Utc::now(),
            photos,
        };
        self.write(&record).await?;
        Ok(record)
    }

    /// Write via a sibling temp file so a crash never leaves half a draft.
    pub async fn write(&self, record: &DraftRecord) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), photos = record.photos.len(), "draft saved");
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<DraftRecord>, Error> {
        self.load_at(Utc::now()).await
    }

    /// Load the draft as seen at `now`; expired or unreadable drafts are deleted.
    pub async fn load_at(&self, now: DateTime<Utc>) -> Result<Option<DraftRecord>, Error> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record: DraftRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "discarding unreadable draft");
                self.clear().await?;
                return Ok(None);
            }
        };
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        if now.signed_duration_since(record.saved_at) > ttl {
            info!(path = %self.path.display(), saved_at = %record.saved_at, "draft expired");
            self.clear().await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub async fn clear(&self) -> Result<(), Error> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
