use std::sync::Arc;

use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::draft::DraftStore;
use crate::photo::{Photo, PhotoSet};

/// Handle to the background draft writer.
pub struct Autosave {
    flush_tx: mpsc::Sender<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Autosave {
    /// Persist now, skipping any pending debounce. Returns once the write finished.
    pub async fn flush(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.flush_tx.send(reply_tx).await.is_err() {
            return false;
        }
        reply_rx.await.is_ok()
    }

    /// Wait for the writer to stop after its cancellation token fired.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!("autosave task aborted: {err}");
        }
    }
}

/// Debounced draft writer.
///
/// Rules:
/// - Every change to the photo set (re)starts a `debounce` timer.
/// - A burst of edits collapses into one write of the latest snapshot.
/// - `flush` writes immediately; cancellation writes anything still pending.
pub fn spawn(store: DraftStore, photos: &PhotoSet, debounce: Duration, cancel: CancellationToken) -> Autosave {
    let (flush_tx, flush_rx) = mpsc::channel(4);
    let task = tokio::spawn(run(store, photos.subscribe(), flush_rx, debounce, cancel));
    Autosave { flush_tx, task }
}

async fn run(
    store: DraftStore,
    mut photos_rx: watch::Receiver<Arc<Vec<Photo>>>,
    mut flush_rx: mpsc::Receiver<oneshot::Sender<()>>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        select! {
            _ = cancel.cancelled() => {
                if deadline.is_some() || photos_rx.has_changed().unwrap_or(false) {
                    save(&store, &mut photos_rx).await;
                }
                break;
            }

            changed = photos_rx.changed() => {
                if changed.is_err() {
                    // photo set dropped; write what we have and stop
                    if deadline.is_some() {
                        save(&store, &mut photos_rx).await;
                    }
                    break;
                }
                deadline = Some(Instant::now() + debounce);
            }

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                save(&store, &mut photos_rx).await;
            }

            Some(reply) = flush_rx.recv() => {
                deadline = None;
                save(&store, &mut photos_rx).await;
                let _ = reply.send(());
            }
        }
    }
    debug!("autosave stopped");
}

async fn save(store: &DraftStore, photos_rx: &mut watch::Receiver<Arc<Vec<Photo>>>) {
    let drafts = photos_rx
        .borrow_and_update()
        .iter()
        .map(Photo::to_draft)
        .collect();
    if let Err(err) = store.save(drafts).await {
        warn!(path = %store.path().display(), error = %err, "draft save failed");
    }
}
