use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, warn};

struct QueuedTask {
    name: String,
    job: BoxFuture<'static, Result<()>>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedTask>,
    draining: bool,
    busy: bool,
}

/// Single-flight FIFO queue for slow export work.
///
/// Rules:
/// - Tasks run one at a time, strictly in submission order.
/// - A failing or panicking task is logged and the drain moves on.
/// - Idle means nothing pending and nothing running; callers poll it.
/// - `clear` drops pending tasks; the running one finishes on its own.
#[derive(Clone, Default)]
pub struct ExportQueue {
    state: Arc<Mutex<QueueState>>,
}

impl ExportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `job` and start draining if the queue was stopped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue<F>(&self, name: impl Into<String>, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let start_drain = {
            let mut state = self.lock();
            state.pending.push_back(QueuedTask {
                name: name.clone(),
                job: job.boxed(),
            });
            debug!(task = %name, pending = state.pending.len(), "export task queued");
            !std::mem::replace(&mut state.draining, true)
        };
        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.state)));
        }
    }

    /// Tasks not yet started.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether a task is executing right now.
    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() && !state.busy
    }

    /// Drop every pending task; returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        if dropped > 0 {
            debug!(dropped, "export queue cleared");
        }
        dropped
    }

    /// Poll [`is_idle`](Self::is_idle) every `poll_interval` until it holds or `timeout` passes.
    pub async fn wait_idle(&self, poll_interval: Duration, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(poll_interval).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn drain(state: Arc<Mutex<QueueState>>) {
    loop {
        let next = {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.pending.pop_front() {
                Some(task) => {
                    guard.busy = true;
                    task
                }
                None => {
                    guard.busy = false;
                    guard.draining = false;
                    return;
                }
            }
        };

        let QueuedTask { name, job } = next;
        debug!(task = %name, "export task started");
        // a separate task isolates panics from the drain loop
        match tokio::spawn(job).await {
            Ok(Ok(())) => debug!(task = %name, "export task finished"),
            Ok(Err(err)) => warn!(task = %name, error = ?err, "export task failed"),
            Err(join_err) => error!(task = %name, "export task aborted: {join_err}"),
        }

        state.lock().unwrap_or_else(PoisonError::into_inner).busy = false;
    }
}
