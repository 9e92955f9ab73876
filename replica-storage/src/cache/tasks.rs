//! Recorded background work.
//!
//! Background preloads, prepares started by non-blocking reads and TTL
//! re-arms are spawned through [`BackgroundTasks`] so their handles can be
//! awaited or aborted later.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use super::lock;

#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` on the current runtime and record its handle.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut handles = lock(&self.handles);
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    /// Number of recorded tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        lock(&self.handles)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Wait until every recorded task, including tasks spawned while
    /// waiting, has finished.
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.handles));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Replication cache background task panicked");
                    }
                }
            }
        }
    }

    /// Abort every recorded task.
    pub fn abort_all(&self) {
        for handle in lock(&self.handles).drain(..) {
            handle.abort();
        }
    }
}
