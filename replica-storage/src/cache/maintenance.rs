//! Periodic cache maintenance.
//!
//! One background task prunes tenants over their share of the size budget
//! and logs statistics, each on its own interval. A zero interval disables
//! that half. The task holds only a weak handle to the cache, so dropping
//! the last [`ReplicationCache`](super::ReplicationCache) ends it as well.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::coordinator::WeakCache;

/// Handle to a running maintenance task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal shutdown and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Replication cache maintenance panicked");
            }
        }
    }
}

pub(crate) fn spawn(
    cache: WeakCache,
    prune_interval: Duration,
    stats_interval: Duration,
) -> MaintenanceHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(maintenance_task(
        cache,
        prune_interval,
        stats_interval,
        shutdown_rx,
    ));
    MaintenanceHandle { shutdown_tx, task }
}

async fn maintenance_task(
    cache: WeakCache,
    prune_interval: Duration,
    stats_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut prune_ticker = ticker(prune_interval);
    let mut stats_ticker = ticker(stats_interval);

    tracing::info!(
        prune_interval_ms = prune_interval.as_millis() as u64,
        stats_interval_ms = stats_interval.as_millis() as u64,
        "Replication cache maintenance started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Replication cache maintenance shutting down");
                    break;
                }
            }
            _ = tick(&mut prune_ticker) => {
                let Some(cache) = cache.upgrade() else { break };
                match cache.prune(None).await {
                    Ok(0) => {}
                    Ok(pruned) => tracing::debug!(pruned, "Replication cache pruned entries"),
                    Err(err) => tracing::error!(error = %err, "Pruning replication cache failed"),
                }
            }
            _ = tick(&mut stats_ticker) => {
                let Some(cache) = cache.upgrade() else { break };
                cache.log_stats().await;
            }
        }
    }
}

/// An interval whose first tick is one period away, or `None` when disabled.
fn ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    Some(ticker)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
