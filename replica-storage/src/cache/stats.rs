//! Replication cache statistics.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::lock;

/// Why an otherwise eligible read was sent to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Full-text search without search support configured.
    Search,
    /// Localized data outside deploy mode.
    Localized,
    /// A derived view outside deploy mode.
    Projection,
    /// Part of the query lies outside the replication scope.
    NotRelevant,
    /// The replica cannot evaluate the query shape.
    Unsupported,
}

/// Snapshot of replication cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Reads that reached the cache.
    pub hits: u64,
    /// Reads served from the replica.
    pub used: u64,
    /// Eligible reads sent to the primary.
    pub missed: u64,
    /// Cache malfunctions that fell back to the primary.
    pub errors: u64,
    /// `used / hits`, 0 without hits.
    pub ratio: f64,
    pub measure_total: f64,
    pub measure_count: u64,
    /// Mean percentage by which the replica beat the primary.
    pub measure_ratio: f64,
    /// Per-entity reference counts of eligible reads.
    pub counts: BTreeMap<String, u64>,
    /// Per-reason, per-entity skip counts.
    pub skipped: BTreeMap<SkipReason, BTreeMap<String, u64>>,
}

impl CacheStatistics {
    /// Skip count for `entity` under `reason`.
    pub fn skip_count(&self, reason: SkipReason, entity: &str) -> u64 {
        self.skipped
            .get(&reason)
            .and_then(|counts| counts.get(entity))
            .copied()
            .unwrap_or(0)
    }

    /// Reference count for `entity`.
    pub fn count(&self, entity: &str) -> u64 {
        self.counts.get(entity).copied().unwrap_or(0)
    }

    fn update_ratio(&mut self) {
        self.ratio = if self.hits == 0 {
            0.0
        } else {
            self.used as f64 / self.hits as f64
        };
    }
}

/// Shared, lock-protected statistics counters.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    inner: Mutex<CacheStatistics>,
}

impl StatsRecorder {
    fn update(&self, f: impl FnOnce(&mut CacheStatistics)) {
        f(&mut lock(&self.inner));
    }

    pub fn hit(&self) {
        self.update(|stats| {
            stats.hits += 1;
            stats.update_ratio();
        });
    }

    pub fn used(&self) {
        self.update(|stats| {
            stats.used += 1;
            stats.update_ratio();
        });
    }

    pub fn missed(&self) {
        self.update(|stats| {
            stats.missed += 1;
            stats.update_ratio();
        });
    }

    pub fn error(&self) {
        self.update(|stats| stats.errors += 1);
    }

    pub fn count(&self, entity: &str) {
        self.update(|stats| *stats.counts.entry(entity.to_string()).or_default() += 1);
    }

    pub fn skip(&self, reason: SkipReason, entity: &str) {
        self.update(|stats| {
            *stats
                .skipped
                .entry(reason)
                .or_default()
                .entry(entity.to_string())
                .or_default() += 1;
        });
    }

    /// Record one side-by-side measurement; returns the improvement in percent.
    pub fn measurement(&self, replica_ms: f64, primary_ms: f64) -> f64 {
        let percent = if primary_ms > 0.0 {
            (primary_ms - replica_ms) / primary_ms * 100.0
        } else {
            0.0
        };
        self.update(|stats| {
            stats.measure_total += percent;
            stats.measure_count += 1;
            stats.measure_ratio = stats.measure_total / stats.measure_count as f64;
        });
        percent
    }

    pub fn snapshot(&self) -> CacheStatistics {
        lock(&self.inner).clone()
    }

    pub fn reset(&self) {
        self.update(|stats| *stats = CacheStatistics::default());
    }
}
