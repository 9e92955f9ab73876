//! Transparent read-through replication cache.
//!
//! The cache sits in front of a [`PrimaryStore`](crate::PrimaryStore) and
//! serves eligible reads from per-tenant replicas of whole entities.
//!
//! # Lifecycle
//!
//! Each (tenant, entity) pair has one [`CacheEntry`]. An entry moves through
//! [`EntryStatus`]:
//!
//! ```text
//! New -> Initialized -> Open -> Ready -> (TTL / clear) -> Open -> ...
//!                        |
//!                        +-> Failed (retry on next prepare) -> Invalid (after retries)
//! ```
//!
//! Only reads whose every dependency is `Ready` are served from the replica.
//! Everything else falls through to the primary, and cache malfunctions are
//! counted in the statistics instead of failing the read.
//!
//! # Coalescing
//!
//! Concurrent prepares of the same entry share one in-flight future, and
//! concurrent first reads of a tenant share one store provisioning.
//!
//! # Example
//!
//! ```ignore
//! let cache = ReplicationCache::new(model, primary, ReplicationConfig::default().with_wait(true))?;
//! let rows = cache.read(&RequestContext::default(), &query).await?;
//! println!("served from replica: {}", cache.stats().used);
//! ```

pub mod coordinator;
pub mod entry;
pub mod maintenance;
pub mod stats;
pub mod tasks;
pub mod tenant;

pub use coordinator::{replication_scope, ReplicationCache, TenantActivation};
pub use entry::{CacheEntry, EntryStatus};
pub use maintenance::MaintenanceHandle;
pub use stats::{CacheStatistics, SkipReason};
pub use tasks::BackgroundTasks;
pub use tenant::TenantCache;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
