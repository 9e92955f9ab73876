//! Replica Storage - Replica Stores and the Replication Cache
//!
//! Serves eligible reads from per-tenant replicas of whole entities and falls
//! back to a [`PrimaryStore`] for everything else.
//!
//! - [`store`]: the [`ReplicaStore`] seam with in-memory and LMDB backends
//! - [`cache`]: entries, tenant caches, the [`ReplicationCache`] coordinator,
//!   statistics and maintenance
//! - [`primary`]: the [`PrimaryStore`] seam
//! - [`telemetry`]: tracing subscriber setup

pub mod cache;
pub mod primary;
pub mod store;
pub mod telemetry;

pub use cache::{
    replication_scope, BackgroundTasks, CacheEntry, CacheStatistics, EntryStatus,
    MaintenanceHandle, ReplicationCache, SkipReason, TenantActivation, TenantCache,
};
pub use primary::PrimaryStore;
pub use store::{open_store, LmdbReplicaStore, LmdbStoreError, MemoryReplicaStore, ReplicaStore};
pub use telemetry::{init_tracing, TelemetryConfig};
