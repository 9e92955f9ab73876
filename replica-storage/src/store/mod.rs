//! Replica store backends.
//!
//! A replica store holds one tenant's copy of the replicated relations. The
//! cache talks to it only through [`ReplicaStore`], so the in-memory and LMDB
//! backends are interchangeable.
//!
//! # Relations
//!
//! Each replicated entity lives in its own relation, named by
//! [`relation_name`](replica_core::relation_name) (`a.b.C` becomes `a_b_C`).
//! Rows are returned by [`ReplicaStore::scan`] in insertion order.

pub mod lmdb_backend;
pub mod memory;

pub use lmdb_backend::{LmdbReplicaStore, LmdbStoreError};
pub use memory::MemoryReplicaStore;

use std::sync::Arc;

use async_trait::async_trait;
use replica_core::{
    CacheResult, Definition, ReplicationConfig, Row, StorageConfig, StoreError, TenantKey,
};

/// Replica store trait for pluggable backends.
///
/// Implementations must be safe to share between tasks. Every method is one
/// transaction: a failed call leaves the relation as it was before the call.
///
/// # Lifecycle
///
/// - `ensure_relation` must be called before a relation is written or read
/// - after `close`, every method returns [`StoreError::Closed`]
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Create the relation backing `definition` if it does not exist yet.
    async fn ensure_relation(&self, definition: &Definition) -> CacheResult<()>;

    /// Returns true if the relation for `entity` exists.
    async fn has_relation(&self, entity: &str) -> CacheResult<bool>;

    /// Delete every row of `entity`.
    async fn truncate(&self, entity: &str) -> CacheResult<()>;

    /// Append rows to `entity`.
    ///
    /// Returns the number of rows the store reports as inserted, which the
    /// loader compares against the number it read.
    async fn insert(&self, entity: &str, rows: &[Row]) -> CacheResult<u64>;

    /// Number of rows in `entity`.
    async fn count(&self, entity: &str) -> CacheResult<u64>;

    /// All rows of `entity`, in insertion order.
    async fn scan(&self, entity: &str) -> CacheResult<Vec<Row>>;

    /// Bytes used by `entity`. Zero when the relation is empty.
    async fn relation_size(&self, entity: &str) -> CacheResult<u64>;

    /// Bytes used by the whole store.
    async fn total_size(&self) -> CacheResult<u64>;

    /// Release the store. Further calls fail with [`StoreError::Closed`].
    async fn close(&self) -> CacheResult<()>;
}

/// Open the replica store for `tenant` as configured.
///
/// Disk stores for named and default tenants are seeded from `template`
/// when one is given.
pub fn open_store(
    config: &ReplicationConfig,
    tenant: &TenantKey,
    template: Option<&LmdbReplicaStore>,
) -> CacheResult<Arc<dyn ReplicaStore>> {
    match &config.storage {
        StorageConfig::Memory => Ok(Arc::new(MemoryReplicaStore::new())),
        StorageConfig::Disk { .. } => {
            let path = config
                .store_path(tenant)
                .ok_or_else(|| StoreError::ProvisionFailed {
                    tenant: tenant.to_string(),
                    reason: "no store path configured".to_string(),
                })?;
            if let Some(template) = template {
                template.copy_to(&path).map_err(|e| StoreError::ProvisionFailed {
                    tenant: tenant.to_string(),
                    reason: e.to_string(),
                })?;
            }
            let store = LmdbReplicaStore::open(&path, config.max_store_size_mb).map_err(|e| {
                StoreError::ProvisionFailed {
                    tenant: tenant.to_string(),
                    reason: e.to_string(),
                }
            })?;
            Ok(Arc::new(store))
        }
    }
}
