//! Tenant cache: one tenant's replica store and its entries.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use replica_core::{
    CacheResult, Definition, Model, Query, ReplicationConfig, RequestContext, Row, StoreError,
    TenantKey,
};
use replica_query::{Dataset, Evaluator};

use super::entry::{CacheEntry, EntryContext};
use super::lock;
use super::tasks::BackgroundTasks;
use crate::primary::PrimaryStore;
use crate::store::{open_store, LmdbReplicaStore, ReplicaStore};

/// A tenant's replica store together with its entries, keyed by entity.
pub struct TenantCache {
    context: Arc<EntryContext>,
    entries: Mutex<BTreeMap<String, Arc<CacheEntry>>>,
    touches: AtomicU64,
}

impl std::fmt::Debug for TenantCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCache")
            .field("tenant", &self.context.tenant)
            .field("entries", &lock(&self.entries).len())
            .finish_non_exhaustive()
    }
}

impl TenantCache {
    /// Open the tenant's replica store.
    ///
    /// Disk stores are seeded from `template` when one is given. In deploy
    /// mode every in-scope relation is created up front; otherwise entries
    /// create their relation on first preparation.
    pub(crate) async fn provision(
        tenant: TenantKey,
        model: &Model,
        scope: &BTreeSet<String>,
        primary: Arc<dyn PrimaryStore>,
        config: Arc<ReplicationConfig>,
        tasks: BackgroundTasks,
        template: Option<&LmdbReplicaStore>,
    ) -> CacheResult<Self> {
        tracing::debug!(tenant = %tenant, "Preparing replica store");
        let store = open_store(&config, &tenant, template)?;

        if config.deploy {
            for definition in scope.iter().filter_map(|entity| model.get(entity)) {
                store.ensure_relation(definition).await.map_err(|e| {
                    StoreError::ProvisionFailed {
                        tenant: tenant.to_string(),
                        reason: e.to_string(),
                    }
                })?;
            }
        }

        Ok(Self {
            context: Arc::new(EntryContext {
                tenant,
                store,
                primary,
                config,
                tasks,
            }),
            entries: Mutex::new(BTreeMap::new()),
            touches: AtomicU64::new(0),
        })
    }

    pub fn tenant(&self) -> &TenantKey {
        &self.context.tenant
    }

    pub fn store(&self) -> &Arc<dyn ReplicaStore> {
        &self.context.store
    }

    /// Get the entry for `definition`, registering a new one if needed.
    pub fn get_or_create_entry(&self, definition: &Definition) -> Arc<CacheEntry> {
        let mut entries = lock(&self.entries);
        Arc::clone(
            entries
                .entry(definition.name.clone())
                .or_insert_with(|| {
                    Arc::new(CacheEntry::new(definition.clone(), Arc::clone(&self.context)))
                }),
        )
    }

    pub fn entry(&self, entity: &str) -> Option<Arc<CacheEntry>> {
        lock(&self.entries).get(entity).cloned()
    }

    /// All entries, ordered by entity name.
    pub fn entries(&self) -> Vec<Arc<CacheEntry>> {
        lock(&self.entries).values().cloned().collect()
    }

    /// Mark `entry` as the most recently used entry of this tenant.
    pub(crate) fn touch(&self, entry: &CacheEntry) {
        entry.touch(self.touches.fetch_add(1, Ordering::Relaxed) + 1);
    }

    /// Sum of the entry sizes.
    pub fn size(&self) -> u64 {
        self.entries().iter().map(|entry| entry.size()).sum()
    }

    /// Serve `query` from the replica rows of `entities`.
    ///
    /// Returns `None` if any of the entries is not ready. Every entry stays
    /// locked against loads and clears until its rows have been scanned.
    pub async fn execute(
        &self,
        model: &Model,
        ctx: &RequestContext,
        query: &Query,
        entities: &BTreeSet<String>,
    ) -> CacheResult<Option<Vec<Row>>> {
        let mut entries = Vec::new();
        for entity in entities.iter().filter(|entity| !model.is_view(entity)) {
            match self.entry(entity) {
                Some(entry) => entries.push(entry),
                None => return Ok(None),
            }
        }

        // Entities arrive sorted, so concurrent reads lock in the same order.
        let mut guards = Vec::with_capacity(entries.len());
        for entry in &entries {
            match entry.read_ready().await {
                Some(guard) => guards.push(guard),
                None => return Ok(None),
            }
        }

        let mut data = Dataset::new();
        for entry in &entries {
            data.insert(
                entry.entity().to_string(),
                self.context.store.scan(entry.entity()).await?,
            );
        }
        drop(guards);

        let rows = Evaluator::new(model, &data)
            .with_locale(ctx.locale.as_deref())
            .execute(query)?;
        Ok(Some(rows))
    }

    /// Stop every TTL timer and close the store.
    pub(crate) async fn close(&self) -> CacheResult<()> {
        for entry in self.entries() {
            entry.cancel_timer();
        }
        self.context.store.close().await
    }
}
