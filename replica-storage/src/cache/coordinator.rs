//! Replication cache coordinator.
//!
//! [`ReplicationCache`] intercepts reads, decides whether the replica can
//! serve them, drives entry preparation and falls back to the primary for
//! everything else. It is a cheap, clonable handle; clones share one cache.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use replica_core::{
    CacheError, CacheResult, Model, Query, ReplicationConfig, RequestContext, Row, Select,
    StoreError, TenantKey,
};
use replica_query::{RefSet, Resolver};

use super::entry::{CacheEntry, EntryStatus};
use super::lock;
use super::maintenance::{self, MaintenanceHandle};
use super::stats::{CacheStatistics, SkipReason, StatsRecorder};
use super::tasks::BackgroundTasks;
use super::tenant::TenantCache;
use crate::primary::PrimaryStore;
use crate::store::{LmdbReplicaStore, ReplicaStore};

/// Decides whether the cache serves a tenant at all.
#[async_trait]
pub trait TenantActivation: Send + Sync {
    async fn is_active(&self, tenant: &TenantKey) -> bool;
}

/// Tenant provisioning shared by every caller that needs the tenant.
type TenantSlot = Shared<BoxFuture<'static, CacheResult<Arc<TenantCache>>>>;

/// What asked for entries to be prepared.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    /// An intercepted read; honors auto-load settings.
    Read { wait: bool },
    /// An explicit preload; always loads and always waits.
    Preload,
}

impl Trigger {
    fn waits(self) -> bool {
        match self {
            Self::Read { wait } => wait,
            Self::Preload => true,
        }
    }
}

/// Entities in replication scope for `config`.
///
/// An entity is in scope when it is not a derived view, carries an enabled
/// policy for the configured group and lies inside the configured namespace.
/// The text variant of every such entity is in scope as well.
pub fn replication_scope(model: &Model, config: &ReplicationConfig) -> BTreeSet<String> {
    let prefix = config.namespace.as_ref().map(|namespace| format!("{namespace}."));
    let mut scope = BTreeSet::new();
    for definition in model.definitions() {
        let Some(policy) = &definition.policy else {
            continue;
        };
        if definition.is_view() || !policy.enabled || policy.group != config.group {
            continue;
        }
        if let Some(prefix) = &prefix {
            if !definition.name.starts_with(prefix.as_str()) {
                continue;
            }
        }
        scope.insert(definition.name.clone());
        if let Some(texts) = model.text_variant(&definition.name) {
            scope.insert(texts.name.clone());
        }
    }
    scope
}

pub(crate) struct CacheInner {
    model: Arc<Model>,
    primary: Arc<dyn PrimaryStore>,
    config: Arc<ReplicationConfig>,
    scope: BTreeSet<String>,
    activation: Option<Arc<dyn TenantActivation>>,
    tenants: Mutex<HashMap<TenantKey, TenantSlot>>,
    template: tokio::sync::OnceCell<Arc<LmdbReplicaStore>>,
    stats: StatsRecorder,
    tasks: BackgroundTasks,
    maintenance: Mutex<Option<MaintenanceHandle>>,
    closed: AtomicBool,
}

/// Handle that does not keep the cache alive.
#[derive(Clone)]
pub(crate) struct WeakCache(Weak<CacheInner>);

impl WeakCache {
    pub fn upgrade(&self) -> Option<ReplicationCache> {
        self.0.upgrade().map(|inner| ReplicationCache { inner })
    }
}

/// Transparent read-through replication cache.
#[derive(Clone)]
pub struct ReplicationCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for ReplicationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationCache")
            .field("scope", &self.inner.scope)
            .field("tenants", &lock(&self.inner.tenants).len())
            .finish_non_exhaustive()
    }
}

impl ReplicationCache {
    /// Create a cache in front of `primary`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn new(
        model: Arc<Model>,
        primary: Arc<dyn PrimaryStore>,
        config: ReplicationConfig,
    ) -> CacheResult<Self> {
        Self::create(model, primary, config, None)
    }

    /// Create a cache that only serves tenants `activation` reports active.
    pub fn with_activation(
        model: Arc<Model>,
        primary: Arc<dyn PrimaryStore>,
        config: ReplicationConfig,
        activation: Arc<dyn TenantActivation>,
    ) -> CacheResult<Self> {
        Self::create(model, primary, config, Some(activation))
    }

    fn create(
        model: Arc<Model>,
        primary: Arc<dyn PrimaryStore>,
        config: ReplicationConfig,
        activation: Option<Arc<dyn TenantActivation>>,
    ) -> CacheResult<Self> {
        config.validate()?;
        let scope = replication_scope(&model, &config);
        tracing::info!(
            entities = scope.len(),
            group = ?config.group,
            deploy = config.deploy,
            "Using replication cache"
        );
        Ok(Self {
            inner: Arc::new(CacheInner {
                model,
                primary,
                config: Arc::new(config),
                scope,
                activation,
                tenants: Mutex::new(HashMap::new()),
                template: tokio::sync::OnceCell::new(),
                stats: StatsRecorder::default(),
                tasks: BackgroundTasks::new(),
                maintenance: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> WeakCache {
        WeakCache(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.inner.config
    }

    pub fn model(&self) -> &Model {
        &self.inner.model
    }

    /// Entities this cache replicates.
    pub fn scope(&self) -> &BTreeSet<String> {
        &self.inner.scope
    }

    pub fn stats(&self) -> CacheStatistics {
        self.inner.stats.snapshot()
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Serve `query` from the replica when possible, otherwise from the primary.
    ///
    /// Cache malfunctions never fail the read; only errors of the primary
    /// itself are returned.
    pub async fn read(&self, ctx: &RequestContext, query: &Query) -> CacheResult<Vec<Row>> {
        if let Some(rows) = self.try_replica(ctx, query).await {
            return Ok(rows);
        }
        self.inner.primary.run(ctx, query).await
    }

    async fn try_replica(&self, ctx: &RequestContext, query: &Query) -> Option<Vec<Row>> {
        let inner = &self.inner;
        if !inner.config.enabled || inner.closed.load(Ordering::Acquire) {
            return None;
        }
        if query.as_select().is_some_and(Select::bypasses_cache) {
            return None;
        }
        if !self.active(&ctx.tenant).await {
            return None;
        }

        inner.stats.hit();
        if inner.config.preload {
            self.schedule_preload(ctx.tenant.clone());
        }

        let refs = self.eligible_refs(query)?;
        for entity in &refs {
            inner.stats.count(entity);
        }

        let trigger = Trigger::Read {
            wait: inner.config.wait,
        };
        match self.load(&ctx.tenant, &refs, trigger).await {
            Ok(true) => {}
            Ok(false) => {
                self.missed(&ctx.tenant);
                return None;
            }
            Err(err) => {
                inner.stats.error();
                tracing::error!(
                    tenant = %ctx.tenant,
                    error = %err,
                    "Reading from replication cache failed"
                );
                self.missed(&ctx.tenant);
                return None;
            }
        }

        match self.execute(ctx, query, &refs).await {
            Ok(Some(rows)) => {
                inner.stats.used();
                tracing::debug!(tenant = %ctx.tenant, "Replication cache was used");
                Some(rows)
            }
            Ok(None) => {
                tracing::debug!(
                    tenant = %ctx.tenant,
                    "Replication cache entry left ready state before the read"
                );
                self.missed(&ctx.tenant);
                None
            }
            Err(err) if err.is_unsupported() => {
                let target = self.target(query);
                inner.stats.skip(SkipReason::Unsupported, &target);
                tracing::debug!(
                    tenant = %ctx.tenant,
                    entity = %target,
                    error = %err,
                    "Replication cache cannot evaluate query"
                );
                self.missed(&ctx.tenant);
                None
            }
            Err(err) => {
                inner.stats.error();
                tracing::error!(
                    tenant = %ctx.tenant,
                    error = %err,
                    "Reading from replication cache failed"
                );
                self.missed(&ctx.tenant);
                None
            }
        }
    }

    fn missed(&self, tenant: &TenantKey) {
        self.inner.stats.missed();
        tracing::debug!(tenant = %tenant, "Replication cache was not used");
    }

    async fn active(&self, tenant: &TenantKey) -> bool {
        if tenant.is_reserved() {
            return false;
        }
        if let Some(activation) = &self.inner.activation {
            if !activation.is_active(tenant).await {
                tracing::debug!(tenant = %tenant, "Replication cache not enabled for tenant");
                return false;
            }
        }
        true
    }

    fn target(&self, query: &Query) -> String {
        query
            .as_select()
            .and_then(|select| Resolver::new(&self.inner.model).target(select))
            .unwrap_or_default()
    }

    /// Entities the replica needs to serve `query`, or `None` to bypass.
    fn eligible_refs(&self, query: &Query) -> Option<RefSet> {
        let inner = &self.inner;
        let resolver = Resolver::new(&inner.model);
        let select = query.as_select();

        if let Some(select) = select {
            if !inner.config.search && select.search.is_some() {
                let target = self.target(query);
                inner.stats.skip(SkipReason::Search, &target);
                tracing::debug!(entity = %target, "Replication cache skipped for search");
                return None;
            }
        }

        let resolved = match resolver.query_refs(query) {
            Ok(refs) => refs,
            Err(err) => {
                tracing::debug!(error = %err, "Replication cache could not resolve query refs");
                return None;
            }
        };

        let refs = if inner.config.deploy {
            let base = match resolver.base_refs(&resolved) {
                Ok(base) => base,
                Err(err) => {
                    tracing::debug!(error = %err, "Replication cache could not expand views");
                    return None;
                }
            };
            match select {
                Some(select) => resolver.localized_refs(select, base),
                None => base,
            }
        } else {
            if !self.localized_allowed(query, &resolved) || !self.projections_allowed(&resolved) {
                return None;
            }
            resolved
        };

        if refs.is_empty() || !self.relevant(&refs) {
            return None;
        }
        Some(refs)
    }

    fn localized_allowed(&self, query: &Query, refs: &RefSet) -> bool {
        let stats = &self.inner.stats;
        if query.as_select().is_some_and(|select| select.localized) {
            let target = self.target(query);
            stats.skip(SkipReason::Localized, &target);
            tracing::debug!(
                entity = %target,
                "Replication cache not enabled for localized data without deploy"
            );
            return false;
        }
        let mut allowed = true;
        for entity in refs.iter().filter(|entity| self.inner.model.is_localized_view(entity)) {
            stats.skip(SkipReason::Localized, entity);
            tracing::debug!(
                entity = %entity,
                "Replication cache not enabled for localized data without deploy"
            );
            allowed = false;
        }
        allowed
    }

    fn projections_allowed(&self, refs: &RefSet) -> bool {
        let mut allowed = true;
        for entity in refs.iter().filter(|entity| self.inner.model.is_view(entity)) {
            self.inner.stats.skip(SkipReason::Projection, entity);
            tracing::debug!(
                entity = %entity,
                "Replication cache not enabled for projections without deploy"
            );
            allowed = false;
        }
        allowed
    }

    /// True when every ref is in scope. Refs outside the scope are counted
    /// unless the whole query is out of scope.
    fn relevant(&self, refs: &RefSet) -> bool {
        let outside: Vec<&String> = refs
            .iter()
            .filter(|entity| !self.inner.scope.contains(*entity))
            .collect();
        if outside.len() == refs.len() {
            tracing::debug!(refs = ?refs, "Replication cache not relevant for query");
            return false;
        }
        for entity in &outside {
            self.inner.stats.skip(SkipReason::NotRelevant, entity);
            tracing::debug!(
                entity = %entity,
                refs = ?refs,
                "Replication cache not relevant for query including entity"
            );
        }
        outside.is_empty()
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        query: &Query,
        refs: &RefSet,
    ) -> CacheResult<Option<Vec<Row>>> {
        let inner = &self.inner;
        let tenant = self.ready_tenant(&ctx.tenant).ok_or_else(|| CacheError::Task {
            reason: format!("replica store for tenant {} is not provisioned", ctx.tenant),
        })?;

        if !inner.config.measure {
            return tenant.execute(&inner.model, ctx, query, refs).await;
        }

        let replica = async {
            let start = Instant::now();
            let rows = tenant.execute(&inner.model, ctx, query, refs).await;
            (rows, start.elapsed())
        };
        let primary = async {
            let start = Instant::now();
            let rows = inner.primary.run(ctx, query).await;
            (rows, start.elapsed())
        };
        let ((rows, replica_time), (primary_rows, primary_time)) = tokio::join!(replica, primary);
        if let Err(err) = primary_rows {
            tracing::debug!(error = %err, "Primary failed during replication cache measurement");
        }

        let replica_ms = millis(replica_time);
        let primary_ms = millis(primary_time);
        let percent = inner.stats.measurement(replica_ms, primary_ms);
        tracing::info!(
            percent = percent.round(),
            replica_ms,
            primary_ms,
            "Replication cache measurement"
        );
        rows
    }

    // ========================================================================
    // PREPARATION
    // ========================================================================

    /// Prepare the entries for `refs` and report whether all of them are ready.
    async fn load(&self, tenant: &TenantKey, refs: &RefSet, trigger: Trigger) -> CacheResult<bool> {
        let entities: Vec<String> = refs
            .iter()
            .filter(|entity| !self.inner.model.is_view(entity))
            .cloned()
            .collect();
        if entities.is_empty() {
            return Ok(false);
        }

        let slot = self.tenant_slot(tenant);
        let work = {
            let cache = self.clone();
            let tenant = tenant.clone();
            let slot = slot.clone();
            let entities = entities.clone();
            async move { cache.prepare_entities(&tenant, slot, &entities, trigger).await }
        };

        if trigger.waits() {
            work.await?;
        } else {
            let tenant = tenant.clone();
            self.inner.tasks.spawn(async move {
                if let Err(err) = work.await {
                    tracing::warn!(
                        tenant = %tenant,
                        error = %err,
                        "Preparing replication cache entries failed"
                    );
                }
            });
        }

        let tenant_cache = match slot.peek() {
            Some(Ok(tenant_cache)) => Arc::clone(tenant_cache),
            Some(Err(err)) => {
                let err = err.clone();
                self.forget_failed_slot(tenant, &slot);
                return Err(err);
            }
            None => return Ok(false),
        };
        Ok(entities.iter().all(|entity| {
            tenant_cache
                .entry(entity)
                .is_some_and(|entry| entry.status() == EntryStatus::Ready)
        }))
    }

    async fn prepare_entities(
        &self,
        key: &TenantKey,
        slot: TenantSlot,
        entities: &[String],
        trigger: Trigger,
    ) -> CacheResult<()> {
        let tenant = match slot.clone().await {
            Ok(tenant) => tenant,
            Err(err) => {
                self.forget_failed_slot(key, &slot);
                return Err(err);
            }
        };
        let mut prepares = Vec::new();
        for entity in entities {
            let Some(definition) = self.inner.model.get(entity) else {
                continue;
            };
            let entry = tenant.get_or_create_entry(definition);
            tenant.touch(&entry);

            let eligible = match trigger {
                Trigger::Read { .. } => self.inner.config.auto_load && entry.auto_load(),
                Trigger::Preload => true,
            };
            let status = entry.status();
            if eligible && status != EntryStatus::Ready && status != EntryStatus::Invalid {
                prepares.push(entry.prepare());
            }
        }
        if prepares.is_empty() {
            return Ok(());
        }

        let results = join_all(prepares).await;
        if self.inner.config.prune {
            if let Err(err) = self.prune(Some(tenant.tenant())).await {
                tracing::error!(error = %err, "Pruning replication cache failed");
            }
        }
        for result in results {
            result?;
        }
        Ok(())
    }

    fn tenant_slot(&self, tenant: &TenantKey) -> TenantSlot {
        let mut tenants = lock(&self.inner.tenants);
        if let Some(slot) = tenants.get(tenant) {
            return slot.clone();
        }
        let cache = self.clone();
        let key = tenant.clone();
        let slot = async move { cache.provision(key).await }.boxed().shared();
        tenants.insert(tenant.clone(), slot.clone());
        slot
    }

    /// Drop a slot whose provisioning failed, so the next read retries it.
    /// A slot that was already replaced is left alone.
    fn forget_failed_slot(&self, tenant: &TenantKey, slot: &TenantSlot) {
        let mut tenants = lock(&self.inner.tenants);
        if tenants.get(tenant).is_some_and(|current| current.ptr_eq(slot)) {
            tenants.remove(tenant);
            tracing::debug!(tenant = %tenant, "Replica store provisioning will be retried");
        }
    }

    async fn provision(&self, tenant: TenantKey) -> CacheResult<Arc<TenantCache>> {
        let inner = &self.inner;
        let provisioned = async {
            let template = self.template().await?;
            TenantCache::provision(
                tenant.clone(),
                &inner.model,
                &inner.scope,
                Arc::clone(&inner.primary),
                Arc::clone(&inner.config),
                inner.tasks.clone(),
                template.as_deref(),
            )
            .await
        }
        .await;

        match provisioned {
            Ok(tenant_cache) => {
                tracing::debug!(tenant = %tenant, "Replica store provisioned");
                Ok(Arc::new(tenant_cache))
            }
            Err(err) => {
                tracing::error!(tenant = %tenant, error = %err, "Preparing replica store failed");
                Err(err)
            }
        }
    }

    /// The template store, created on first use in disk deploy mode.
    async fn template(&self) -> CacheResult<Option<Arc<LmdbReplicaStore>>> {
        let inner = &self.inner;
        if !(inner.config.deploy && inner.config.storage.is_disk()) {
            return Ok(None);
        }
        let template = inner
            .template
            .get_or_try_init(|| async {
                let failed = |reason: String| StoreError::ProvisionFailed {
                    tenant: replica_core::TEMPLATE_TENANT.to_string(),
                    reason,
                };
                let path = inner
                    .config
                    .template_path()
                    .ok_or_else(|| failed("no template path configured".to_string()))?;
                tracing::debug!(path = %path.display(), "Preparing replication cache template store");
                let store = LmdbReplicaStore::open(&path, inner.config.max_store_size_mb)
                    .map_err(|e| failed(e.to_string()))?;
                for definition in inner.scope.iter().filter_map(|name| inner.model.get(name)) {
                    store.ensure_relation(definition).await?;
                }
                Ok::<_, CacheError>(Arc::new(store))
            })
            .await?;
        Ok(Some(Arc::clone(template)))
    }

    fn ready_tenant(&self, tenant: &TenantKey) -> Option<Arc<TenantCache>> {
        let slot = lock(&self.inner.tenants).get(tenant).cloned()?;
        match slot.peek() {
            Some(Ok(tenant_cache)) => Some(Arc::clone(tenant_cache)),
            _ => None,
        }
    }

    /// Tenants matching `filter`, waiting for provisioning in flight.
    /// Tenants whose provisioning failed are skipped.
    async fn tenants(&self, filter: Option<&TenantKey>) -> Vec<Arc<TenantCache>> {
        let slots: Vec<TenantSlot> = {
            let tenants = lock(&self.inner.tenants);
            match filter {
                Some(tenant) => tenants.get(tenant).cloned().into_iter().collect(),
                None => tenants.values().cloned().collect(),
            }
        };
        let mut ready = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Ok(tenant_cache) = slot.await {
                ready.push(tenant_cache);
            }
        }
        ready
    }

    fn select_entries(tenant: &TenantCache, entity: Option<&str>) -> Vec<Arc<CacheEntry>> {
        match entity {
            Some(entity) => tenant.entry(entity).into_iter().collect(),
            None => tenant.entries(),
        }
    }

    fn schedule_preload(&self, tenant: TenantKey) {
        let cache = self.clone();
        self.inner.tasks.spawn(async move {
            if let Err(err) = cache.preload_annotated(&tenant, None).await {
                tracing::error!(tenant = %tenant, error = %err, "Preload replication cache failed");
            }
        });
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Load `entities` for `tenant` and wait until they settle.
    ///
    /// Auto-load policies are ignored. Entities outside the replication
    /// scope are skipped. Returns true if every requested entity is ready.
    pub async fn preload(&self, tenant: &TenantKey, entities: &[&str]) -> CacheResult<bool> {
        let refs: RefSet = entities
            .iter()
            .filter(|entity| {
                let in_scope = self.inner.scope.contains(**entity);
                if !in_scope {
                    tracing::warn!(entity = %entity, "Preload skipped entity outside replication scope");
                }
                in_scope
            })
            .map(|entity| entity.to_string())
            .collect();
        if refs.is_empty() {
            return Ok(false);
        }
        self.load(tenant, &refs, Trigger::Preload).await
    }

    /// Preload every in-scope entity whose policy requests preload,
    /// optionally restricted to `only`.
    pub async fn preload_annotated(
        &self,
        tenant: &TenantKey,
        only: Option<&[&str]>,
    ) -> CacheResult<bool> {
        let entities: Vec<&str> = self
            .inner
            .scope
            .iter()
            .map(String::as_str)
            .filter(|entity| only.map_or(true, |only| only.contains(entity)))
            .filter(|entity| {
                self.inner
                    .model
                    .get(entity)
                    .and_then(|definition| definition.policy.as_ref())
                    .is_some_and(|policy| policy.preload)
            })
            .collect();
        if entities.is_empty() {
            return Ok(false);
        }
        self.preload(tenant, &entities).await
    }

    /// Wait for preparations in flight, optionally narrowed to one tenant
    /// and one entity.
    pub async fn prepared(&self, tenant: Option<&TenantKey>, entity: Option<&str>) {
        for tenant_cache in self.tenants(tenant).await {
            for entry in Self::select_entries(&tenant_cache, entity) {
                entry.settled().await;
            }
        }
    }

    /// Wait until every recorded background task has finished.
    pub async fn settle_background(&self) {
        self.inner.tasks.settle().await;
    }

    /// Drop replica rows, optionally narrowed to one tenant and one entity.
    pub async fn clear(&self, tenant: Option<&TenantKey>, entity: Option<&str>) -> CacheResult<()> {
        for tenant_cache in self.tenants(tenant).await {
            for entry in Self::select_entries(&tenant_cache, entity) {
                entry.clear(false).await?;
                tracing::debug!(
                    tenant = %tenant_cache.tenant(),
                    entity = %entry.entity(),
                    size = entry.size(),
                    touched = %entry.touched(),
                    "Replication cache cleared"
                );
            }
        }
        Ok(())
    }

    /// Reset statistics and clear every entry.
    pub async fn reset(&self) -> CacheResult<()> {
        self.inner.stats.reset();
        self.clear(None, None).await
    }

    /// Return one entry to `New` with a fresh retry budget.
    ///
    /// This is the only way out of [`EntryStatus::Invalid`]. Returns false
    /// if the entry does not exist.
    pub fn reset_entry(&self, tenant: &TenantKey, entity: &str) -> bool {
        let Some(entry) = self.entry(tenant, entity) else {
            return false;
        };
        entry.reset();
        tracing::info!(tenant = %tenant, entity = %entity, "Replication cache entry reset");
        true
    }

    /// Clear least recently touched entries of tenants over their share of
    /// the size budget. Returns the number of entries cleared.
    pub async fn prune(&self, tenant: Option<&TenantKey>) -> CacheResult<usize> {
        let tenant_count = {
            let tenants = lock(&self.inner.tenants);
            tenants
                .values()
                .filter(|slot| matches!(slot.peek(), Some(Ok(_))))
                .count() as u64
        };
        if tenant_count == 0 {
            return Ok(0);
        }
        let max_size = self.inner.config.size_budget / tenant_count;

        let mut pruned = 0;
        for tenant_cache in self.tenants(tenant).await {
            let size = tenant_cache.size();
            if size <= max_size {
                continue;
            }
            let mut diff = size - max_size;
            tracing::debug!(
                tenant = %tenant_cache.tenant(),
                diff,
                "Replication cache exceeds limit for tenant"
            );

            let mut entries = tenant_cache.entries();
            entries.sort_by_key(|entry| entry.touch_seq());
            let mut victims = Vec::new();
            for entry in entries {
                let entry_size = entry.size();
                victims.push(entry);
                if entry_size >= diff {
                    break;
                }
                diff -= entry_size;
            }

            for entry in victims {
                tracing::debug!(
                    tenant = %tenant_cache.tenant(),
                    entity = %entry.entity(),
                    size = entry.size(),
                    touched = %entry.touched(),
                    "Replication cache prunes entity for tenant"
                );
                entry.clear(false).await?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// Replica bytes held by entries, optionally narrowed to one tenant
    /// and one entity.
    pub async fn size(&self, tenant: Option<&TenantKey>, entity: Option<&str>) -> u64 {
        let mut size = 0;
        for tenant_cache in self.tenants(tenant).await {
            size += Self::select_entries(&tenant_cache, entity)
                .iter()
                .map(|entry| entry.size())
                .sum::<u64>();
        }
        size
    }

    /// Bytes used by the whole replica store of `tenant`.
    pub async fn tenant_size(&self, tenant: &TenantKey) -> CacheResult<u64> {
        match self.tenants(Some(tenant)).await.first() {
            Some(tenant_cache) => tenant_cache.store().total_size().await,
            None => Ok(0),
        }
    }

    pub fn entry(&self, tenant: &TenantKey, entity: &str) -> Option<Arc<CacheEntry>> {
        self.ready_tenant(tenant)?.entry(entity)
    }

    pub fn entry_status(&self, tenant: &TenantKey, entity: &str) -> Option<EntryStatus> {
        self.entry(tenant, entity).map(|entry| entry.status())
    }

    /// Log the statistics snapshot and the total replica size.
    pub async fn log_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            hits = stats.hits,
            used = stats.used,
            missed = stats.missed,
            errors = stats.errors,
            ratio = stats.ratio,
            measure_ratio = stats.measure_ratio,
            counts = ?stats.counts,
            skipped = ?stats.skipped,
            "Replication cache statistics"
        );
        let size = self.size(None, None).await;
        tracing::info!(size, "Replication cache size");
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start periodic pruning and statistics logging as configured.
    ///
    /// Returns false if both intervals are disabled or maintenance already runs.
    pub fn start_maintenance(&self) -> bool {
        let config = &self.inner.config;
        if config.prune_interval.is_zero() && config.stats_interval.is_zero() {
            return false;
        }
        let mut handle = lock(&self.inner.maintenance);
        if handle.is_some() {
            return false;
        }
        *handle = Some(maintenance::spawn(
            self.downgrade(),
            config.prune_interval,
            config.stats_interval,
        ));
        true
    }

    /// Stop maintenance and background work, cancel timers and close every
    /// replica store. Reads after shutdown go straight to the primary.
    pub async fn shutdown(&self) -> CacheResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let maintenance = lock(&self.inner.maintenance).take();
        if let Some(maintenance) = maintenance {
            maintenance.stop().await;
        }
        self.inner.tasks.abort_all();

        let slots: Vec<TenantSlot> = lock(&self.inner.tenants).drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            if let Some(Ok(tenant_cache)) = slot.peek() {
                tenant_cache.close().await?;
            }
        }
        if let Some(template) = self.inner.template.get() {
            template.close().await?;
        }
        tracing::info!("Replication cache shut down");
        Ok(())
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{Cardinality, Definition, Element, ReplicationPolicy};

    fn model() -> Model {
        Model::new()
            .with_definition(
                Definition::entity("shop.Books")
                    .with_keys(&["ID"])
                    .with_policy(ReplicationPolicy::default()),
            )
            .with_definition(Definition::entity("shop.Books.texts").with_keys(&["ID", "locale"]))
            .with_definition(
                Definition::entity("shop.Authors")
                    .with_keys(&["ID"])
                    .with_policy(ReplicationPolicy::default().with_group("slow")),
            )
            .with_definition(
                Definition::entity("shop.Quotes")
                    .with_keys(&["ID"])
                    .with_policy(ReplicationPolicy::disabled()),
            )
            .with_definition(Definition::entity("other.Orders").with_policy(ReplicationPolicy::default()))
            .with_definition(
                Definition::view("shop.BookView", Select::from_entity("shop.Books"))
                    .with_policy(ReplicationPolicy::default())
                    .with_element(Element::association(
                        "author",
                        "shop.Authors",
                        &[("author_ID", "ID")],
                        Cardinality::One,
                    )),
            )
    }

    #[test]
    fn test_scope_default_group() {
        let scope = replication_scope(&model(), &ReplicationConfig::default());
        let expected: BTreeSet<String> = ["other.Orders", "shop.Books", "shop.Books.texts"]
            .iter()
            .map(|name| name.to_string())
            .collect();
        assert_eq!(scope, expected);
    }

    #[test]
    fn test_scope_group_and_namespace() {
        let scope = replication_scope(&model(), &ReplicationConfig::default().with_group("slow"));
        assert_eq!(scope.into_iter().collect::<Vec<_>>(), vec!["shop.Authors"]);

        let scope = replication_scope(&model(), &ReplicationConfig::default().with_namespace("other"));
        assert_eq!(scope.into_iter().collect::<Vec<_>>(), vec!["other.Orders"]);
    }

    #[test]
    fn test_trigger_waits() {
        assert!(Trigger::Preload.waits());
        assert!(Trigger::Read { wait: true }.waits());
        assert!(!Trigger::Read { wait: false }.waits());
    }
}
