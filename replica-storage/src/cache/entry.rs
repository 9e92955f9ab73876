//! Cache entry: one tenant's replica of one entity.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use replica_core::{
    CacheError, CacheResult, Column, ConsistencyError, Definition, Expr, OrderBy, PrimaryError,
    Query, ReplicationConfig, RequestContext, Select, TenantKey, Timestamp,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLockReadGuard;
use tokio::task::AbortHandle;

use super::lock;
use super::tasks::BackgroundTasks;
use crate::primary::PrimaryStore;
use crate::store::ReplicaStore;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// Created, relation not provisioned yet.
    New,
    /// Relation provisioned, never loaded.
    Initialized,
    /// Cleared or loading; not servable.
    Open,
    /// Loaded and servable.
    Ready,
    /// Last preparation failed; retried on the next prepare.
    Failed,
    /// Retry budget exhausted; only an explicit reset recovers it.
    Invalid,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::Initialized => "INITIALIZED",
            Self::Open => "OPEN",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
            Self::Invalid => "INVALID",
        };
        f.write_str(name)
    }
}

/// In-flight preparation shared by every caller that asks for it.
pub(crate) type PrepareFuture = Shared<BoxFuture<'static, CacheResult<EntryStatus>>>;

/// Collaborators shared by all entries of one tenant.
pub(crate) struct EntryContext {
    pub tenant: TenantKey,
    pub store: Arc<dyn ReplicaStore>,
    pub primary: Arc<dyn PrimaryStore>,
    pub config: Arc<ReplicationConfig>,
    pub tasks: BackgroundTasks,
}

#[derive(Debug)]
struct EntryState {
    status: EntryStatus,
    failures: u32,
    touched: Timestamp,
    touch_seq: u64,
    loaded_at: Option<Timestamp>,
    size: u64,
    ttl_timer: Option<AbortHandle>,
}

/// One tenant's replica of one entity.
///
/// Entries are shared as `Arc<CacheEntry>`; preparation runs on the tokio
/// runtime so it completes even when no caller waits for it.
pub struct CacheEntry {
    definition: Definition,
    ttl: Duration,
    auto_load: bool,
    preload: bool,
    context: Arc<EntryContext>,
    state: Mutex<EntryState>,
    preparing: Mutex<Option<PrepareFuture>>,
    /// Held exclusively by loads and clears, shared by replica reads.
    rows: tokio::sync::RwLock<()>,
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("tenant", &self.context.tenant)
            .field("entity", &self.definition.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl CacheEntry {
    pub(crate) fn new(definition: Definition, context: Arc<EntryContext>) -> Self {
        let policy = definition.policy.clone().unwrap_or_default();
        let now = Utc::now();
        Self {
            ttl: policy.ttl.unwrap_or(context.config.ttl),
            auto_load: policy.auto_load,
            preload: context.config.preload && policy.preload,
            definition,
            context,
            state: Mutex::new(EntryState {
                status: EntryStatus::New,
                failures: 0,
                touched: now,
                touch_seq: 0,
                loaded_at: None,
                size: 0,
                ttl_timer: None,
            }),
            preparing: Mutex::new(None),
            rows: tokio::sync::RwLock::new(()),
        }
    }

    pub fn entity(&self) -> &str {
        &self.definition.name
    }

    pub fn tenant(&self) -> &TenantKey {
        &self.context.tenant
    }

    pub fn status(&self) -> EntryStatus {
        lock(&self.state).status
    }

    pub fn failures(&self) -> u32 {
        lock(&self.state).failures
    }

    /// Replica bytes held by this entry.
    pub fn size(&self) -> u64 {
        lock(&self.state).size
    }

    pub fn touched(&self) -> Timestamp {
        lock(&self.state).touched
    }

    pub fn loaded_at(&self) -> Option<Timestamp> {
        lock(&self.state).loaded_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether a read may trigger loading this entry.
    pub fn auto_load(&self) -> bool {
        self.auto_load
    }

    /// Shared access to the replica rows, or `None` unless the entry is ready.
    ///
    /// Loads and clears wait until the guard is dropped, so rows read under
    /// it belong to one completed load.
    pub(crate) async fn read_ready(&self) -> Option<RwLockReadGuard<'_, ()>> {
        let guard = self.rows.read().await;
        (self.status() == EntryStatus::Ready).then_some(guard)
    }

    pub fn is_preparing(&self) -> bool {
        lock(&self.preparing).is_some()
    }

    pub(crate) fn touch(&self, seq: u64) {
        let mut state = lock(&self.state);
        state.touched = Utc::now();
        state.touch_seq = seq;
    }

    pub(crate) fn touch_seq(&self) -> u64 {
        lock(&self.state).touch_seq
    }

    /// Start preparing the entry, or join the preparation already in flight.
    ///
    /// The returned future resolves to the status reached. It is driven by a
    /// recorded background task, so dropping it does not cancel the work.
    pub fn prepare(self: &Arc<Self>) -> PrepareFuture {
        let mut preparing = lock(&self.preparing);
        if let Some(future) = preparing.as_ref() {
            return future.clone();
        }

        let entry = Arc::clone(self);
        let future = async move { entry.run_prepare().await }.boxed().shared();
        *preparing = Some(future.clone());
        drop(preparing);

        let driver = future.clone();
        self.context.tasks.spawn(async move {
            let _ = driver.await;
        });
        future
    }

    /// Wait for the preparation in flight, if any. Its outcome is ignored.
    pub async fn settled(&self) {
        let future = lock(&self.preparing).clone();
        if let Some(future) = future {
            let _ = future.await;
        }
    }

    async fn run_prepare(self: Arc<Self>) -> CacheResult<EntryStatus> {
        tracing::debug!(
            tenant = %self.context.tenant,
            entity = %self.entity(),
            "Preparing replication cache entry started"
        );

        let outcome = match self.advance().await {
            Ok(()) => {
                let status = self.status();
                tracing::debug!(
                    tenant = %self.context.tenant,
                    entity = %self.entity(),
                    status = %status,
                    size = self.size(),
                    "Preparing replication cache entry finished"
                );
                Ok(status)
            }
            Err(err) => {
                let (status, failures) = self.record_failure(&err);
                tracing::warn!(
                    tenant = %self.context.tenant,
                    entity = %self.entity(),
                    status = %status,
                    failures,
                    error = %err,
                    "Preparing replication cache entry failed"
                );
                Err(err)
            }
        };

        *lock(&self.preparing) = None;
        outcome
    }

    fn record_failure(&self, err: &CacheError) -> (EntryStatus, u32) {
        let mut state = lock(&self.state);
        if !matches!(err, CacheError::RetryBudgetExceeded { .. }) {
            state.failures += 1;
            state.status = if state.failures > self.context.config.retries {
                EntryStatus::Invalid
            } else {
                EntryStatus::Failed
            };
        }
        (state.status, state.failures)
    }

    async fn advance(self: &Arc<Self>) -> CacheResult<()> {
        match self.status() {
            EntryStatus::Invalid => {
                return Err(CacheError::RetryBudgetExceeded {
                    entity: self.entity().to_string(),
                    failures: self.failures(),
                })
            }
            EntryStatus::New => self.initialize().await?,
            _ => {}
        }

        let _rows = self.rows.write().await;
        if matches!(
            self.status(),
            EntryStatus::Initialized | EntryStatus::Open | EntryStatus::Failed
        ) {
            self.load().await?;
            {
                let mut state = lock(&self.state);
                state.status = EntryStatus::Ready;
                state.failures = 0;
                state.loaded_at = Some(Utc::now());
            }
            self.arm_ttl();
        }
        Ok(())
    }

    /// Provision the relation unless the tenant store was deployed up front.
    async fn initialize(&self) -> CacheResult<()> {
        if !self.context.config.deploy {
            self.context.store.ensure_relation(&self.definition).await?;
        }
        lock(&self.state).status = EntryStatus::Initialized;
        Ok(())
    }

    /// Replace the replica rows with a fresh copy from the primary.
    async fn load(&self) -> CacheResult<()> {
        self.clear_locked().await?;
        let rows = self.load_chunks().await?;
        if self.context.config.validate_rows {
            self.check_counts().await?;
        }
        let size = self.context.store.relation_size(self.entity()).await?;
        lock(&self.state).size = size;
        tracing::debug!(
            tenant = %self.context.tenant,
            entity = %self.entity(),
            rows,
            size,
            "Replication cache entry loaded"
        );
        Ok(())
    }

    fn request_context(&self) -> RequestContext {
        RequestContext::for_tenant(self.context.tenant.clone())
    }

    /// Copy rows in key order, one chunk per primary query, until a chunk
    /// comes back empty.
    async fn load_chunks(&self) -> CacheResult<u64> {
        let ctx = self.request_context();
        let chunk_size = self.context.config.chunk_size;
        let order: Vec<OrderBy> = self
            .definition
            .keys
            .iter()
            .map(|key| OrderBy::asc(key))
            .collect();

        let mut offset = 0;
        let mut total = 0u64;
        loop {
            let query = Query::Select(
                Select::from_entity(self.entity())
                    .order_by(order.clone())
                    .limit(chunk_size, offset)
                    .internal(),
            );
            let rows = self.context.primary.run(&ctx, &query).await?;
            if rows.is_empty() {
                break;
            }

            let inserted = self.context.store.insert(self.entity(), &rows).await?;
            if self.context.config.validate_rows && inserted != rows.len() as u64 {
                return Err(ConsistencyError::ChunkMismatch {
                    entity: self.entity().to_string(),
                    offset,
                    read: rows.len(),
                    inserted,
                }
                .into());
            }
            total += rows.len() as u64;
            offset += chunk_size;
        }
        Ok(total)
    }

    async fn check_counts(&self) -> CacheResult<()> {
        let query = Query::Select(
            Select::from_entity(self.entity())
                .columns(vec![Column::aliased(Expr::count_all(), "count")])
                .one()
                .internal(),
        );
        let rows = self
            .context
            .primary
            .run(&self.request_context(), &query)
            .await?;
        let primary = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| PrimaryError::Malformed {
                entity: self.entity().to_string(),
                reason: "count query returned no numeric count".to_string(),
            })?;

        let replica = self.context.store.count(self.entity()).await?;
        if primary != replica {
            return Err(ConsistencyError::CountMismatch {
                entity: self.entity().to_string(),
                primary,
                replica,
            }
            .into());
        }
        Ok(())
    }

    /// Drop the replica rows and mark the entry `Open`.
    ///
    /// With `rearm`, an entry whose policy requests preload is reloaded in
    /// the background. `New` and `Invalid` entries keep their status.
    pub async fn clear(self: &Arc<Self>, rearm: bool) -> CacheResult<()> {
        {
            let _rows = self.rows.write().await;
            self.clear_locked().await?;
        }
        if rearm && self.preload {
            let entry = Arc::clone(self);
            self.context.tasks.spawn(async move {
                if let Err(err) = entry.prepare().await {
                    tracing::warn!(
                        tenant = %entry.context.tenant,
                        entity = %entry.entity(),
                        error = %err,
                        "Replication cache preload after TTL failed"
                    );
                }
            });
        }
        Ok(())
    }

    async fn clear_locked(&self) -> CacheResult<()> {
        self.cancel_timer();
        {
            let mut state = lock(&self.state);
            if matches!(state.status, EntryStatus::New | EntryStatus::Invalid) {
                return Ok(());
            }
            state.status = EntryStatus::Open;
        }

        let store = &self.context.store;
        if store.has_relation(self.entity()).await? {
            store.truncate(self.entity()).await?;
        }
        let size = if store.has_relation(self.entity()).await? {
            store.relation_size(self.entity()).await?
        } else {
            0
        };
        lock(&self.state).size = size;
        Ok(())
    }

    fn arm_ttl(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let ttl = self.ttl;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(entry) = weak.upgrade() {
                entry.expire().await;
            }
        });
        if let Some(previous) = lock(&self.state).ttl_timer.replace(timer.abort_handle()) {
            previous.abort();
        }
    }

    async fn expire(self: Arc<Self>) {
        // Forget the handle first; clearing would otherwise abort this task.
        lock(&self.state).ttl_timer = None;
        tracing::debug!(
            tenant = %self.context.tenant,
            entity = %self.entity(),
            "Replication cache entry TTL reached"
        );
        if let Err(err) = self.clear(true).await {
            tracing::warn!(
                tenant = %self.context.tenant,
                entity = %self.entity(),
                error = %err,
                "Clearing replication cache entry after TTL failed"
            );
        }
    }

    pub(crate) fn cancel_timer(&self) {
        if let Some(timer) = lock(&self.state).ttl_timer.take() {
            timer.abort();
        }
    }

    /// Return an entry to `New` with a fresh retry budget.
    pub(crate) fn reset(&self) {
        self.cancel_timer();
        let mut state = lock(&self.state);
        state.status = EntryStatus::New;
        state.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryReplicaStore;
    use async_trait::async_trait;
    use replica_core::{Model, ReplicationPolicy, Row};
    use replica_query::{Dataset, Evaluator};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    // ========================================================================
    // Test fixtures
    // ========================================================================

    struct TablePrimary {
        model: Model,
        data: Dataset,
        loads: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
        /// Added to the count the primary reports.
        count_skew: u64,
    }

    impl TablePrimary {
        fn new(rows: usize) -> Self {
            let books = (1..=rows)
                .map(|i| json!({"ID": i, "title": format!("Book {i}")}).as_object().cloned().unwrap())
                .collect::<Vec<Row>>();
            Self {
                model: Model::new().with_definition(books_definition()),
                data: Dataset::new().with_relation("test.Books", books),
                loads: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::ZERO,
                count_skew: 0,
            }
        }
    }

    #[async_trait]
    impl PrimaryStore for TablePrimary {
        async fn run(&self, _ctx: &RequestContext, query: &Query) -> CacheResult<Vec<Row>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PrimaryError::Failed {
                    reason: "primary offline".to_string(),
                }
                .into());
            }
            if let Some(select) = query.as_select() {
                if select.limit.is_some_and(|limit| limit.offset == 0) {
                    self.loads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(self.delay).await;
                }
            }
            let mut rows = Evaluator::new(&self.model, &self.data).execute(query)?;
            if query.as_select().is_some_and(|select| select.one) {
                for row in &mut rows {
                    if let Some(count) = row.get("count").and_then(serde_json::Value::as_u64) {
                        row.insert("count".to_string(), json!(count + self.count_skew));
                    }
                }
            }
            Ok(rows)
        }
    }

    /// Memory store that reports one row fewer than it inserted.
    #[derive(Default)]
    struct ShortStore(MemoryReplicaStore);

    #[async_trait]
    impl ReplicaStore for ShortStore {
        async fn ensure_relation(&self, definition: &Definition) -> CacheResult<()> {
            self.0.ensure_relation(definition).await
        }
        async fn has_relation(&self, entity: &str) -> CacheResult<bool> {
            self.0.has_relation(entity).await
        }
        async fn truncate(&self, entity: &str) -> CacheResult<()> {
            self.0.truncate(entity).await
        }
        async fn insert(&self, entity: &str, rows: &[Row]) -> CacheResult<u64> {
            Ok(self.0.insert(entity, rows).await?.saturating_sub(1))
        }
        async fn count(&self, entity: &str) -> CacheResult<u64> {
            self.0.count(entity).await
        }
        async fn scan(&self, entity: &str) -> CacheResult<Vec<Row>> {
            self.0.scan(entity).await
        }
        async fn relation_size(&self, entity: &str) -> CacheResult<u64> {
            self.0.relation_size(entity).await
        }
        async fn total_size(&self) -> CacheResult<u64> {
            self.0.total_size().await
        }
        async fn close(&self) -> CacheResult<()> {
            self.0.close().await
        }
    }

    fn books_definition() -> Definition {
        Definition::entity("test.Books")
            .with_keys(&["ID"])
            .with_columns(&["title"])
            .with_policy(ReplicationPolicy::default())
    }

    fn create_entry(
        primary: Arc<TablePrimary>,
        config: ReplicationConfig,
    ) -> (Arc<CacheEntry>, Arc<MemoryReplicaStore>, BackgroundTasks) {
        let store = Arc::new(MemoryReplicaStore::new());
        let (entry, tasks) = entry_over(primary, store.clone(), config);
        (entry, store, tasks)
    }

    fn entry_over(
        primary: Arc<TablePrimary>,
        store: Arc<dyn ReplicaStore>,
        config: ReplicationConfig,
    ) -> (Arc<CacheEntry>, BackgroundTasks) {
        let tasks = BackgroundTasks::new();
        let context = Arc::new(EntryContext {
            tenant: TenantKey::Default,
            store,
            primary,
            config: Arc::new(config),
            tasks: tasks.clone(),
        });
        (Arc::new(CacheEntry::new(books_definition(), context)), tasks)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[tokio::test]
    async fn test_prepare_loads_in_chunks() {
        let primary = Arc::new(TablePrimary::new(25));
        let (entry, store, _tasks) =
            create_entry(primary, ReplicationConfig::default().with_chunk_size(10));

        assert_eq!(entry.status(), EntryStatus::New);
        let status = entry.prepare().await.unwrap();
        assert_eq!(status, EntryStatus::Ready);
        assert_eq!(store.count("test.Books").await.unwrap(), 25);
        assert!(entry.size() > 0);
        assert!(entry.loaded_at().is_some());
        assert!(!entry.is_preparing());
    }

    #[tokio::test]
    async fn test_concurrent_prepares_coalesce() {
        let mut primary = TablePrimary::new(10);
        primary.delay = Duration::from_millis(20);
        let primary = Arc::new(primary);
        let (entry, _store, _tasks) = create_entry(primary.clone(), ReplicationConfig::default());

        let (a, b) = tokio::join!(entry.prepare(), entry.prepare());
        assert_eq!(a.unwrap(), EntryStatus::Ready);
        assert_eq!(b.unwrap(), EntryStatus::Ready);
        assert_eq!(primary.loads.load(Ordering::SeqCst), 1);

        // Ready entries do not reload.
        entry.prepare().await.unwrap();
        assert_eq!(primary.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_then_prepare_reloads() {
        let primary = Arc::new(TablePrimary::new(5));
        let (entry, store, _tasks) = create_entry(primary.clone(), ReplicationConfig::default());
        entry.prepare().await.unwrap();

        entry.clear(false).await.unwrap();
        assert_eq!(entry.status(), EntryStatus::Open);
        assert_eq!(entry.size(), 0);
        assert_eq!(store.count("test.Books").await.unwrap(), 0);

        assert_eq!(entry.prepare().await.unwrap(), EntryStatus::Ready);
        assert_eq!(store.count("test.Books").await.unwrap(), 5);
        assert_eq!(primary.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_exhaust_retry_budget() {
        let primary = Arc::new(TablePrimary::new(5));
        primary.fail.store(true, Ordering::SeqCst);
        let (entry, _store, _tasks) =
            create_entry(primary.clone(), ReplicationConfig::default().with_retries(1));

        assert!(entry.prepare().await.is_err());
        assert_eq!(entry.status(), EntryStatus::Failed);
        assert!(entry.prepare().await.is_err());
        assert_eq!(entry.status(), EntryStatus::Invalid);

        primary.fail.store(false, Ordering::SeqCst);
        let err = entry.prepare().await.unwrap_err();
        assert!(matches!(err, CacheError::RetryBudgetExceeded { failures: 2, .. }));
        assert_eq!(entry.status(), EntryStatus::Invalid);

        entry.reset();
        assert_eq!(entry.status(), EntryStatus::New);
        assert_eq!(entry.prepare().await.unwrap(), EntryStatus::Ready);
        assert_eq!(entry.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_reopens_entry() {
        let primary = Arc::new(TablePrimary::new(3));
        let (entry, _store, _tasks) = create_entry(
            primary,
            ReplicationConfig::default().with_ttl(Duration::from_secs(60)),
        );
        entry.prepare().await.unwrap();
        assert_eq!(entry.status(), EntryStatus::Ready);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(entry.status(), EntryStatus::Ready);

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(entry.status(), EntryStatus::Open);
        assert_eq!(entry.size(), 0);
    }

    #[tokio::test]
    async fn test_clear_on_new_entry_keeps_status() {
        let primary = Arc::new(TablePrimary::new(3));
        let (entry, _store, _tasks) = create_entry(primary, ReplicationConfig::default());
        entry.clear(false).await.unwrap();
        assert_eq!(entry.status(), EntryStatus::New);
    }

    #[tokio::test]
    async fn test_read_guard_holds_off_clear() {
        let primary = Arc::new(TablePrimary::new(5));
        let (entry, store, _tasks) = create_entry(primary, ReplicationConfig::default());
        entry.prepare().await.unwrap();

        let guard = entry.read_ready().await.expect("ready entry");
        let clearing = {
            let entry = Arc::clone(&entry);
            tokio::spawn(async move { entry.clear(false).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(entry.status(), EntryStatus::Ready);
        assert_eq!(store.count("test.Books").await.unwrap(), 5);

        drop(guard);
        clearing.await.unwrap().unwrap();
        assert_eq!(entry.status(), EntryStatus::Open);
        assert!(entry.read_ready().await.is_none());
    }

    // ========================================================================
    // Consistency checks
    // ========================================================================

    #[tokio::test]
    async fn test_count_mismatch_fails_entry() {
        let mut primary = TablePrimary::new(5);
        primary.count_skew = 1;
        let (entry, _store, _tasks) = create_entry(Arc::new(primary), ReplicationConfig::default());

        let err = entry.prepare().await.unwrap_err();
        assert_eq!(
            err,
            CacheError::Consistency(ConsistencyError::CountMismatch {
                entity: "test.Books".to_string(),
                primary: 6,
                replica: 5,
            })
        );
        assert_eq!(entry.status(), EntryStatus::Failed);
        assert_eq!(entry.failures(), 1);
        assert!(entry.read_ready().await.is_none());
    }

    #[tokio::test]
    async fn test_chunk_mismatch_fails_entry() {
        let primary = Arc::new(TablePrimary::new(25));
        let (entry, _tasks) = entry_over(
            primary,
            Arc::new(ShortStore::default()),
            ReplicationConfig::default().with_chunk_size(10),
        );

        let err = entry.prepare().await.unwrap_err();
        assert_eq!(
            err,
            CacheError::Consistency(ConsistencyError::ChunkMismatch {
                entity: "test.Books".to_string(),
                offset: 0,
                read: 10,
                inserted: 9,
            })
        );
        assert_eq!(entry.status(), EntryStatus::Failed);
    }

    #[tokio::test]
    async fn test_unvalidated_load_ignores_counts() {
        let mut primary = TablePrimary::new(5);
        primary.count_skew = 1;
        let mut config = ReplicationConfig::default();
        config.validate_rows = false;
        let (entry, _store, _tasks) = create_entry(Arc::new(primary), config);

        assert_eq!(entry.prepare().await.unwrap(), EntryStatus::Ready);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(EntryStatus::Ready.to_string(), "READY");
        assert_eq!(
            serde_json::to_value(EntryStatus::Initialized).unwrap(),
            json!("INITIALIZED")
        );
    }
}
