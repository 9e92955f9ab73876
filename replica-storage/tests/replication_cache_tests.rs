//! Integration tests for the replication cache.
//!
//! Every test drives [`ReplicationCache`] over the bookshop fixture with an
//! [`InMemoryPrimary`] and checks what was served from where.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use replica_core::StorageConfig;
use replica_storage::{EntryStatus, TenantActivation};
use replica_test_utils::assertions::{assert_same_rows, assert_skipped, assert_usage};
use replica_test_utils::fixtures::{self, all_books, books_with_authors, tenant_context};
use replica_test_utils::{
    Column, Expr, InMemoryPrimary, PrimaryStore, Query, ReplicationCache, ReplicationConfig,
    RequestContext, Select, SkipReason, TenantKey,
};

// ============================================================================
// TEST SETUP
// ============================================================================

fn cache_with(config: ReplicationConfig) -> (ReplicationCache, Arc<InMemoryPrimary>) {
    cache_over(InMemoryPrimary::bookshop(), config)
}

fn cache_over(
    primary: InMemoryPrimary,
    config: ReplicationConfig,
) -> (ReplicationCache, Arc<InMemoryPrimary>) {
    let primary = Arc::new(primary);
    let cache = ReplicationCache::new(Arc::new(fixtures::bookshop()), primary.clone(), config)
        .expect("valid configuration");
    (cache, primary)
}

fn waiting() -> ReplicationConfig {
    ReplicationConfig::default().with_wait(true)
}

async fn direct(primary: &InMemoryPrimary, ctx: &RequestContext, query: &Query) -> Vec<replica_test_utils::Row> {
    primary.run(ctx, query).await.unwrap()
}

// ============================================================================
// READ PATH
// ============================================================================

#[tokio::test]
async fn test_read_served_from_replica() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();

    let rows = cache.read(&ctx, &all_books()).await.unwrap();
    assert_eq!(rows.len(), fixtures::BOOK_COUNT);
    assert_same_rows(&rows, &direct(&primary, &ctx, &all_books()).await);
    assert_usage(&cache.stats(), 1, 1);
    assert_eq!(primary.loads("test.Books"), 1);
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Ready)
    );

    // Served again without touching the primary.
    cache.read(&ctx, &all_books()).await.unwrap();
    assert_usage(&cache.stats(), 2, 2);
    assert_eq!(primary.loads("test.Books"), 1);
    assert_eq!(cache.stats().count("test.Books"), 2);
}

#[tokio::test]
async fn test_clear_then_read_reloads() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();

    cache.read(&ctx, &all_books()).await.unwrap();
    cache.clear(None, Some("test.Books")).await.unwrap();
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Open)
    );
    assert_eq!(cache.size(None, Some("test.Books")).await, 0);

    let rows = cache.read(&ctx, &all_books()).await.unwrap();
    assert_eq!(rows.len(), fixtures::BOOK_COUNT);
    assert_usage(&cache.stats(), 2, 2);
    assert_eq!(primary.loads("test.Books"), 2);
}

#[tokio::test]
async fn test_path_expression_loads_every_dependency() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();

    let rows = cache.read(&ctx, &books_with_authors()).await.unwrap();
    assert_same_rows(&rows, &direct(&primary, &ctx, &books_with_authors()).await);
    assert_eq!(rows[0]["authorName"], serde_json::json!("Author 1"));
    assert_usage(&cache.stats(), 1, 1);
    assert_eq!(primary.loads("test.Books"), 1);
    assert_eq!(primary.loads("test.Authors"), 1);
}

#[tokio::test]
async fn test_no_wait_first_read_goes_to_primary() {
    let (cache, primary) = cache_with(ReplicationConfig::default());
    let ctx = RequestContext::default();

    let rows = cache.read(&ctx, &all_books()).await.unwrap();
    assert_eq!(rows.len(), fixtures::BOOK_COUNT);
    assert_eq!(cache.stats().missed, 1);
    assert_eq!(cache.stats().used, 0);

    cache.settle_background().await;
    assert_eq!(primary.loads("test.Books"), 1);

    cache.read(&ctx, &all_books()).await.unwrap();
    assert_usage(&cache.stats(), 2, 1);
    assert_eq!(primary.loads("test.Books"), 1);
}

#[tokio::test]
async fn test_concurrent_reads_coalesce_into_one_load() {
    let (cache, primary) = cache_over(
        InMemoryPrimary::bookshop().with_delay(Duration::from_millis(20)),
        waiting(),
    );
    let ctx = RequestContext::default();

    let query = all_books();
    let reads = (0..5).map(|_| cache.read(&ctx, &query));
    for rows in join_all(reads).await {
        assert_eq!(rows.unwrap().len(), fixtures::BOOK_COUNT);
    }

    assert_eq!(primary.loads("test.Books"), 1);
    assert_usage(&cache.stats(), 5, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_never_see_a_cleared_dependency() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();
    let query = books_with_authors();
    let expected = direct(&primary, &ctx, &query).await;
    cache.read(&ctx, &query).await.unwrap();
    assert_eq!(cache.stats().used, 1);

    let clearing = {
        let cache = cache.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                cache.clear(None, Some("test.Authors")).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let reads: Vec<_> = (0..40)
        .map(|_| {
            let cache = cache.clone();
            let ctx = ctx.clone();
            let query = query.clone();
            tokio::spawn(async move { cache.read(&ctx, &query).await.unwrap() })
        })
        .collect();

    for rows in join_all(reads).await {
        assert_same_rows(&rows.unwrap(), &expected);
    }
    clearing.await.unwrap();
    assert_eq!(cache.stats().errors, 0);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let (cache, primary) = cache_with(waiting());

    cache.read(&tenant_context("a"), &all_books()).await.unwrap();
    cache.read(&tenant_context("b"), &all_books()).await.unwrap();
    assert_eq!(primary.loads("test.Books"), 2);

    cache
        .clear(Some(&TenantKey::from("a")), Some("test.Books"))
        .await
        .unwrap();
    assert_eq!(
        cache.entry_status(&TenantKey::from("a"), "test.Books"),
        Some(EntryStatus::Open)
    );
    assert_eq!(
        cache.entry_status(&TenantKey::from("b"), "test.Books"),
        Some(EntryStatus::Ready)
    );
}

// ============================================================================
// BYPASS AND SKIP REASONS
// ============================================================================

#[tokio::test]
async fn test_opted_out_and_native_queries_bypass() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();

    let skipped = Query::Select(Select::from_entity("test.Books").skip_cache());
    assert_eq!(cache.read(&ctx, &skipped).await.unwrap().len(), fixtures::BOOK_COUNT);
    assert_eq!(cache.stats().hits, 0);

    let native = Query::Native("SELECT 1".to_string());
    assert!(cache.read(&ctx, &native).await.unwrap().is_empty());
    let stats = cache.stats();
    assert_usage(&stats, 1, 0);
    assert_eq!(stats.missed, 0);
    assert_eq!(primary.total_loads(), 0);
}

#[tokio::test]
async fn test_out_of_scope_query_is_not_counted() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();

    let quotes = Query::Select(Select::from_entity("test.Quotes"));
    assert_eq!(cache.read(&ctx, &quotes).await.unwrap().len(), 10);

    let stats = cache.stats();
    assert_usage(&stats, 1, 0);
    assert_skipped(&stats, SkipReason::NotRelevant, "test.Quotes", 0);
    assert_eq!(stats.count("test.Quotes"), 0);
    assert_eq!(primary.total_loads(), 0);
}

#[tokio::test]
async fn test_partly_relevant_query_counts_outside_entities() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();

    let query = Query::Select(Select::from_entity("test.Quotes").columns(vec![
        Column::path("text"),
        Column::aliased(Expr::col("book.title"), "title"),
    ]));
    let rows = cache.read(&ctx, &query).await.unwrap();
    assert_eq!(rows.len(), 10);

    let stats = cache.stats();
    assert_usage(&stats, 1, 0);
    assert_skipped(&stats, SkipReason::NotRelevant, "test.Quotes", 1);
    assert_skipped(&stats, SkipReason::NotRelevant, "test.Books", 0);
    assert_eq!(primary.total_loads(), 0);
}

#[tokio::test]
async fn test_search_skipped_unless_enabled() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();
    let query = Query::Select(Select::from_entity("test.Books").search("book 10"));

    assert_eq!(cache.read(&ctx, &query).await.unwrap().len(), 2);
    assert_skipped(&cache.stats(), SkipReason::Search, "test.Books", 1);
    assert_eq!(primary.total_loads(), 0);
}

#[tokio::test]
async fn test_unsupported_shape_is_a_miss_not_an_error() {
    let (cache, _primary) = cache_with(waiting().with_search(true));
    let ctx = RequestContext::default();
    let query = Query::Select(Select::from_entity("test.Books").search("book 10"));

    assert_eq!(cache.read(&ctx, &query).await.unwrap().len(), 2);
    let stats = cache.stats();
    assert_skipped(&stats, SkipReason::Unsupported, "test.Books", 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.missed, 1);
}

#[tokio::test]
async fn test_views_and_localized_skipped_without_deploy() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default().with_locale("de");

    let view = Query::Select(Select::from_entity("TestService.Books"));
    assert_eq!(cache.read(&ctx, &view).await.unwrap().len(), fixtures::BOOK_COUNT);

    let localized = Query::Select(Select::from_entity("test.Books").localized());
    cache.read(&ctx, &localized).await.unwrap();

    let localized_view = Query::Select(Select::from_entity("localized.test.Books"));
    cache.read(&ctx, &localized_view).await.unwrap();

    let stats = cache.stats();
    assert_usage(&stats, 3, 0);
    assert_skipped(&stats, SkipReason::Projection, "TestService.Books", 1);
    assert_skipped(&stats, SkipReason::Localized, "test.Books", 1);
    assert_skipped(&stats, SkipReason::Localized, "localized.test.Books", 1);
    assert_eq!(primary.total_loads(), 0);
}

#[tokio::test]
async fn test_disabled_reserved_and_inactive_tenants_bypass() {
    struct OnlyTenant(&'static str);

    #[async_trait]
    impl TenantActivation for OnlyTenant {
        async fn is_active(&self, tenant: &TenantKey) -> bool {
            tenant.name() == Some(self.0)
        }
    }

    let (disabled, _) = cache_with(waiting().with_enabled(false));
    disabled.read(&RequestContext::default(), &all_books()).await.unwrap();
    assert_eq!(disabled.stats().hits, 0);

    let (cache, _) = cache_with(waiting());
    cache.read(&tenant_context("template"), &all_books()).await.unwrap();
    assert_eq!(cache.stats().hits, 0);

    let primary = Arc::new(InMemoryPrimary::bookshop());
    let cache = ReplicationCache::with_activation(
        Arc::new(fixtures::bookshop()),
        primary.clone(),
        waiting(),
        Arc::new(OnlyTenant("a")),
    )
    .unwrap();
    cache.read(&tenant_context("b"), &all_books()).await.unwrap();
    assert_eq!(cache.stats().hits, 0);
    cache.read(&tenant_context("a"), &all_books()).await.unwrap();
    assert_usage(&cache.stats(), 1, 1);
}

// ============================================================================
// DEPLOY MODE
// ============================================================================

#[tokio::test]
async fn test_deploy_serves_views_from_base_entities() {
    let (cache, primary) = cache_with(waiting().with_deploy(true));
    let ctx = RequestContext::default();

    let view = Query::Select(Select::from_entity("TestService.Books"));
    let rows = cache.read(&ctx, &view).await.unwrap();
    assert_same_rows(&rows, &direct(&primary, &ctx, &view).await);
    assert_usage(&cache.stats(), 1, 1);
    assert_eq!(primary.loads("test.Books"), 1);
    assert_eq!(primary.loads("test.Authors"), 1);
    assert_eq!(primary.loads("TestService.Books"), 0);
}

#[tokio::test]
async fn test_deploy_serves_localized_reads() {
    let (cache, primary) = cache_with(waiting().with_deploy(true));
    let ctx = RequestContext::default().with_locale("de");

    let query = Query::Select(Select::from_entity("test.Books").localized());
    let rows = cache.read(&ctx, &query).await.unwrap();
    assert_same_rows(&rows, &direct(&primary, &ctx, &query).await);
    assert_eq!(primary.loads("test.Books.texts"), 1);
    assert_usage(&cache.stats(), 1, 1);
    assert!(rows
        .iter()
        .any(|row| row["title"] == serde_json::json!("Buch 1")));
}

#[tokio::test]
async fn test_disk_stores_are_cloned_from_template() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig::Disk {
        database: "bookshop".to_string(),
        base_dir: dir.path().to_string_lossy().into_owned(),
        use_tmp_dir: false,
    };
    let config = waiting()
        .with_deploy(true)
        .with_storage(storage)
        .with_max_store_size_mb(16);
    let (cache, primary) = cache_with(config.clone());

    for tenant in ["a", "b"] {
        let ctx = tenant_context(tenant);
        let rows = cache.read(&ctx, &all_books()).await.unwrap();
        assert_same_rows(&rows, &direct(&primary, &ctx, &all_books()).await);
    }
    assert_usage(&cache.stats(), 2, 2);

    let template = config.template_path().unwrap();
    assert!(template.exists());
    for tenant in ["a", "b"] {
        let key = TenantKey::from(tenant);
        assert!(config.store_path(&key).unwrap().exists());
        assert!(cache.tenant_size(&key).await.unwrap() > 0);
    }

    cache.shutdown().await.unwrap();
}

// ============================================================================
// LOAD POLICIES
// ============================================================================

#[tokio::test]
async fn test_no_auto_load_requires_preload() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();
    let genres = Query::Select(Select::from_entity("test.Genres"));

    cache.read(&ctx, &genres).await.unwrap();
    assert_eq!(primary.loads("test.Genres"), 0);
    assert_eq!(cache.stats().missed, 1);

    assert!(cache
        .preload(&TenantKey::Default, &["test.Genres"])
        .await
        .unwrap());
    assert_eq!(primary.loads("test.Genres"), 1);

    cache.read(&ctx, &genres).await.unwrap();
    assert_usage(&cache.stats(), 2, 1);
}

#[tokio::test]
async fn test_auto_load_disabled_globally() {
    let (cache, primary) = cache_with(waiting().with_auto_load(false));

    cache.read(&RequestContext::default(), &all_books()).await.unwrap();
    assert_eq!(primary.total_loads(), 0);
    assert_eq!(cache.stats().missed, 1);
}

#[tokio::test]
async fn test_preload_skips_out_of_scope_entities() {
    let (cache, primary) = cache_with(waiting());

    assert!(!cache
        .preload(&TenantKey::Default, &["test.Quotes"])
        .await
        .unwrap());
    assert!(cache
        .preload(&TenantKey::Default, &["test.Quotes", "test.Authors"])
        .await
        .unwrap());
    assert_eq!(primary.loads("test.Quotes"), 0);
    assert_eq!(primary.loads("test.Authors"), 1);
}

#[tokio::test]
async fn test_preload_mode_warms_annotated_entities() {
    let (cache, primary) = cache_with(waiting().with_preload(true));

    cache.read(&RequestContext::default(), &all_books()).await.unwrap();
    cache.settle_background().await;

    assert_eq!(primary.loads("test.Currencies"), 1);
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Currencies"),
        Some(EntryStatus::Ready)
    );
    assert_eq!(primary.loads("test.Genres"), 0);
}

#[tokio::test]
async fn test_preload_annotated_filter() {
    let (cache, primary) = cache_with(waiting());

    assert!(!cache
        .preload_annotated(&TenantKey::Default, Some(&["test.Books"]))
        .await
        .unwrap());
    assert!(cache
        .preload_annotated(&TenantKey::Default, None)
        .await
        .unwrap());
    assert_eq!(primary.total_loads(), 1);
    assert_eq!(primary.loads("test.Currencies"), 1);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_failures_invalidate_until_reset() {
    let (cache, primary) = cache_with(waiting().with_retries(1));
    let ctx = RequestContext::default();
    primary.fail_loads(usize::MAX);

    for _ in 0..3 {
        let rows = cache.read(&ctx, &all_books()).await.unwrap();
        assert_eq!(rows.len(), fixtures::BOOK_COUNT);
    }
    let stats = cache.stats();
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.used, 0);
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Invalid)
    );
    assert_eq!(primary.loads("test.Books"), 2);

    primary.fail_loads(0);
    assert!(cache.reset_entry(&TenantKey::Default, "test.Books"));
    assert!(!cache.reset_entry(&TenantKey::Default, "test.Quotes"));

    cache.read(&ctx, &all_books()).await.unwrap();
    assert_eq!(cache.stats().used, 1);
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Ready)
    );
}

#[tokio::test]
async fn test_primary_errors_propagate() {
    let (cache, primary) = cache_with(waiting());
    primary.set_failing(true);

    let result = cache.read(&RequestContext::default(), &all_books()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_count_mismatch_falls_back_to_primary() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();
    primary.inflate_counts(1);

    let rows = cache.read(&ctx, &all_books()).await.unwrap();
    assert_same_rows(&rows, &direct(&primary, &ctx, &all_books()).await);
    let stats = cache.stats();
    assert_usage(&stats, 1, 0);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.missed, 1);
    let entry = cache.entry(&TenantKey::Default, "test.Books").unwrap();
    assert_eq!(entry.status(), EntryStatus::Failed);
    assert_eq!(entry.failures(), 1);

    primary.inflate_counts(0);
    cache.read(&ctx, &all_books()).await.unwrap();
    assert_usage(&cache.stats(), 2, 1);
    assert_eq!(entry.status(), EntryStatus::Ready);
}

#[tokio::test]
async fn test_failed_provisioning_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("replicas");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let storage = StorageConfig::Disk {
        database: "bookshop".to_string(),
        base_dir: blocker.to_string_lossy().into_owned(),
        use_tmp_dir: false,
    };
    let (cache, primary) = cache_with(waiting().with_storage(storage).with_max_store_size_mb(16));
    let ctx = RequestContext::default();

    let rows = cache.read(&ctx, &all_books()).await.unwrap();
    assert_eq!(rows.len(), fixtures::BOOK_COUNT);
    let stats = cache.stats();
    assert_usage(&stats, 1, 0);
    assert_eq!(stats.errors, 1);
    assert_eq!(primary.total_loads(), 0);
    assert_eq!(cache.entry_status(&TenantKey::Default, "test.Books"), None);

    std::fs::remove_file(&blocker).unwrap();
    let rows = cache.read(&ctx, &all_books()).await.unwrap();
    assert_same_rows(&rows, &direct(&primary, &ctx, &all_books()).await);
    assert_usage(&cache.stats(), 2, 1);
    assert_eq!(cache.stats().errors, 1);
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Ready)
    );

    cache.shutdown().await.unwrap();
}

// ============================================================================
// EXPIRY, PRUNING, MAINTENANCE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry_reopens_entry() {
    let (cache, primary) = cache_with(waiting().with_ttl(Duration::from_secs(1)));
    let ctx = RequestContext::default();

    cache.read(&ctx, &all_books()).await.unwrap();
    assert!(cache.size(None, Some("test.Books")).await > 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Open)
    );
    assert_eq!(cache.size(None, Some("test.Books")).await, 0);

    cache.read(&ctx, &all_books()).await.unwrap();
    assert_eq!(primary.loads("test.Books"), 2);
    assert_usage(&cache.stats(), 2, 2);
}

#[tokio::test]
async fn test_prune_clears_least_recently_touched() {
    let (cache, _primary) = cache_with(waiting().with_size_budget(1000));
    let ctx = RequestContext::default();

    cache.read(&ctx, &all_books()).await.unwrap();
    cache
        .read(&ctx, &Query::Select(Select::from_entity("test.Authors")))
        .await
        .unwrap();
    assert!(cache.size(None, None).await > 1000);

    assert_eq!(cache.prune(None).await.unwrap(), 1);
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Open)
    );
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Authors"),
        Some(EntryStatus::Ready)
    );
    assert!(cache.size(None, None).await <= 1000);
    assert_eq!(cache.prune(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_prune_share_ignores_unprovisioned_tenants() {
    fn on_disk(dir: &std::path::Path) -> ReplicationConfig {
        waiting()
            .with_storage(StorageConfig::Disk {
                database: "bookshop".to_string(),
                base_dir: dir.to_string_lossy().into_owned(),
                use_tmp_dir: false,
            })
            .with_max_store_size_mb(16)
    }

    let scout_dir = tempfile::tempdir().unwrap();
    let (scout, _primary) = cache_with(on_disk(scout_dir.path()));
    scout.read(&RequestContext::default(), &all_books()).await.unwrap();
    let books_size = scout.size(None, None).await;
    scout.shutdown().await.unwrap();
    assert!(books_size > 0);

    // Room for one tenant's books, but not for two equal shares.
    let dir = tempfile::tempdir().unwrap();
    let config = on_disk(dir.path()).with_size_budget(2 * books_size - 1);
    let blocked = config.store_path(&TenantKey::from("b")).unwrap();
    std::fs::create_dir_all(blocked.parent().unwrap()).unwrap();
    std::fs::write(&blocked, b"not a directory").unwrap();
    let (cache, _primary) = cache_with(config);

    cache.read(&RequestContext::default(), &all_books()).await.unwrap();
    cache.read(&tenant_context("b"), &all_books()).await.unwrap();
    let stats = cache.stats();
    assert_usage(&stats, 2, 1);
    assert_eq!(stats.errors, 1);

    assert_eq!(cache.prune(None).await.unwrap(), 0);
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Ready)
    );
    cache.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_prune_after_preparation() {
    let (cache, _primary) = cache_with(waiting().with_size_budget(1000).with_prune(true));

    cache.read(&RequestContext::default(), &all_books()).await.unwrap();
    assert_eq!(cache.stats().used, 0);
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Open)
    );
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_prunes_periodically() {
    let config = waiting()
        .with_size_budget(1000)
        .with_intervals(Duration::from_secs(10), Duration::from_secs(10));
    let (cache, _primary) = cache_with(config);

    cache.read(&RequestContext::default(), &all_books()).await.unwrap();
    assert!(cache.start_maintenance());
    assert!(!cache.start_maintenance());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Open)
    );

    cache.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_logs_stats_periodically() {
    let config = waiting().with_intervals(Duration::ZERO, Duration::from_secs(5));
    let (cache, _primary) = cache_with(config);

    cache.read(&RequestContext::default(), &all_books()).await.unwrap();
    assert!(cache.start_maintenance());

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_usage(&cache.stats(), 1, 1);
    assert_eq!(
        cache.entry_status(&TenantKey::Default, "test.Books"),
        Some(EntryStatus::Ready)
    );

    cache.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_log_stats_can_run_on_spawned_tasks() {
    fn assert_send<T: Send>(_: &T) {}

    let (cache, _primary) = cache_with(waiting());
    cache.read(&RequestContext::default(), &all_books()).await.unwrap();
    let logging = cache.log_stats();
    assert_send(&logging);
    logging.await;

    let spawned = cache.clone();
    tokio::spawn(async move { spawned.log_stats().await })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_maintenance_disabled_without_intervals() {
    let (cache, _primary) = cache_with(waiting());
    assert!(!cache.start_maintenance());
}

// ============================================================================
// OPERATIONS
// ============================================================================

#[tokio::test]
async fn test_measure_runs_both_sides() {
    let (cache, primary) = cache_with(waiting().with_measure(true));

    let rows = cache.read(&RequestContext::default(), &all_books()).await.unwrap();
    assert_eq!(rows.len(), fixtures::BOOK_COUNT);

    let stats = cache.stats();
    assert_usage(&stats, 1, 1);
    assert_eq!(stats.measure_count, 1);
    assert_eq!(primary.external_queries(), 1);
}

#[tokio::test]
async fn test_size_and_reset() {
    let (cache, _primary) = cache_with(waiting());
    let tenant = TenantKey::from("a");

    cache.read(&tenant_context("a"), &all_books()).await.unwrap();
    let entry = cache.entry(&tenant, "test.Books").unwrap();
    assert_eq!(cache.size(Some(&tenant), Some("test.Books")).await, entry.size());
    assert!(cache.tenant_size(&tenant).await.unwrap() >= entry.size());
    assert_eq!(cache.size(Some(&TenantKey::from("b")), None).await, 0);

    cache.prepared(Some(&tenant), None).await;
    cache.log_stats().await;

    cache.reset().await.unwrap();
    assert_eq!(cache.stats(), Default::default());
    assert_eq!(entry.status(), EntryStatus::Open);
    assert_eq!(cache.size(None, None).await, 0);
}

#[tokio::test]
async fn test_shutdown_falls_back_to_primary() {
    let (cache, primary) = cache_with(waiting());
    let ctx = RequestContext::default();

    cache.read(&ctx, &all_books()).await.unwrap();
    cache.shutdown().await.unwrap();
    cache.shutdown().await.unwrap();

    assert_eq!(cache.read(&ctx, &all_books()).await.unwrap().len(), fixtures::BOOK_COUNT);
    assert_usage(&cache.stats(), 1, 1);
    assert_eq!(cache.entry_status(&TenantKey::Default, "test.Books"), None);
    assert_eq!(primary.loads("test.Books"), 1);
}

#[test]
fn test_invalid_config_rejected() {
    let primary = Arc::new(InMemoryPrimary::bookshop());
    let result = ReplicationCache::new(
        Arc::new(fixtures::bookshop()),
        primary,
        ReplicationConfig::default().with_chunk_size(0),
    );
    assert!(result.is_err());
}
