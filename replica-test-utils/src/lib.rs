//! Replica Test Utilities
//!
//! Shared test infrastructure for the replica workspace:
//! - Bookshop fixture model and dataset
//! - In-memory primary store with load counting and failure injection
//! - Proptest generators
//! - Custom assertions

pub use replica_core::{
    CacheDirective, CacheError, CacheResult, Cardinality, Column, Definition, Element, Expr,
    Model, PrimaryError, Query, ReplicationConfig, ReplicationPolicy, RequestContext, Row,
    Select, Source, TenantKey,
};
pub use replica_query::{Dataset, Evaluator};
pub use replica_storage::{CacheStatistics, PrimaryStore, ReplicationCache, SkipReason};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build a row from a JSON object literal.
pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

// ============================================================================
// IN-MEMORY PRIMARY
// ============================================================================

/// Primary store that evaluates queries over a fixed dataset.
///
/// Every query is recorded. Loader queries (internal selects starting at
/// offset 0) are counted per entity so tests can assert how often the cache
/// actually loaded.
#[derive(Debug)]
pub struct InMemoryPrimary {
    model: Model,
    data: Dataset,
    delay: Duration,
    queries: Mutex<Vec<Query>>,
    loads: Mutex<BTreeMap<String, usize>>,
    failing: AtomicBool,
    failing_loads: AtomicUsize,
    count_skew: AtomicU64,
}

impl InMemoryPrimary {
    pub fn new(model: Model, data: Dataset) -> Self {
        Self {
            model,
            data,
            delay: Duration::ZERO,
            queries: Mutex::new(Vec::new()),
            loads: Mutex::new(BTreeMap::new()),
            failing: AtomicBool::new(false),
            failing_loads: AtomicUsize::new(0),
            count_skew: AtomicU64::new(0),
        }
    }

    /// Primary over [`fixtures::bookshop`] and [`fixtures::bookshop_data`].
    pub fn bookshop() -> Self {
        Self::new(fixtures::bookshop(), fixtures::bookshop_data())
    }

    /// Delay every loader query by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every query while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` internal queries. Caller reads still succeed.
    pub fn fail_loads(&self, count: usize) {
        self.failing_loads.store(count, Ordering::SeqCst);
    }

    /// Report `by` more rows than exist from internal count queries.
    pub fn inflate_counts(&self, by: u64) {
        self.count_skew.store(by, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<Query> {
        lock(&self.queries).clone()
    }

    /// Queries that did not originate from the cache.
    pub fn external_queries(&self) -> usize {
        lock(&self.queries)
            .iter()
            .filter(|query| !is_internal(query))
            .count()
    }

    /// Number of loads started for `entity`.
    pub fn loads(&self, entity: &str) -> usize {
        lock(&self.loads).get(entity).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        lock(&self.loads).values().sum()
    }

    fn record(&self, query: &Query) {
        lock(&self.queries).push(query.clone());
        let Some(select) = query.as_select() else {
            return;
        };
        if !is_internal(query) || !select.limit.is_some_and(|limit| limit.offset == 0) {
            return;
        }
        if let Source::Scan(scan) = &select.from {
            *lock(&self.loads).entry(scan.entity.clone()).or_default() += 1;
        }
    }

    fn take_load_failure(&self) -> bool {
        self.failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Serve a search by evaluating without the term and keeping rows with
    /// a string field containing it.
    fn search(&self, ctx: &RequestContext, select: &Select, term: &str) -> CacheResult<Vec<Row>> {
        let mut plain = select.clone();
        plain.search = None;
        plain.limit = None;
        let rows = Evaluator::new(&self.model, &self.data)
            .with_locale(ctx.locale.as_deref())
            .execute(&Query::Select(plain))?;
        let term = term.to_lowercase();
        Ok(rows
            .into_iter()
            .filter(|row| {
                row.values().any(|value| {
                    value
                        .as_str()
                        .is_some_and(|text| text.to_lowercase().contains(&term))
                })
            })
            .collect())
    }
}

fn is_internal(query: &Query) -> bool {
    query
        .as_select()
        .is_some_and(|select| select.cache == CacheDirective::Internal)
}

#[async_trait]
impl PrimaryStore for InMemoryPrimary {
    async fn run(&self, ctx: &RequestContext, query: &Query) -> CacheResult<Vec<Row>> {
        self.record(query);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PrimaryError::Failed {
                reason: "primary offline".to_string(),
            }
            .into());
        }
        if is_internal(query) {
            if self.take_load_failure() {
                return Err(PrimaryError::Failed {
                    reason: "injected load failure".to_string(),
                }
                .into());
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        let Some(select) = query.as_select() else {
            return Ok(Vec::new());
        };
        if let Some(term) = &select.search {
            return self.search(ctx, select, term);
        }
        let mut rows = Evaluator::new(&self.model, &self.data)
            .with_locale(ctx.locale.as_deref())
            .execute(query)?;
        let skew = self.count_skew.load(Ordering::SeqCst);
        if skew > 0 && select.one && is_internal(query) {
            for row in &mut rows {
                if let Some(count) = row.get("count").and_then(Value::as_u64) {
                    row.insert("count".to_string(), Value::from(count + skew));
                }
            }
        }
        Ok(rows)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Generate a tenant key, never the reserved template name.
    pub fn arb_tenant_key() -> impl Strategy<Value = TenantKey> {
        prop_oneof![
            Just(TenantKey::Default),
            "[a-z][a-z0-9]{0,7}"
                .prop_filter("reserved tenant name", |name| name != "template")
                .prop_map(|name| TenantKey::from(name.as_str())),
        ]
    }

    /// Generate one of the replicated bookshop entities.
    pub fn arb_replicated_entity() -> impl Strategy<Value = String> {
        prop::sample::select(fixtures::REPLICATED.to_vec()).prop_map(str::to_string)
    }

    /// Generate a chunk size from tiny to larger than any fixture relation.
    pub fn arb_chunk_size() -> impl Strategy<Value = usize> {
        prop_oneof![1usize..=10, 11usize..=300]
    }

    /// Generate a simple read over one replicated entity.
    pub fn arb_select() -> impl Strategy<Value = Select> {
        (
            arb_replicated_entity(),
            prop::option::of((1usize..50, 0usize..50)),
            prop::option::of(1i64..=20),
        )
            .prop_map(|(entity, limit, id)| {
                let mut select = Select::from_entity(entity);
                if let Some(id) = id {
                    select = select.filter(Expr::eq(Expr::col("ID"), Expr::val(id)));
                }
                if let Some((rows, offset)) = limit {
                    select = select.limit(rows, offset);
                }
                select
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use serde_json::json;

    pub const BOOK_COUNT: usize = 100;
    pub const AUTHOR_COUNT: usize = 10;
    pub const PAGES_PER_BOOK: usize = 2;

    /// Entities replicated under the default configuration.
    pub const REPLICATED: &[&str] = &[
        "test.Authors",
        "test.Books",
        "test.Books.texts",
        "test.Currencies",
        "test.Genres",
        "test.Pages",
    ];

    /// Bookshop model.
    ///
    /// - `test.Books`, `test.Authors`, `test.Pages`: replicated, auto-loaded
    /// - `test.Books.texts`: text variant of books
    /// - `test.Genres`: replicated, never auto-loaded
    /// - `test.Currencies`: replicated, preloaded
    /// - `test.Ratings`: replicated in the `slow` group only
    /// - `test.Quotes`: not replicated
    /// - `TestService.Books`, `localized.test.Books`: derived views
    pub fn bookshop() -> Model {
        Model::new()
            .with_definition(
                Definition::entity("test.Authors")
                    .with_keys(&["ID"])
                    .with_columns(&["name"])
                    .with_element(Element::association(
                        "books",
                        "test.Books",
                        &[("ID", "author_ID")],
                        Cardinality::Many,
                    ))
                    .with_policy(ReplicationPolicy::default()),
            )
            .with_definition(
                Definition::entity("test.Books")
                    .with_keys(&["ID"])
                    .with_columns(&["title", "stock", "author_ID", "genre_ID"])
                    .with_element(Element::association(
                        "author",
                        "test.Authors",
                        &[("author_ID", "ID")],
                        Cardinality::One,
                    ))
                    .with_element(Element::association(
                        "genre",
                        "test.Genres",
                        &[("genre_ID", "ID")],
                        Cardinality::One,
                    ))
                    .with_element(Element::composition(
                        "pages",
                        "test.Pages",
                        &[("ID", "book_ID")],
                        Cardinality::Many,
                    ))
                    .with_element(Element::composition(
                        "texts",
                        "test.Books.texts",
                        &[("ID", "ID")],
                        Cardinality::Many,
                    ))
                    .with_policy(ReplicationPolicy::default()),
            )
            .with_definition(
                Definition::entity("test.Books.texts")
                    .with_keys(&["ID", "locale"])
                    .with_columns(&["title"]),
            )
            .with_definition(
                Definition::entity("test.Pages")
                    .with_keys(&["ID"])
                    .with_columns(&["number", "content", "book_ID"])
                    .with_element(Element::association(
                        "book",
                        "test.Books",
                        &[("book_ID", "ID")],
                        Cardinality::One,
                    ))
                    .with_policy(ReplicationPolicy::default()),
            )
            .with_definition(
                Definition::entity("test.Genres")
                    .with_keys(&["ID"])
                    .with_columns(&["name"])
                    .with_policy(ReplicationPolicy::default().with_auto_load(false)),
            )
            .with_definition(
                Definition::entity("test.Currencies")
                    .with_keys(&["code"])
                    .with_columns(&["name"])
                    .with_policy(ReplicationPolicy::default().with_preload(true)),
            )
            .with_definition(
                Definition::entity("test.Ratings")
                    .with_keys(&["ID"])
                    .with_columns(&["stars", "book_ID"])
                    .with_policy(ReplicationPolicy::default().with_group("slow")),
            )
            .with_definition(
                Definition::entity("test.Quotes")
                    .with_keys(&["ID"])
                    .with_columns(&["text", "book_ID"])
                    .with_element(Element::association(
                        "book",
                        "test.Books",
                        &[("book_ID", "ID")],
                        Cardinality::One,
                    )),
            )
            .with_definition(
                Definition::view(
                    "TestService.Books",
                    Select::from_entity("test.Books").columns(vec![
                        Column::path("ID"),
                        Column::path("title"),
                        Column::path("author_ID"),
                        Column::aliased(Expr::col("author.name"), "authorName"),
                    ]),
                )
                .with_keys(&["ID"])
                .with_columns(&["title", "author_ID", "authorName"])
                .with_element(Element::association(
                    "author",
                    "test.Authors",
                    &[("author_ID", "ID")],
                    Cardinality::One,
                ))
                .with_policy(ReplicationPolicy::default()),
            )
            .with_definition(
                Definition::view(
                    "localized.test.Books",
                    Select::from_entity("test.Books").localized(),
                )
                .with_keys(&["ID"])
                .with_columns(&["title", "stock", "author_ID", "genre_ID"]),
            )
    }

    /// Rows for every bookshop entity.
    pub fn bookshop_data() -> Dataset {
        let authors = (1..=AUTHOR_COUNT)
            .map(|i| row(json!({"ID": i, "name": format!("Author {i}")})))
            .collect();
        let books = (1..=BOOK_COUNT)
            .map(|i| {
                row(json!({
                    "ID": i,
                    "title": format!("Book {i}"),
                    "stock": (i * 7) % 50,
                    "author_ID": (i - 1) % AUTHOR_COUNT + 1,
                    "genre_ID": (i - 1) % 5 + 1,
                }))
            })
            .collect();
        let texts = (1..=10)
            .map(|i| row(json!({"ID": i, "locale": "de", "title": format!("Buch {i}")})))
            .collect();
        let pages = (1..=BOOK_COUNT)
            .flat_map(|book| {
                (1..=PAGES_PER_BOOK).map(move |number| {
                    row(json!({
                        "ID": (book - 1) * PAGES_PER_BOOK + number,
                        "number": number,
                        "content": format!("Page {number} of book {book}"),
                        "book_ID": book,
                    }))
                })
            })
            .collect();
        let genres = ["Fantasy", "Crime", "Poetry", "Science", "History"]
            .iter()
            .enumerate()
            .map(|(i, name)| row(json!({"ID": i + 1, "name": name})))
            .collect();
        let currencies = [("EUR", "Euro"), ("JPY", "Yen"), ("USD", "US Dollar")]
            .iter()
            .map(|(code, name)| row(json!({"code": code, "name": name})))
            .collect();
        let ratings = (1..=5)
            .map(|i| row(json!({"ID": i, "stars": i, "book_ID": i})))
            .collect();
        let quotes = (1..=10)
            .map(|i| row(json!({"ID": i, "text": format!("Quote {i}"), "book_ID": i})))
            .collect();

        Dataset::new()
            .with_relation("test.Authors", authors)
            .with_relation("test.Books", books)
            .with_relation("test.Books.texts", texts)
            .with_relation("test.Pages", pages)
            .with_relation("test.Genres", genres)
            .with_relation("test.Currencies", currencies)
            .with_relation("test.Ratings", ratings)
            .with_relation("test.Quotes", quotes)
    }

    /// `SELECT * FROM test.Books`
    pub fn all_books() -> Query {
        Query::Select(Select::from_entity("test.Books"))
    }

    /// Books joined to their author's name through a path expression.
    pub fn books_with_authors() -> Query {
        Query::Select(Select::from_entity("test.Books").columns(vec![
            Column::path("ID"),
            Column::path("title"),
            Column::aliased(Expr::col("author.name"), "authorName"),
        ]))
    }

    pub fn tenant_context(tenant: &str) -> RequestContext {
        RequestContext::for_tenant(TenantKey::from(tenant))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert two row sets are equal regardless of order.
    pub fn assert_same_rows(actual: &[Row], expected: &[Row]) {
        let key = |row: &Row| Value::Object(row.clone()).to_string();
        let mut actual: Vec<String> = actual.iter().map(key).collect();
        let mut expected: Vec<String> = expected.iter().map(key).collect();
        actual.sort();
        expected.sort();
        assert_eq!(actual, expected, "row sets differ");
    }

    /// Assert the replica served exactly `used` of `hits` intercepted reads.
    pub fn assert_usage(stats: &CacheStatistics, hits: u64, used: u64) {
        assert_eq!(
            (stats.hits, stats.used),
            (hits, used),
            "expected {hits} hits and {used} replica reads, got {stats:?}"
        );
    }

    /// Assert the skip count for `entity` under `reason`.
    pub fn assert_skipped(stats: &CacheStatistics, reason: SkipReason, entity: &str, count: u64) {
        assert_eq!(
            stats.skip_count(reason, entity),
            count,
            "expected {count} {reason:?} skips for {entity}, got {:?}",
            stats.skipped
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
