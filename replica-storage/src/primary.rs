//! Primary data service seam.

use async_trait::async_trait;
use replica_core::{CacheResult, Query, RequestContext, Row};

/// The authoritative data service the cache sits in front of.
///
/// The cache calls `run` both to serve bypassed reads and to source rows
/// while loading a replica. Loader queries carry
/// [`CacheDirective::Internal`](replica_core::CacheDirective::Internal) and
/// are ordered by the entity's key columns.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Run `query` in the scope of `ctx` and return the resulting rows.
    async fn run(&self, ctx: &RequestContext, query: &Query) -> CacheResult<Vec<Row>>;
}
