//! Error types for replica cache operations

use thiserror::Error;

/// Query reference resolution errors.
///
/// These never fail a read; the coordinator treats them as "no relevant refs".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Ambiguous query shape: {reason}")]
    Ambiguous { reason: String },

    #[error("Relationship depth {depth} exceeded while resolving {entity}")]
    DepthExceeded { entity: String, depth: usize },

    #[error("Unknown element {element} on {entity}")]
    UnknownElement { entity: String, element: String },

    #[error("Unknown definition: {name}")]
    UnknownDefinition { name: String },
}

/// Row-count mismatches detected while loading a replica.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("Chunk mismatch for {entity} at offset {offset}: read {read}, inserted {inserted}")]
    ChunkMismatch {
        entity: String,
        offset: usize,
        read: usize,
        inserted: u64,
    },

    #[error("Row count mismatch for {entity}: primary {primary}, replica {replica}")]
    CountMismatch {
        entity: String,
        primary: u64,
        replica: u64,
    },
}

/// Replica store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Provisioning store for tenant {tenant} failed: {reason}")]
    ProvisionFailed { tenant: String, reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Unknown relation: {relation}")]
    UnknownRelation { relation: String },

    #[error("Unsupported query on replica: {reason}")]
    Unsupported { reason: String },

    #[error("Store is closed")]
    Closed,

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Errors reported by the primary data service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrimaryError {
    #[error("Primary query failed: {reason}")]
    Failed { reason: String },

    #[error("Primary returned malformed result for {entity}: {reason}")]
    Malformed { entity: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all replica cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Primary error: {0}")]
    Primary(#[from] PrimaryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Retry budget exceeded for {entity} after {failures} failures")]
    RetryBudgetExceeded { entity: String, failures: u32 },

    #[error("Background task failed: {reason}")]
    Task { reason: String },
}

impl CacheError {
    /// Returns true if the replica cannot serve the query shape, as opposed to a malfunction.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unsupported { .. }))
    }
}

/// Result type alias for replica cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
