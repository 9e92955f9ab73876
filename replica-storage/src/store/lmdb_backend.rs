//! LMDB-backed replica store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep one tenant's replica
//! in a memory-mapped environment on disk.
//!
//! # Layout
//!
//! - One named database per relation (`test.Books` lives in `test_Books`)
//! - Keys are a big-endian `u64` insertion sequence, so key order is
//!   insertion order
//! - Values are rows serialized as JSON
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Every trait method runs in its own
//! read or write transaction; an insert is committed as one unit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{CompactionOption, Database, Env, EnvOpenOptions, RoTxn};
use replica_core::{relation_name, CacheError, CacheResult, Definition, Row, StoreError};

/// Named databases one environment may hold.
const MAX_RELATIONS: u32 = 256;

/// LMDB data file inside an environment directory.
const DATA_FILE: &str = "data.mdb";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open or create a named database.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for CacheError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Serialization(reason) | LmdbStoreError::Deserialization(reason) => {
                CacheError::Store(StoreError::Serialization { reason })
            }
            other => CacheError::Store(StoreError::Transaction {
                reason: other.to_string(),
            }),
        }
    }
}

type Relation = Database<Bytes, Bytes>;

/// Replica store backed by one LMDB environment.
///
/// # Example
///
/// ```ignore
/// use replica_storage::store::{LmdbReplicaStore, ReplicaStore};
///
/// let store = LmdbReplicaStore::open("/tmp/replica/data", 256)?;
/// store.ensure_relation(&books).await?;
/// store.insert("test.Books", &rows).await?;
/// ```
pub struct LmdbReplicaStore {
    /// The LMDB environment.
    env: Env,
    /// Environment directory.
    path: PathBuf,
    /// Opened named databases, keyed by relation name.
    relations: RwLock<HashMap<String, Relation>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LmdbReplicaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbReplicaStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LmdbReplicaStore {
    /// Open (or create) the environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory holding the LMDB files
    /// * `max_size_mb` - Map size of the environment in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// environment cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(MAX_RELATIONS)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        Ok(Self {
            env,
            path: path.as_ref().to_path_buf(),
            relations: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Environment directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a compacted copy of this environment into the directory `target`.
    ///
    /// Any previous data file in `target` is replaced.
    pub fn copy_to<P: AsRef<Path>>(&self, target: P) -> Result<(), LmdbStoreError> {
        let target = target.as_ref();
        std::fs::create_dir_all(target)?;
        let file = target.join(DATA_FILE);
        if file.exists() {
            std::fs::remove_file(&file)?;
        }
        self.env
            .copy_to_file(&file, CompactionOption::Enabled)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        tracing::debug!(
            source = %self.path.display(),
            target = %target.display(),
            "Replica store copied"
        );
        Ok(())
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Look up the named database for `entity`, opening it if it exists on disk.
    fn relation(&self, entity: &str) -> CacheResult<Option<Relation>> {
        self.check_open()?;
        let name = relation_name(entity);
        if let Some(db) = self
            .relations
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(&name)
        {
            return Ok(Some(*db));
        }

        // Handles opened in an aborted transaction are closed again, so commit.
        let wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let db: Option<Relation> = self
            .env
            .open_database(&wtxn, Some(name.as_str()))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        if let Some(db) = db {
            self.relations
                .write()
                .map_err(|_| StoreError::LockPoisoned)?
                .insert(name, db);
        }
        Ok(db)
    }

    fn require(&self, entity: &str) -> CacheResult<Relation> {
        self.relation(entity)?.ok_or_else(|| {
            StoreError::UnknownRelation {
                relation: relation_name(entity),
            }
            .into()
        })
    }

    fn read_txn(&self) -> Result<RoTxn<'_>, LmdbStoreError> {
        self.env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    fn stored_bytes(db: &Relation, rtxn: &RoTxn<'_>) -> Result<u64, LmdbStoreError> {
        let iter = db
            .iter(rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let mut bytes = 0u64;
        for result in iter {
            let (key, value) = result.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            bytes += (key.len() + value.len()) as u64;
        }
        Ok(bytes)
    }
}

fn decode_sequence(key: &[u8]) -> Result<u64, LmdbStoreError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| LmdbStoreError::Deserialization("Invalid row key".into()))?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl super::ReplicaStore for LmdbReplicaStore {
    async fn ensure_relation(&self, definition: &Definition) -> CacheResult<()> {
        if self.relation(&definition.name)?.is_some() {
            return Ok(());
        }
        let name = relation_name(&definition.name);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let db: Relation = self
            .env
            .create_database(&mut wtxn, Some(name.as_str()))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.relations
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(name, db);
        Ok(())
    }

    async fn has_relation(&self, entity: &str) -> CacheResult<bool> {
        Ok(self.relation(entity)?.is_some())
    }

    async fn truncate(&self, entity: &str) -> CacheResult<()> {
        let db = self.require(entity)?;
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        db.clear(&mut wtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    async fn insert(&self, entity: &str, rows: &[Row]) -> CacheResult<u64> {
        let db = self.require(entity)?;
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut next = match db
            .last(&wtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
        {
            Some((key, _)) => decode_sequence(key)? + 1,
            None => 0,
        };

        let mut inserted = 0u64;
        for row in rows {
            let value =
                serde_json::to_vec(row).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
            db.put(&mut wtxn, &next.to_be_bytes(), &value)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            next += 1;
            inserted += 1;
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(inserted)
    }

    async fn count(&self, entity: &str) -> CacheResult<u64> {
        let db = self.require(entity)?;
        let rtxn = self.read_txn()?;
        let count = db
            .len(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(count)
    }

    async fn scan(&self, entity: &str) -> CacheResult<Vec<Row>> {
        let db = self.require(entity)?;
        let rtxn = self.read_txn()?;
        let iter = db
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut rows = Vec::new();
        for result in iter {
            let (_, value) = result.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            let row: Row = serde_json::from_slice(value)
                .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
            rows.push(row);
        }
        Ok(rows)
    }

    async fn relation_size(&self, entity: &str) -> CacheResult<u64> {
        let db = self.require(entity)?;
        let rtxn = self.read_txn()?;
        Ok(Self::stored_bytes(&db, &rtxn)?)
    }

    async fn total_size(&self) -> CacheResult<u64> {
        self.check_open()?;
        let relations: Vec<Relation> = self
            .relations
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .values()
            .copied()
            .collect();
        let rtxn = self.read_txn()?;
        let mut total = 0;
        for db in &relations {
            total += Self::stored_bytes(db, &rtxn)?;
        }
        Ok(total)
    }

    async fn close(&self) -> CacheResult<()> {
        self.closed.store(true, Ordering::Release);
        self.relations
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .clear();
        self.env
            .force_sync()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        tracing::debug!(path = %self.path.display(), "Replica store closed");
        Ok(())
    }
}
