//! In-memory replica store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use replica_core::{relation_name, CacheResult, Definition, Row, StoreError};

/// Replica store keeping every relation in process memory.
///
/// Sizes are the serialized JSON length of the stored rows.
#[derive(Debug, Default)]
pub struct MemoryReplicaStore {
    relations: RwLock<HashMap<String, Vec<Row>>>,
    closed: AtomicBool,
}

impl MemoryReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn read<T>(&self, entity: &str, f: impl FnOnce(&Vec<Row>) -> T) -> CacheResult<T> {
        self.check_open()?;
        let relation = relation_name(entity);
        let relations = self.relations.read().map_err(|_| StoreError::LockPoisoned)?;
        let rows = relations
            .get(&relation)
            .ok_or(StoreError::UnknownRelation { relation })?;
        Ok(f(rows))
    }

    fn write<T>(&self, entity: &str, f: impl FnOnce(&mut Vec<Row>) -> T) -> CacheResult<T> {
        self.check_open()?;
        let relation = relation_name(entity);
        let mut relations = self.relations.write().map_err(|_| StoreError::LockPoisoned)?;
        let rows = relations
            .get_mut(&relation)
            .ok_or(StoreError::UnknownRelation { relation })?;
        Ok(f(rows))
    }
}

fn rows_size(rows: &[Row]) -> u64 {
    rows.iter()
        .map(|row| serde_json::to_vec(row).map(|bytes| bytes.len() as u64).unwrap_or(0))
        .sum()
}

#[async_trait]
impl super::ReplicaStore for MemoryReplicaStore {
    async fn ensure_relation(&self, definition: &Definition) -> CacheResult<()> {
        self.check_open()?;
        let mut relations = self.relations.write().map_err(|_| StoreError::LockPoisoned)?;
        relations
            .entry(relation_name(&definition.name))
            .or_default();
        Ok(())
    }

    async fn has_relation(&self, entity: &str) -> CacheResult<bool> {
        self.check_open()?;
        let relations = self.relations.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(relations.contains_key(&relation_name(entity)))
    }

    async fn truncate(&self, entity: &str) -> CacheResult<()> {
        self.write(entity, Vec::clear)
    }

    async fn insert(&self, entity: &str, rows: &[Row]) -> CacheResult<u64> {
        self.write(entity, |stored| {
            stored.extend_from_slice(rows);
            rows.len() as u64
        })
    }

    async fn count(&self, entity: &str) -> CacheResult<u64> {
        self.read(entity, |rows| rows.len() as u64)
    }

    async fn scan(&self, entity: &str) -> CacheResult<Vec<Row>> {
        self.read(entity, Vec::clone)
    }

    async fn relation_size(&self, entity: &str) -> CacheResult<u64> {
        self.read(entity, |rows| rows_size(rows))
    }

    async fn total_size(&self) -> CacheResult<u64> {
        self.check_open()?;
        let relations = self.relations.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(relations.values().map(|rows| rows_size(rows)).sum())
    }

    async fn close(&self) -> CacheResult<()> {
        self.closed.store(true, Ordering::Release);
        let mut relations = self.relations.write().map_err(|_| StoreError::LockPoisoned)?;
        relations.clear();
        Ok(())
    }
}
