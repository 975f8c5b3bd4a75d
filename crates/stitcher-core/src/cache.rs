//! # Result Cache
//!
//! Memoization for expensive derived results such as component lists or
//! resolution output. A cache is only ever an accelerator: read, write or
//! decoding failures are logged and the value is recomputed.

use crate::types::StitchError;
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableDatabase, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;

/// Cached entries: key -> postcard-encoded value
const CACHE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");

pub trait Cache<V> {
    /// Return the cached value for `key`, computing and storing it on a
    /// miss. Errors from `supplier` propagate; cache errors do not.
    fn get_or_compute<F>(&mut self, key: &str, supplier: F) -> Result<V, StitchError>
    where
        F: FnOnce() -> Result<V, StitchError>;

    /// Drop the entry for `key`.
    fn remove(&mut self, key: &str);
}

/// Process-local cache.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache<V> {
    entries: BTreeMap<String, V>,
}

impl<V> MemoryCache<V> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Cache<V> for MemoryCache<V> {
    fn get_or_compute<F>(&mut self, key: &str, supplier: F) -> Result<V, StitchError>
    where
        F: FnOnce() -> Result<V, StitchError>,
    {
        if let Some(hit) = self.entries.get(key) {
            return Ok(hit.clone());
        }
        let value = supplier()?;
        self.entries.insert(key.to_string(), value.clone());
        Ok(value)
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// Cache persisted in its own redb database.
pub struct RedbCache {
    db: Database,
}

impl std::fmt::Debug for RedbCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbCache").finish_non_exhaustive()
    }
}

fn io_err(e: impl std::fmt::Display) -> StitchError {
    StitchError::IoError(e.to_string())
}

impl RedbCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StitchError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;
        Self::init(db)
    }

    pub fn in_memory() -> Result<Self, StitchError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(io_err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, StitchError> {
        let write_txn = db.begin_write().map_err(io_err)?;
        write_txn.open_table(CACHE).map_err(io_err)?;
        write_txn.commit().map_err(io_err)?;
        Ok(Self { db })
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StitchError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(CACHE).map_err(io_err)?;
        Ok(table.get(key).map_err(io_err)?.map(|v| v.value().to_vec()))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StitchError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(CACHE).map_err(io_err)?;
            table.insert(key, bytes).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)
    }

    fn delete(&self, key: &str) -> Result<(), StitchError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(CACHE).map_err(io_err)?;
            table.remove(key).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)
    }
}

impl<V: Serialize + DeserializeOwned> Cache<V> for RedbCache {
    fn get_or_compute<F>(&mut self, key: &str, supplier: F) -> Result<V, StitchError>
    where
        F: FnOnce() -> Result<V, StitchError>,
    {
        match self.read(key) {
            Ok(Some(bytes)) => match postcard::from_bytes(&bytes) {
                Ok(value) => return Ok(value),
                Err(e) => tracing::warn!(key, error = %e, "cache entry undecodable"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(key, error = %e, "cache read failed"),
        }

        let value = supplier()?;
        match postcard::to_allocvec(&value) {
            Ok(bytes) => {
                if let Err(e) = self.write(key, &bytes) {
                    tracing::warn!(key, error = %e, "cache write failed");
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "cache entry unencodable"),
        }
        Ok(value)
    }

    fn remove(&mut self, key: &str) {
        if let Err(e) = self.delete(key) {
            tracing::warn!(key, error = %e, "cache delete failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn exercise<C: Cache<Vec<u64>>>(cache: &mut C) {
        let calls = Cell::new(0);
        let supplier = || -> Result<Vec<u64>, StitchError> {
            calls.set(calls.get() + 1);
            Ok(vec![1, 2, 3])
        };
        assert_eq!(cache.get_or_compute("k", supplier).unwrap(), vec![1, 2, 3]);
        assert_eq!(cache.get_or_compute("k", supplier).unwrap(), vec![1, 2, 3]);
        assert_eq!(calls.get(), 1);

        cache.remove("k");
        cache.get_or_compute("k", supplier).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn memory_cache_memoizes() {
        let mut cache = MemoryCache::new();
        exercise(&mut cache);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn redb_cache_memoizes() {
        exercise(&mut RedbCache::in_memory().unwrap());
    }

    #[test]
    fn redb_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.redb");
        {
            let mut cache = RedbCache::open(&path).unwrap();
            let v: String = cache.get_or_compute("k", || Ok("v".to_string())).unwrap();
            assert_eq!(v, "v");
        }
        let mut cache = RedbCache::open(&path).unwrap();
        let v: String = cache
            .get_or_compute("k", || panic!("should be cached"))
            .unwrap();
        assert_eq!(v, "v");
    }

    #[test]
    fn supplier_errors_propagate() {
        let mut cache: MemoryCache<u8> = MemoryCache::new();
        let err = cache.get_or_compute("k", || Err(StitchError::EmptyValue));
        assert!(matches!(err, Err(StitchError::EmptyValue)));
        assert!(cache.is_empty());
    }
}
