//! RocksDB-backed key-value engine.
//!
//! Implements [`KvStore`] over a single RocksDB database. Batches translate
//! one-to-one into RocksDB [`WriteBatch`](rocksdb::WriteBatch) commits, which
//! gives the all-or-nothing durability the persistence pipeline relies on.

use std::path::Path;

use rocksdb::{Direction, IteratorMode, Options, DB};

use quill_core::error::StoreError;
use quill_core::traits::{BatchOp, KvStore, WriteBatch};

/// RocksDB engine behind the ledger store.
pub struct RocksEngine {
    db: DB,
}

impl RocksEngine {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path.as_ref()).map_err(|e| StoreError::Engine(e.to_string()))?;
        Ok(Self { db })
    }

    /// Flush in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(|e| StoreError::Engine(e.to_string()))
    }
}

impl KvStore for RocksEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db.get(key).map_err(|e| StoreError::Engine(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key, value)
            .map_err(|e| StoreError::Engine(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db
            .delete(key)
            .map_err(|e| StoreError::Engine(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut inner = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => inner.put(key, value),
                BatchOp::Delete { key } => inner.delete(key),
            }
        }

        self.db
            .write(inner)
            .map_err(|e| StoreError::Engine(e.to_string()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix, Direction::Forward)
        };

        let mut hits = Vec::new();
        for item in self.db.iterator(mode) {
            let (key, value) = item.map_err(|e| StoreError::Engine(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            hits.push((key.to_vec(), value.to_vec()));
        }

        Ok(hits)
    }

    fn compact(&self) -> Result<(), StoreError> {
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
        Ok(())
    }
}
