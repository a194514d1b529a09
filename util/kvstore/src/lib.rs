// Copyright (c) 2018-2022 The Botho Foundation

#![deny(unsafe_code)]

//! Ordered byte-string key/value storage.
//!
//! The wallet only needs point lookups, prefix scans and small write
//! batches applied in a single transaction. [`LmdbStore`] persists to a
//! single LMDB file; [`MemoryStore`] backs tests and transient wallets.

mod lmdb_store;
mod memory;

pub use lmdb_store::{LmdbStore, LmdbStoreSettings};
pub use memory::MemoryStore;

use displaydoc::Display;

/// Errors raised by a key/value backend
#[derive(Debug, Display)]
pub enum StoreError {
    /// LMDB: {0}
    Lmdb(lmdb::Error),
    /// I/O: {0}
    Io(std::io::Error),
}

impl std::error::Error for StoreError {}

impl From<lmdb::Error> for StoreError {
    fn from(src: lmdb::Error) -> Self {
        Self::Lmdb(src)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(src: std::io::Error) -> Self {
        Self::Io(src)
    }
}

/// One mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WriteOp {
    /// Insert or overwrite a key.
    Put(Vec<u8>, Vec<u8>),
    /// Remove a key if present.
    Delete(Vec<u8>),
}

/// Mutations committed together by [`KeyValueStore::write`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Put(key.into(), value.into()));
        self
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Delete(key.into()));
        self
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued operations in insertion order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// Ordered byte-string store with single-writer transactions.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Apply every operation of `batch` atomically.
    fn write(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    /// Convenience wrapper for a single put.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(&batch)
    }
}
