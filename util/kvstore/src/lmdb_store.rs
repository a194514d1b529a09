// Copyright (c) 2018-2022 The Botho Foundation

//! LMDB-backed store, one environment file per wallet.

use crate::{KeyValueStore, StoreError, WriteBatch, WriteOp};
use lmdb::{Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, Transaction, WriteFlags};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

const WALLET_DB_NAME: &str = "wallet";

/// Tunables for the LMDB environment.
#[derive(Clone, Debug)]
pub struct LmdbStoreSettings {
    /// Maximum size the memory map may grow to.
    pub map_size: usize,
    /// Maximum number of named databases.
    pub max_dbs: u32,
}

impl Default for LmdbStoreSettings {
    fn default() -> Self {
        Self {
            map_size: 64 * 1024 * 1024, // 64MB
            max_dbs: 4,
        }
    }
}

/// Wallet storage in a single LMDB file.
pub struct LmdbStore {
    env: Environment,
    db: Database,
    path: PathBuf,
}

impl LmdbStore {
    /// Open (or create) the environment stored at `path`.
    pub fn open(path: &Path, settings: &LmdbStoreSettings) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_SUB_DIR)
            .set_max_dbs(settings.max_dbs)
            .set_map_size(settings.map_size)
            .open(path)?;
        let db = env.create_db(Some(WALLET_DB_NAME), DatabaseFlags::empty())?;

        debug!(path = %path.display(), "Opened wallet store");
        Ok(Self {
            env,
            db,
            path: path.to_path_buf(),
        })
    }

    /// File backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for LmdbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db, &key) {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        let iter = if prefix.is_empty() {
            cursor.iter_start()
        } else {
            cursor.iter_from(prefix)
        };

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn write(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut txn = self.env.begin_rw_txn()?;
        for op in batch.ops() {
            match op {
                WriteOp::Put(key, value) => txn.put(self.db, key, value, WriteFlags::empty())?,
                WriteOp::Delete(key) => match txn.del(self.db, key, None) {
                    Ok(()) | Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        txn.commit()?;
        Ok(())
    }
}
