// Copyright (c) 2018-2022 The Botho Foundation

use crate::{KeyValueStore, StoreError, WriteBatch, WriteOp};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory ordered store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        for op in batch.ops() {
            match op {
                WriteOp::Put(key, value) => {
                    entries.insert(key.clone(), value.clone());
                }
                WriteOp::Delete(key) => {
                    entries.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::exercise_store;

    #[test]
    fn test_memory_store_contract() {
        let store = MemoryStore::new();
        exercise_store(&store);
        assert_eq!(store.len(), 3);
    }
}
