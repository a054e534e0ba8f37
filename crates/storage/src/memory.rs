use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch, WriteOp};

type Key = (Column, Vec<u8>);

/// Ordered in-memory backend. Batches apply atomically under one write lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Key, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Key, Vec<u8>>>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Key, Vec<u8>>>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }

    /// Number of keys stored in `column`.
    pub fn count(&self, column: Column) -> Result<usize, StoreError> {
        Ok(self.read()?.keys().filter(|(col, _)| *col == column).count())
    }

    /// Every entry, ordered by column then key.
    pub fn snapshot(&self) -> Result<Vec<(Column, Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .read()?
            .iter()
            .map(|((column, key), value)| (*column, key.clone(), value.clone()))
            .collect())
    }

    fn visit_prefix(
        map: &BTreeMap<Key, Vec<u8>>,
        column: Column,
        prefix: &[u8],
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let start = Bound::Included((column, prefix.to_vec()));
        for ((entry_column, key), value) in map.range((start, Bound::Unbounded)) {
            if *entry_column != column || !key.starts_with(prefix) {
                break;
            }
            visit(key, value)?;
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()?.get(&(column, key.to_vec())).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.write()?.insert((column, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.write()?.remove(&(column, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self.read()?;
        let mut results = Vec::new();
        Self::visit_prefix(&guard, column, prefix, |key, value| {
            results.push((key.to_vec(), value.to_vec()));
            Ok(())
        })?;
        Ok(results)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        let guard = self.read()?;
        Self::visit_prefix(&guard, column, prefix, |key, value| visitor(key, value))
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard.insert((*column, key.as_slice().to_vec()), value.as_slice().to_vec());
                }
                WriteOp::Delete { column, key } => {
                    guard.remove(&(*column, key.as_slice().to_vec()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_stays_inside_column() {
        let store = MemoryStore::new();
        store.put(Column::Utxo, b"ab1", b"x").expect("put");
        store.put(Column::Utxo, b"ab2", b"y").expect("put");
        store.put(Column::Utxo, b"ac1", b"z").expect("put");
        store.put(Column::Meta, b"ab3", b"w").expect("put");

        let hits = store.scan_prefix(Column::Utxo, b"ab").expect("scan");
        assert_eq!(
            hits,
            vec![(b"ab1".to_vec(), b"x".to_vec()), (b"ab2".to_vec(), b"y".to_vec())]
        );
        assert_eq!(store.count(Column::Utxo).expect("count"), 3);
    }

    #[test]
    fn batch_applies_puts_and_deletes_in_order() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"gone", b"1").expect("put");
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"kept", b"2");
        batch.delete(Column::Meta, b"gone");
        batch.put(Column::Meta, b"kept", b"3");
        store.write_batch(&batch).expect("batch");

        assert_eq!(store.get(Column::Meta, b"gone").expect("get"), None);
        assert_eq!(
            store.get(Column::Meta, b"kept").expect("get"),
            Some(b"3".to_vec())
        );
    }
}
