//! Key-value substrate
//!
//! The engine only needs a handful of operations from its backing store:
//! named tables of `String → bytes` with point reads/writes, bulk writes,
//! snapshot iteration and clearing. Durability is the store's concern.
//!
//! - **KvStore**: opens (or creates) named tables
//! - **KvTable**: one table
//! - **MemoryStore**: in-process implementation for tests and batch tools

use crate::storage::error::{StorageError, StorageResult};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, RwLock};

/// A named `String → bytes` table
///
/// Iteration (`values`, `entries`) returns a snapshot; callers never observe
/// a half-applied `put_all` or `clear`.
pub trait KvTable: Send + Sync {
    /// Read one value
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Insert or replace one value
    fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Remove one value, returning whether it existed
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Insert or replace many values as one unit
    fn put_all(&self, entries: Vec<(String, Vec<u8>)>) -> StorageResult<()>;

    /// Snapshot of all values
    fn values(&self) -> StorageResult<Vec<Vec<u8>>>;

    /// Snapshot of all entries, ordered by key
    fn entries(&self) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Entries with `start <= key <= end`, ordered by key
    fn range(&self, start: &str, end: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Remove every entry
    fn clear(&self) -> StorageResult<()>;

    /// Number of entries
    fn len(&self) -> StorageResult<usize>;

    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Opens named tables
pub trait KvStore: Send + Sync {
    /// Get or create a table
    fn open_table(&self, name: &str) -> StorageResult<Arc<dyn KvTable>>;
}

/// Table names are embedded in SQL, so keep them to `[A-Za-z0-9_]`
pub(crate) fn validate_table_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StorageError::Config(format!("invalid table name {:?}", name)));
    }
    Ok(())
}

/// In-memory table backed by a `BTreeMap`
#[derive(Debug, Default)]
pub struct MemoryTable {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryTable {
    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .read()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire table lock: {}", e)))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .write()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire table lock: {}", e)))
    }
}

impl KvTable for MemoryTable {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.read()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.write()?.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.write()?.remove(key).is_some())
    }

    fn put_all(&self, entries: Vec<(String, Vec<u8>)>) -> StorageResult<()> {
        self.write()?.extend(entries);
        Ok(())
    }

    fn values(&self) -> StorageResult<Vec<Vec<u8>>> {
        Ok(self.read()?.values().cloned().collect())
    }

    fn entries(&self) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .read()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn range(&self, start: &str, end: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .read()?
            .range::<str, _>((Bound::Included(start), Bound::Included(end)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear(&self) -> StorageResult<()> {
        self.write()?.clear();
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.read()?.len())
    }
}

/// In-memory store; tables live as long as the store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<String, Arc<MemoryTable>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn open_table(&self, name: &str) -> StorageResult<Arc<dyn KvTable>> {
        validate_table_name(name)?;
        let mut tables = self
            .tables
            .lock()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire store lock: {}", e)))?;
        let table = tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryTable::default()))
            .clone();
        Ok(table)
    }
}
