//! Typed tables over the raw key-value substrate
//!
//! Values are encoded at the storage boundary only; everything above this
//! module works with concrete structs.

use crate::storage::error::StorageResult;
use crate::storage::kv::KvTable;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// How values are encoded in a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Compact binary (records, indexes, summaries)
    Bincode,
    /// Human-readable JSON (metadata)
    Json,
}

impl Codec {
    fn encode<V: Serialize>(self, value: &V) -> StorageResult<Vec<u8>> {
        Ok(match self {
            Codec::Bincode => bincode::serialize(value)?,
            Codec::Json => serde_json::to_vec(value)?,
        })
    }

    fn decode<V: DeserializeOwned>(self, bytes: &[u8]) -> StorageResult<V> {
        Ok(match self {
            Codec::Bincode => bincode::deserialize(bytes)?,
            Codec::Json => serde_json::from_slice(bytes)?,
        })
    }
}

/// A `KvTable` holding values of type `V`
pub struct Table<V> {
    raw: Arc<dyn KvTable>,
    codec: Codec,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for Table<V> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            codec: self.codec,
            _value: PhantomData,
        }
    }
}

impl<V: Serialize + DeserializeOwned> Table<V> {
    pub fn new(raw: Arc<dyn KvTable>, codec: Codec) -> Self {
        Self {
            raw,
            codec,
            _value: PhantomData,
        }
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<V>> {
        self.raw
            .get(key)?
            .map(|bytes| self.codec.decode(&bytes))
            .transpose()
    }

    pub fn put(&self, key: &str, value: &V) -> StorageResult<()> {
        self.raw.put(key, self.codec.encode(value)?)
    }

    pub fn delete(&self, key: &str) -> StorageResult<bool> {
        self.raw.delete(key)
    }

    pub fn put_all<'a, I>(&self, entries: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = (String, &'a V)>,
        V: 'a,
    {
        let encoded = entries
            .into_iter()
            .map(|(key, value)| Ok((key, self.codec.encode(value)?)))
            .collect::<StorageResult<Vec<_>>>()?;
        self.raw.put_all(encoded)
    }

    /// Snapshot of all values, decoded
    pub fn values(&self) -> StorageResult<Vec<V>> {
        self.raw
            .values()?
            .iter()
            .map(|bytes| self.codec.decode(bytes))
            .collect()
    }

    /// Snapshot of all entries, decoded, ordered by key
    pub fn entries(&self) -> StorageResult<Vec<(String, V)>> {
        self.raw
            .entries()?
            .into_iter()
            .map(|(key, bytes)| Ok((key, self.codec.decode(&bytes)?)))
            .collect()
    }

    /// Entries with keys in `[start, end]`, decoded, ordered by key
    pub fn range(&self, start: &str, end: &str) -> StorageResult<Vec<(String, V)>> {
        self.raw
            .range(start, end)?
            .into_iter()
            .map(|(key, bytes)| Ok((key, self.codec.decode(&bytes)?)))
            .collect()
    }

    /// Raw bytes snapshot, decoded lazily by scanners
    pub fn raw_values(&self) -> StorageResult<Vec<Vec<u8>>> {
        self.raw.values()
    }

    pub fn decode(&self, bytes: &[u8]) -> StorageResult<V> {
        self.codec.decode(bytes)
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.raw.clear()
    }

    pub fn len(&self) -> StorageResult<usize> {
        self.raw.len()
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        self.raw.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::{KvStore, MemoryStore};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        count: u32,
    }

    #[test]
    fn test_typed_table() {
        let store = MemoryStore::new();
        for codec in [Codec::Bincode, Codec::Json] {
            let table: Table<Row> = Table::new(store.open_table("rows").unwrap(), codec);
            table.clear().unwrap();

            let row = Row {
                name: "a".into(),
                count: 3,
            };
            table.put("a", &row).unwrap();
            assert_eq!(table.get("a").unwrap(), Some(row));
            assert_eq!(table.get("missing").unwrap(), None);
        }
    }

    #[test]
    fn test_json_is_readable() {
        let store = MemoryStore::new();
        let raw = store.open_table("meta").unwrap();
        let table: Table<Row> = Table::new(Arc::clone(&raw), Codec::Json);
        table
            .put(
                "m",
                &Row {
                    name: "meta".into(),
                    count: 1,
                },
            )
            .unwrap();

        let bytes = raw.get("m").unwrap().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"name":"meta","count":1}"#
        );
    }

    #[test]
    fn test_corrupt_value_is_an_error() {
        let store = MemoryStore::new();
        let raw = store.open_table("rows").unwrap();
        raw.put("bad", vec![0xff]).unwrap();

        let table: Table<Row> = Table::new(raw, Codec::Bincode);
        assert!(table.get("bad").is_err());
    }
}
