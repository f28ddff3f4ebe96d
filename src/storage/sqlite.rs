//! SQLite-backed key-value tables
//!
//! One database file holds every table as `kv_<name>(key TEXT PRIMARY KEY,
//! value BLOB)`. SQLite's B-tree gives ordered iteration for free and WAL mode
//! makes single puts crash-safe.
//!
//! # Performance
//! - Point get/put: O(log n)
//! - Bulk put: one transaction per call

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::kv::{validate_table_name, KvStore, KvTable};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// File name of the database inside the data directory
pub const DATABASE_FILE: &str = "daybook.db";

type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StorageError::Lock(format!("Failed to acquire database lock: {}", e)))
}

/// SQLite-backed store (std::sync::Mutex because Connection is !Sync)
pub struct SqliteStore {
    conn: SharedConnection,
    path: PathBuf,
}

impl SqliteStore {
    /// Create or open the store inside `data_dir`
    pub fn open(data_dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(DATABASE_FILE);

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Configure for durability at single-put granularity
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        tracing::debug!("Opened SQLite store at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Force checkpoint for WAL mode
    pub fn checkpoint(&self) -> StorageResult<()> {
        lock(&self.conn)?.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Compact the database file (VACUUM)
    pub fn optimize(&self) -> StorageResult<()> {
        lock(&self.conn)?.execute("VACUUM", [])?;
        Ok(())
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for SqliteStore {
    fn open_table(&self, name: &str) -> StorageResult<Arc<dyn KvTable>> {
        validate_table_name(name)?;
        let table = format!("kv_{}", name);

        lock(&self.conn)?.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    key TEXT PRIMARY KEY NOT NULL,
                    value BLOB NOT NULL
                )",
                table
            ),
            [],
        )?;

        Ok(Arc::new(SqliteTable {
            conn: Arc::clone(&self.conn),
            table,
        }))
    }
}

/// One `kv_<name>` table
pub struct SqliteTable {
    conn: SharedConnection,
    table: String,
}

impl KvTable for SqliteTable {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let conn = lock(&self.conn)?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT value FROM {} WHERE key = ?", self.table))?;
        let value = stmt
            .query_row(params![key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES (?, ?)",
            self.table
        ))?;
        stmt.execute(params![key, value])?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare_cached(&format!("DELETE FROM {} WHERE key = ?", self.table))?;
        Ok(stmt.execute(params![key])? > 0)
    }

    fn put_all(&self, entries: Vec<(String, Vec<u8>)>) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT OR REPLACE INTO {} (key, value) VALUES (?, ?)",
                self.table
            ))?;
            for (key, value) in entries {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn values(&self) -> StorageResult<Vec<Vec<u8>>> {
        let conn = lock(&self.conn)?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT value FROM {} ORDER BY key", self.table))?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    fn entries(&self) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT key, value FROM {} ORDER BY key",
            self.table
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    fn range(&self, start: &str, end: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT key, value FROM {} WHERE key >= ? AND key <= ? ORDER BY key",
            self.table
        ))?;
        let rows = stmt.query_map(params![start, end], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    fn clear(&self) -> StorageResult<()> {
        lock(&self.conn)?.execute(&format!("DELETE FROM {}", self.table), [])?;
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        let count: i64 = lock(&self.conn)?.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
