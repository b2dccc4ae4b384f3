use crate::error::{Result, StoreError};
use crate::model::{Button, ButtonDB, Host};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const LOCK_SHARDS: usize = 64;

/// The two record spaces of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Buttons,
    Hosts,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Buttons => "buttons",
            Table::Hosts => "hosts",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            Table::Buttons => "hash",
            Table::Hosts => "host",
        }
    }
}

/// A value that lives in one of the store's tables as a JSON document.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: Table;
}

impl Record for Button {
    const TABLE: Table = Table::Buttons;
}

impl Record for Host {
    const TABLE: Table = Table::Hosts;
}

/// Sharded mutual exclusion keyed by (table, key).
struct KeyLocks {
    shards: Vec<Mutex<()>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            shards: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    fn lock(&self, table: Table, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        table.hash(&mut hasher);
        key.hash(&mut hasher);
        let shard = (hasher.finish() as usize) % self.shards.len();
        // the guarded value is (), so a poisoned shard is still usable
        self.shards[shard]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Durable key/value store for buttons (by content hash) and hosts (by hostname).
///
/// All mutation goes through [`Store::update`], which runs the
/// read-merge-write cycle as a critical section per key.
pub struct Store {
    conn: Mutex<Connection>,
    locks: KeyLocks,
}

impl Store {
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // Every committed update must survive a crash of the process
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Self::with_connection(conn)
    }

    /// Opens an existing database for snapshot reads only.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Store {
            conn: Mutex::new(conn),
            locks: KeyLocks::new(),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Store {
            conn: Mutex::new(conn),
            locks: KeyLocks::new(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS buttons (
                hash TEXT PRIMARY KEY,
                value TEXT NOT NULL   -- JSON Button record
            );

            CREATE TABLE IF NOT EXISTS hosts (
                host TEXT PRIMARY KEY,
                value TEXT NOT NULL   -- JSON Host record
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned("store connection"))
    }

    pub fn get<T: Record>(&self, key: &str) -> Result<Option<T>> {
        let table = T::TABLE;
        let sql = format!(
            "SELECT value FROM {} WHERE {} = ?1",
            table.as_str(),
            table.key_column()
        );
        let raw: Option<String> = self
            .conn()?
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Atomically applies `merge` to the record stored under `key`.
    ///
    /// `merge` receives the current record (or `None`) and returns the new
    /// record, or `None` to leave storage untouched. If `merge` fails or the
    /// write fails, nothing is written and the error is returned.
    /// Returns the record as stored after the call.
    pub fn update<T, F>(&self, key: &str, merge: F) -> Result<Option<T>>
    where
        T: Record + Clone,
        F: FnOnce(Option<T>) -> Result<Option<T>>,
    {
        let _guard = self.locks.lock(T::TABLE, key);

        let current = self.get::<T>(key)?;
        let fallback = current.clone();
        let Some(updated) = merge(current)? else {
            return Ok(fallback);
        };

        let table = T::TABLE;
        let sql = format!(
            "INSERT INTO {table} ({key_col}, value) VALUES (?1, ?2)
             ON CONFLICT({key_col}) DO UPDATE SET value = excluded.value",
            table = table.as_str(),
            key_col = table.key_column()
        );
        let value = serde_json::to_string(&updated)?;
        self.conn()?.execute(&sql, params![key, value])?;
        debug!("Stored {} record {}", table.as_str(), key);

        Ok(Some(updated))
    }

    /// Full copy of both tables.
    pub fn all(&self) -> Result<ButtonDB> {
        let conn = self.conn()?;
        let mut db = ButtonDB::default();

        let mut stmt = conn.prepare("SELECT hash, value FROM buttons")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (hash, value) in rows {
            db.buttons.insert(hash, serde_json::from_str(&value)?);
        }

        let mut stmt = conn.prepare("SELECT host, value FROM hosts")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (host, value) in rows {
            db.hosts.insert(host, serde_json::from_str(&value)?);
        }

        Ok(db)
    }

    pub fn count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
        Ok(self.conn()?.query_row(&sql, [], |row| row.get(0))?)
    }
}
