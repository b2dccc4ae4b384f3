use crate::error::{Result, StoreError};
use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// A previously received response, replayed when the origin answers 304.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub etag: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

enum Backing {
    Memory(DashMap<String, CachedResponse>),
    Sqlite(Mutex<Connection>),
}

/// Response cache keyed by exact request URL.
pub struct HttpCache {
    backing: Backing,
}

impl HttpCache {
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(DashMap::new()),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS http_cache (
                url TEXT PRIMARY KEY,
                etag TEXT,
                headers TEXT NOT NULL,  -- JSON array of [name, value]
                body BLOB NOT NULL
            );
            ",
        )?;
        Ok(Self {
            backing: Backing::Sqlite(Mutex::new(conn)),
        })
    }

    pub fn get(&self, url: &str) -> Result<Option<CachedResponse>> {
        match &self.backing {
            Backing::Memory(map) => Ok(map.get(url).map(|e| e.value().clone())),
            Backing::Sqlite(conn) => {
                let conn = conn.lock().map_err(|_| StoreError::Poisoned("http cache"))?;
                let row: Option<(Option<String>, String, Vec<u8>)> = conn
                    .query_row(
                        "SELECT etag, headers, body FROM http_cache WHERE url = ?1",
                        params![url],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                match row {
                    Some((etag, headers, body)) => Ok(Some(CachedResponse {
                        etag,
                        headers: serde_json::from_str(&headers)?,
                        body,
                    })),
                    None => Ok(None),
                }
            }
        }
    }

    /// Overwrites whatever was cached for `url`.
    pub fn put(&self, url: &str, response: CachedResponse) -> Result<()> {
        match &self.backing {
            Backing::Memory(map) => {
                map.insert(url.to_string(), response);
            }
            Backing::Sqlite(conn) => {
                let headers = serde_json::to_string(&response.headers)?;
                let conn = conn.lock().map_err(|_| StoreError::Poisoned("http cache"))?;
                conn.execute(
                    "INSERT INTO http_cache (url, etag, headers, body) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(url) DO UPDATE SET etag = excluded.etag,
                        headers = excluded.headers, body = excluded.body",
                    params![url, response.etag, headers, response.body],
                )?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        match &self.backing {
            Backing::Memory(map) => Ok(map.len()),
            Backing::Sqlite(conn) => {
                let conn = conn.lock().map_err(|_| StoreError::Poisoned("http cache"))?;
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM http_cache", [], |row| row.get(0))?;
                Ok(n as usize)
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(etag: &str, body: &[u8]) -> CachedResponse {
        CachedResponse {
            etag: Some(etag.to_string()),
            headers: vec![("Content-Type".into(), "image/gif".into())],
            body: body.to_vec(),
        }
    }

    #[test]
    fn test_sqlite_cache_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("http-cache.db");
        {
            let cache = HttpCache::open(&path).unwrap();
            cache.put("https://a.example/b.gif", sample("\"v1\"", b"one")).unwrap();
            cache.put("https://a.example/b.gif", sample("\"v2\"", b"two")).unwrap();
        }

        let cache = HttpCache::open(&path).unwrap();
        let hit = cache.get("https://a.example/b.gif").unwrap().unwrap();
        assert_eq!(hit.etag.as_deref(), Some("\"v2\""));
        assert_eq!(hit.body, b"two");
        assert_eq!(hit.header("content-type"), Some("image/gif"));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_keys_are_exact_urls() {
        let cache = HttpCache::in_memory();
        cache.put("https://a.example/b.gif?x=1", sample("e", b"q")).unwrap();
        assert!(cache.get("https://a.example/b.gif").unwrap().is_none());
    }
}
