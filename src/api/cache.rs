//! Content-addressed response cache
//!
//! Raw API payloads are stored under a deterministic key derived from the
//! request (see `TableRequest::cache_key`). Entries are immutable: the
//! first write wins and repeat writes of the same key are no-ops, which
//! makes concurrent worker writes safe without locking beyond the
//! connection mutex. There is no implicit expiry; staleness is handled by
//! the caller via explicit invalidation or the bypass flag.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;

/// Cached raw payload with its fetch timestamp.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: String,
    pub fetched_at: i64,
}

/// Backend interface for the response cache.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store a fully received payload. Idempotent: same key, same payload.
    async fn put(&self, key: &str, payload: &str) -> Result<()>;

    /// Explicit invalidation is the only eviction path.
    async fn invalidate(&self, key: &str) -> Result<()>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}

/// SQLite-backed persistent cache.
pub struct SqliteResponseCache {
    conn: Mutex<Connection>,
}

impl SqliteResponseCache {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cached_responses (
                request_key TEXT PRIMARY KEY,
                payload     TEXT NOT NULL,
                fetched_at  INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl ResponseCache for SqliteResponseCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT payload, fetched_at FROM cached_responses WHERE request_key = ?1",
                params![key],
                |row| {
                    Ok(CacheEntry {
                        payload: row.get(0)?,
                        fetched_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    async fn put(&self, key: &str, payload: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cached_responses (request_key, payload, fetched_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(request_key) DO NOTHING",
            params![key, payload, now],
        )?;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM cached_responses WHERE request_key = ?1",
            params![key],
        )?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "sqlite"
    }
}

/// In-memory cache for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, payload: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(key.to_string()).or_insert_with(|| CacheEntry {
            payload: payload.to_string(),
            fetched_at: chrono::Utc::now().timestamp(),
        });
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
