//! Persistent key/value storage behind the file and result cache tiers.
//!
//! Values are opaque byte blobs; the tiers above decide what goes in them.
//! [`SqliteStore`] is the on-disk store shared across processes and
//! [`MemoryStore`] backs tests and cache-disabled runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use cartograph_core::CartographError;
use rusqlite::{params, Connection, OptionalExtension};

/// Cache tier a stored value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Per-file extraction results.
    File,
    /// Fully rendered maps.
    Result,
}

impl Tier {
    fn table(self) -> &'static str {
        match self {
            Tier::File => "file_cache",
            Tier::Result => "result_cache",
        }
    }
}

/// Byte-blob storage keyed by tier and string key.
///
/// Implementations must be safe to share between worker threads.
pub trait CacheStore: Send + Sync {
    /// Fetch a value, or `None` when absent.
    fn get(&self, tier: Tier, key: &str) -> Result<Option<Vec<u8>>, CartographError>;

    /// Insert or replace a value.
    fn put(&self, tier: Tier, key: &str, value: &[u8]) -> Result<(), CartographError>;

    /// Keys in `tier` starting with `prefix`.
    fn keys_with_prefix(&self, tier: Tier, prefix: &str) -> Result<Vec<String>, CartographError>;

    /// Delete `keys` from `tier`, returning how many were present.
    fn remove(&self, tier: Tier, keys: &[String]) -> Result<usize, CartographError>;

    /// Drop every entry in every tier.
    fn clear(&self) -> Result<(), CartographError>;

    /// Number of entries held in `tier`.
    fn len(&self, tier: Tier) -> Result<usize, CartographError>;
}

/// SQLite-backed cache store.
///
/// # Examples
///
/// ```
/// use cartograph_repomap::store::{CacheStore, SqliteStore, Tier};
///
/// let store = SqliteStore::in_memory().unwrap();
/// store.put(Tier::File, "src/lib.rs", b"{}").unwrap();
/// assert_eq!(store.get(Tier::File, "src/lib.rs").unwrap(), Some(b"{}".to_vec()));
/// assert_eq!(store.get(Tier::Result, "src/lib.rs").unwrap(), None);
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a cache database at the given path.
    ///
    /// Creates the parent directory and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Database`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use cartograph_repomap::store::SqliteStore;
    ///
    /// let store = SqliteStore::open(Path::new(".cartograph/cache.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self, CartographError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CartographError::Database(format!("failed to create cache directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CartographError::Database(format!("failed to open database: {e}")))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| CartographError::Database(format!("failed to set busy timeout: {e}")))?;
        // WAL lets readers proceed while another process writes; not all
        // filesystems support it, so a refusal is not fatal.
        let _ = conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()));

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Database`] if the in-memory database cannot
    /// be created.
    pub fn in_memory() -> Result<Self, CartographError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            CartographError::Database(format!("failed to open in-memory database: {e}"))
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CartographError> {
        self.lock()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS file_cache (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS result_cache (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at TEXT NOT NULL
                );
                ",
            )
            .map_err(|e| CartographError::Database(format!("failed to create schema: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CartographError> {
        self.conn
            .lock()
            .map_err(|_| CartographError::Database("cache connection lock poisoned".into()))
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, tier: Tier, key: &str) -> Result<Option<Vec<u8>>, CartographError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT value FROM {} WHERE key = ?1", tier.table()),
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| CartographError::Database(format!("failed to read cache entry: {e}")))
    }

    fn put(&self, tier: Tier, key: &str, value: &[u8]) -> Result<(), CartographError> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, value, updated_at) VALUES (?1, ?2, ?3)",
                tier.table()
            ),
            params![key, value, now],
        )
        .map_err(|e| CartographError::Database(format!("failed to write cache entry: {e}")))?;
        Ok(())
    }

    fn keys_with_prefix(&self, tier: Tier, prefix: &str) -> Result<Vec<String>, CartographError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT key FROM {} WHERE instr(key, ?1) = 1 ORDER BY key",
                tier.table()
            ))
            .map_err(|e| CartographError::Database(format!("failed to list cache keys: {e}")))?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| CartographError::Database(format!("failed to list cache keys: {e}")))?;
        Ok(keys)
    }

    fn remove(&self, tier: Tier, keys: &[String]) -> Result<usize, CartographError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let db_err = |e: rusqlite::Error| {
            CartographError::Database(format!("failed to remove cache entries: {e}"))
        };
        let tx = conn.transaction().map_err(db_err)?;
        let mut removed = 0;
        {
            let mut stmt = tx
                .prepare(&format!("DELETE FROM {} WHERE key = ?1", tier.table()))
                .map_err(db_err)?;
            for key in keys {
                removed += stmt.execute(params![key]).map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        Ok(removed)
    }

    fn clear(&self) -> Result<(), CartographError> {
        self.lock()?
            .execute_batch("DELETE FROM file_cache; DELETE FROM result_cache;")
            .map_err(|e| CartographError::Database(format!("failed to clear cache: {e}")))
    }

    fn len(&self, tier: Tier) -> Result<usize, CartographError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", tier.table()),
                [],
                |row| row.get(0),
            )
            .map_err(|e| CartographError::Database(format!("failed to count entries: {e}")))?;
        Ok(count as usize)
    }
}

/// Process-local store that forgets everything on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(Tier, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<(Tier, String), Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, tier: Tier, key: &str) -> Result<Option<Vec<u8>>, CartographError> {
        Ok(self.entries().get(&(tier, key.to_string())).cloned())
    }

    fn put(&self, tier: Tier, key: &str, value: &[u8]) -> Result<(), CartographError> {
        self.entries()
            .insert((tier, key.to_string()), value.to_vec());
        Ok(())
    }

    fn keys_with_prefix(&self, tier: Tier, prefix: &str) -> Result<Vec<String>, CartographError> {
        let mut keys: Vec<String> = self
            .entries()
            .keys()
            .filter(|(t, k)| *t == tier && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn remove(&self, tier: Tier, keys: &[String]) -> Result<usize, CartographError> {
        let mut entries = self.entries();
        Ok(keys
            .iter()
            .filter(|k| entries.remove(&(tier, (*k).clone())).is_some())
            .count())
    }

    fn clear(&self) -> Result<(), CartographError> {
        self.entries().clear();
        Ok(())
    }

    fn len(&self, tier: Tier) -> Result<usize, CartographError> {
        Ok(self.entries().keys().filter(|(t, _)| *t == tier).count())
    }
}
