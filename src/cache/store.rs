//! Cache Store Module
//!
//! Main cache engine: a single SQLite table holding string keys and values,
//! with upsert writes and retention-based expiry.

use std::fmt;
use std::time::Duration;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::cache::entry::now_secs;
use crate::cache::{CacheEntry, CacheSnapshot, CacheStats, MAX_KEY_LENGTH, MAX_VALUE_SIZE};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Current schema version, recorded via PRAGMA user_version.
const SCHEMA_VERSION: i64 = 1;

// == Kv Cache ==
/// SQLite-backed key/value cache with upsert semantics.
///
/// The backing store is an in-memory database owned exclusively by this
/// instance; it is created on construction and dropped with the cache.
pub struct KvCache {
    /// Exclusively owned connection to the in-memory store
    conn: Connection,
    /// Performance statistics
    stats: CacheStats,
    /// Cache behavior configuration
    config: CacheConfig,
}

impl KvCache {
    // == Constructors ==
    /// Creates a new cache with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(CacheConfig::default())
    }

    /// Creates a new cache with the given configuration.
    ///
    /// Opens a fresh in-memory store and establishes the schema.
    pub fn with_config(config: CacheConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CacheError::Storage(format!("cannot open in-memory store: {e}")))?;

        let cache = Self {
            conn,
            stats: CacheStats::new(),
            config,
        };
        cache.init_schema()?;

        Ok(cache)
    }

    /// Establishes the backing table and schema version.
    ///
    /// Safe to run against an already-initialized store.
    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS cache_ss_kv (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    expire_on REAL
                );
                PRAGMA user_version = {SCHEMA_VERSION};"
            ))
            .map_err(|e| CacheError::Storage(format!("init schema: {e}")))
    }

    // == Set ==
    /// Stores a key-value pair with optional retention.
    ///
    /// If the key already exists, the value is overwritten and the expiry
    /// deadline is reset. The write is a single upsert statement, so a
    /// half-updated row is never observable. When `retention` is `None`,
    /// the configured default retention applies (which may itself be none,
    /// meaning the entry is kept until deleted).
    ///
    /// # Arguments
    /// * `key` - The key to store, non-empty and at most `MAX_KEY_LENGTH` bytes
    /// * `value` - The value to store, at most `MAX_VALUE_SIZE` bytes
    /// * `retention` - Optional retention duration
    pub fn set(&mut self, key: &str, value: &str, retention: Option<Duration>) -> Result<()> {
        // Validate before any store access
        if key.is_empty() {
            return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidRequest(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(CacheError::InvalidRequest(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            )));
        }

        let entry = CacheEntry::new(
            key.to_string(),
            value.to_string(),
            retention.or(self.config.default_retention),
        );

        self.conn
            .execute(
                "INSERT OR REPLACE INTO cache_ss_kv (key, value, expire_on) VALUES (?1, ?2, ?3)",
                params![entry.key, entry.value, entry.expire_on],
            )
            .map_err(map_store_err)?;

        debug!(key, "stored entry");
        Ok(())
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` when the key was never stored or its retention has
    /// elapsed; absence is a normal result, not an error. Expired rows are
    /// deleted in passing and counted as misses.
    ///
    /// # Arguments
    /// * `key` - The key to retrieve
    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        let lookup = self.conn.query_row(
            "SELECT value, expire_on FROM cache_ss_kv WHERE key = ?1",
            params![key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                ))
            },
        );

        match lookup {
            Ok((value, expire_on)) => {
                let entry = CacheEntry {
                    key: key.to_string(),
                    value,
                    expire_on,
                };

                if entry.is_expired() {
                    self.conn
                        .execute("DELETE FROM cache_ss_kv WHERE key = ?1", params![key])
                        .map_err(map_store_err)?;
                    self.stats.record_expirations(1);
                    self.stats.record_miss();
                    debug!(key, "entry expired");
                    Ok(None)
                } else {
                    self.stats.record_hit();
                    debug!(key, "cache hit");
                    Ok(Some(entry.value))
                }
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                self.stats.record_miss();
                debug!(key, "cache miss");
                Ok(None)
            }
            Err(e) => Err(map_store_err(e)),
        }
    }

    // == Delete ==
    /// Removes an entry by key.
    ///
    /// Returns whether a row was actually removed; deleting an absent key
    /// is not an error.
    ///
    /// # Arguments
    /// * `key` - The key to delete
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM cache_ss_kv WHERE key = ?1", params![key])
            .map_err(map_store_err)?;

        if removed > 0 {
            debug!(key, "deleted entry");
        }
        Ok(removed > 0)
    }

    // == Purge Expired ==
    /// Removes all rows whose retention has elapsed.
    ///
    /// Returns the number of rows removed.
    pub fn purge_expired(&mut self) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM cache_ss_kv WHERE expire_on IS NOT NULL AND expire_on <= ?1",
                params![now_secs()],
            )
            .map_err(map_store_err)?;

        self.stats.record_expirations(removed as u64);
        Ok(removed)
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.len()?);
        Ok(stats)
    }

    // == Length ==
    /// Returns the current number of rows in the cache, expired or not.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cache_ss_kv", [], |row| row.get(0))
            .map_err(map_store_err)?;
        Ok(count as usize)
    }

    // == Is Empty ==
    /// Returns true if the cache has no rows.
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    // == Snapshot ==
    /// Returns a timestamped listing of every row, ordered by key.
    pub fn snapshot(&self) -> Result<CacheSnapshot> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, expire_on FROM cache_ss_kv ORDER BY key")
            .map_err(map_store_err)?;

        let entries = stmt
            .query_map([], |row| {
                Ok(CacheEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    expire_on: row.get(2)?,
                })
            })
            .map_err(map_store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_store_err)?;

        Ok(CacheSnapshot::new(entries))
    }
}

// == Debug ==
/// Shows at most ten rows; the store may hold arbitrarily many.
const DEBUG_MAX_ROWS: usize = 10;

impl fmt::Debug for KvCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.snapshot() {
            Ok(snapshot) => {
                let shown: Vec<String> = snapshot
                    .entries
                    .iter()
                    .take(DEBUG_MAX_ROWS)
                    .map(|e| format!("{}={}", e.key, e.value))
                    .collect();
                let remaining = snapshot.entries.len().saturating_sub(DEBUG_MAX_ROWS);

                write!(f, "KvCache {{ {}", shown.join(", "))?;
                if remaining > 0 {
                    write!(f, ", ...[{remaining} remaining]")?;
                }
                write!(f, " }}")
            }
            Err(_) => write!(f, "KvCache {{ <store unavailable> }}"),
        }
    }
}

// == Error Mapping ==
/// Maps rusqlite errors to the cache error taxonomy.
///
/// SQLite cells are dynamically typed, so a cell that decodes to a type
/// other than the schema's TEXT surfaces as a type mismatch; everything
/// else is a backing-store failure.
fn map_store_err(err: rusqlite::Error) -> CacheError {
    match err {
        rusqlite::Error::InvalidColumnType(_, _, actual) => CacheError::TypeMismatch {
            expected: "TEXT",
            actual: actual.to_string(),
        },
        other => CacheError::Storage(other.to_string()),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_store_new() {
        let store = KvCache::new().unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_store_schema_version_recorded() {
        let store = KvCache::new().unwrap();

        let version: i64 = store
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_store_schema_init_is_idempotent() {
        let store = KvCache::new().unwrap();

        // Re-running against an initialized store must not fail
        store.init_schema().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = KvCache::new().unwrap();

        store.set("key1", "value1", None).unwrap();
        let value = store.get("key1").unwrap();

        assert_eq!(value.as_deref(), Some("value1"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = KvCache::new().unwrap();

        let result = store.get("nonexistent").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_store_set_is_idempotent() {
        let mut store = KvCache::new().unwrap();

        store.set("key1", "value1", None).unwrap();
        store.set("key1", "value1", None).unwrap();

        assert_eq!(store.get("key1").unwrap().as_deref(), Some("value1"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_store_overwrite() {
        let mut store = KvCache::new().unwrap();

        store.set("key1", "value1", None).unwrap();
        store.set("key1", "value2", None).unwrap();

        let value = store.get("key1").unwrap();
        assert_eq!(value.as_deref(), Some("value2"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_store_keys_are_isolated() {
        let mut store = KvCache::new().unwrap();

        store.set("x", "1", None).unwrap();
        store.set("y", "2", None).unwrap();

        assert_eq!(store.get("x").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("y").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_store_delete() {
        let mut store = KvCache::new().unwrap();

        store.set("key1", "value1", None).unwrap();
        assert!(store.delete("key1").unwrap());

        assert!(store.is_empty().unwrap());
        assert!(store.get("key1").unwrap().is_none());
    }

    #[test]
    fn test_store_delete_nonexistent() {
        let mut store = KvCache::new().unwrap();

        assert!(!store.delete("nonexistent").unwrap());
    }

    #[test]
    fn test_store_retention_expiration() {
        let mut store = KvCache::new().unwrap();

        store
            .set("key1", "value1", Some(Duration::from_millis(200)))
            .unwrap();

        // Accessible before the deadline
        assert_eq!(store.get("key1").unwrap().as_deref(), Some("value1"));

        sleep(Duration::from_millis(300));

        // Expired now; the row is evicted in passing
        assert!(store.get("key1").unwrap().is_none());
        assert_eq!(store.len().unwrap(), 0);

        let stats = store.stats().unwrap();
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_store_default_retention_applies() {
        let config = CacheConfig {
            default_retention: Some(Duration::from_millis(200)),
            ..CacheConfig::default()
        };
        let mut store = KvCache::with_config(config).unwrap();

        store.set("key1", "value1", None).unwrap();
        sleep(Duration::from_millis(300));

        assert!(store.get("key1").unwrap().is_none());
    }

    #[test]
    fn test_store_explicit_retention_overrides_default() {
        let config = CacheConfig {
            default_retention: Some(Duration::from_millis(100)),
            ..CacheConfig::default()
        };
        let mut store = KvCache::with_config(config).unwrap();

        store
            .set("key1", "value1", Some(Duration::from_secs(3600)))
            .unwrap();
        sleep(Duration::from_millis(200));

        assert_eq!(store.get("key1").unwrap().as_deref(), Some("value1"));
    }

    #[test]
    fn test_store_purge_expired() {
        let mut store = KvCache::new().unwrap();

        store
            .set("short", "value1", Some(Duration::from_millis(100)))
            .unwrap();
        store
            .set("long", "value2", Some(Duration::from_secs(3600)))
            .unwrap();
        store.set("forever", "value3", None).unwrap();

        sleep(Duration::from_millis(200));

        let removed = store.purge_expired().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.get("long").unwrap().as_deref(), Some("value2"));
        assert_eq!(store.get("forever").unwrap().as_deref(), Some("value3"));
    }

    #[test]
    fn test_store_purge_expired_empty() {
        let mut store = KvCache::new().unwrap();

        assert_eq!(store.purge_expired().unwrap(), 0);
    }

    #[test]
    fn test_store_empty_key_rejected() {
        let mut store = KvCache::new().unwrap();

        let result = store.set("", "value", None);
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_store_key_too_long() {
        let mut store = KvCache::new().unwrap();
        let long_key = "x".repeat(MAX_KEY_LENGTH + 1);

        let result = store.set(&long_key, "value", None);
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[test]
    fn test_store_value_too_large() {
        let mut store = KvCache::new().unwrap();
        let large_value = "x".repeat(MAX_VALUE_SIZE + 1);

        let result = store.set("key", &large_value, None);
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[test]
    fn test_store_stats() {
        let mut store = KvCache::new().unwrap();

        store.set("key1", "value1", None).unwrap();
        store.get("key1").unwrap(); // hit
        store.get("nonexistent").unwrap(); // miss

        let stats = store.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_store_type_mismatch_on_corrupted_cell() {
        let mut store = KvCache::new().unwrap();

        // A blob keeps its type under TEXT affinity, unlike numbers
        store
            .conn
            .execute(
                "INSERT INTO cache_ss_kv (key, value) VALUES ('bad', x'0102')",
                [],
            )
            .unwrap();

        let result = store.get("bad");
        assert!(matches!(
            result,
            Err(CacheError::TypeMismatch {
                expected: "TEXT",
                ..
            })
        ));
    }

    #[test]
    fn test_store_snapshot() {
        let mut store = KvCache::new().unwrap();

        store.set("b", "2", None).unwrap();
        store.set("a", "1", Some(Duration::from_secs(60))).unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.entries.len(), 2);
        // Ordered by key
        assert_eq!(snapshot.entries[0].key, "a");
        assert!(snapshot.entries[0].expire_on.is_some());
        assert_eq!(snapshot.entries[1].key, "b");
        assert!(snapshot.entries[1].expire_on.is_none());
        assert!(!snapshot.taken_at.is_empty());
    }

    #[test]
    fn test_store_debug_truncates() {
        let mut store = KvCache::new().unwrap();

        for i in 0..12 {
            store.set(&format!("key{i:02}"), "v", None).unwrap();
        }

        let repr = format!("{store:?}");
        assert!(repr.starts_with("KvCache {"));
        assert!(repr.contains("key00=v"));
        assert!(repr.contains("...[2 remaining]"));
    }

    #[test]
    fn test_store_debug_empty() {
        let store = KvCache::new().unwrap();

        let repr = format!("{store:?}");
        assert!(repr.starts_with("KvCache {"));
    }

    #[test]
    fn test_stores_do_not_share_state() {
        let mut first = KvCache::new().unwrap();
        let mut second = KvCache::new().unwrap();

        first.set("key", "value", None).unwrap();

        assert!(second.get("key").unwrap().is_none());
        assert!(second.is_empty().unwrap());
    }
}
