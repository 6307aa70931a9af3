//! Cache Entry Module
//!
//! Defines the row structure for individual cache entries with retention support.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

// == Cache Entry ==
/// Represents a single cache row.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    /// The key the entry is stored under
    pub key: String,
    /// The stored value
    pub value: String,
    /// Expiration deadline as a Unix timestamp in fractional seconds,
    /// None = no expiration
    pub expire_on: Option<f64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry with an optional retention duration.
    ///
    /// The absolute expiration deadline is fixed at construction time:
    /// `now + retention`.
    ///
    /// # Arguments
    /// * `key` - The key to store the entry under
    /// * `value` - The value to store
    /// * `retention` - Optional retention duration
    pub fn new(key: String, value: String, retention: Option<Duration>) -> Self {
        let expire_on = retention.map(|r| now_secs() + r.as_secs_f64());

        Self {
            key,
            value,
            expire_on,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// Boundary condition: an entry is considered expired when the current
    /// time is greater than or equal to the deadline, so an entry whose
    /// retention has fully elapsed is expired immediately.
    ///
    /// # Returns
    /// - `true` if the entry has a deadline and the current time >= deadline
    /// - `false` if the entry has no deadline (never expires) or it hasn't elapsed
    pub fn is_expired(&self) -> bool {
        match self.expire_on {
            Some(deadline) => now_secs() >= deadline,
            None => false,
        }
    }

    // == Retention Remaining ==
    /// Returns the remaining retention, or None if no deadline is set.
    ///
    /// # Returns
    /// - `Some(Duration::ZERO)` if the entry has expired
    /// - `Some(remaining)` if the entry has a deadline that hasn't elapsed
    /// - `None` if the entry has no deadline (never expires)
    pub fn retention_remaining(&self) -> Option<Duration> {
        self.expire_on.map(|deadline| {
            let now = now_secs();
            if deadline > now {
                Duration::from_secs_f64(deadline - now)
            } else {
                Duration::ZERO
            }
        })
    }
}

// == Cache Snapshot ==
/// Point-in-time listing of every row in the cache, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    /// Capture timestamp in ISO 8601 format
    pub taken_at: String,
    /// All rows present at capture time
    pub entries: Vec<CacheEntry>,
}

impl CacheSnapshot {
    /// Creates a new CacheSnapshot stamped with the current time.
    pub fn new(entries: Vec<CacheEntry>) -> Self {
        Self {
            taken_at: chrono::Utc::now().to_rfc3339(),
            entries,
        }
    }
}

// == Utility Functions ==
/// Returns the current Unix timestamp in fractional seconds.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs_f64()
}
