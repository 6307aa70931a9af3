//! Retention Sweep Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::KvCache;

/// Spawns a background task that periodically purges expired cache entries.
///
/// The task runs in an infinite loop, sleeping for the specified interval
/// between sweeps. Lazy eviction on `get` stays active regardless; the
/// sweep just bounds how long an expired row can linger unobserved.
///
/// Every cache operation needs exclusive access (reads update statistics,
/// and the connection cannot be shared across threads), hence the plain
/// mutex rather than a reader/writer lock.
///
/// # Arguments
/// * `cache` - Shared reference to the cache
/// * `sweep_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(Mutex::new(KvCache::new()?));
/// let sweep_handle = spawn_sweep_task(cache.clone(), 60);
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(cache: Arc<Mutex<KvCache>>, sweep_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(sweep_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting retention sweep task with interval of {} seconds",
            sweep_interval_secs
        );

        loop {
            // Sleep for the configured interval
            tokio::time::sleep(interval).await;

            // Acquire the cache and purge expired entries
            let removed = {
                let mut cache_guard = cache.lock().await;
                match cache_guard.purge_expired() {
                    Ok(removed) => removed,
                    Err(err) => {
                        warn!("Retention sweep failed: {}", err);
                        continue;
                    }
                }
            };

            // Log sweep statistics
            if removed > 0 {
                info!("Retention sweep: removed {} expired entries", removed);
            } else {
                debug!("Retention sweep: no expired entries found");
            }
        }
    })
}
