//! Background state cleanup task.
//!
//! Periodically evicts expired authentication state from the store.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::store::StateStore;

/// Default cleanup interval in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Spawn a background task that periodically evicts expired state.
///
/// Returns a `JoinHandle` that can be used to abort the task.
pub fn spawn_cleanup_task(
    store: Arc<dyn StateStore>,
    cleanup_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(cleanup_interval_secs.max(1)));

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match store.evict_expired() {
                Ok(count) if count > 0 => info!(evicted = count, "State cleanup completed"),
                Ok(_) => debug!("State cleanup: nothing expired"),
                Err(e) => warn!(error = %e, "State cleanup failed"),
            }

            if let Ok(count) = store.len() {
                debug!(pending_states = count, "State store status");
            }
        }
    })
}
