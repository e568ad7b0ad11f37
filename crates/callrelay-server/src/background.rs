//! Background tasks for the callrelay server.
//!
//! Includes:
//! - Sweeping expired call sessions out of the correlation store.

use crate::store::CallStore;
use tokio::time::{sleep, Duration};

/// Starts the session sweep task.
///
/// Runs indefinitely, evicting sessions whose TTL has passed. Expiry is also
/// checked on every store access, so this only bounds memory held by calls
/// that are never touched again.
pub async fn start_sweep_task(store: CallStore, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::warn!("session sweep task disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(
        interval_seconds,
        ttl_seconds = store.ttl().as_secs(),
        "starting session sweep task"
    );

    loop {
        sleep(interval).await;

        let removed = store.sweep();
        if removed > 0 {
            tracing::info!(count = removed, remaining = store.len(), "swept expired call sessions");
        }
    }
}
