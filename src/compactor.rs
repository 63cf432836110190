use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once `threshold` appends have accumulated since the last rewrite.
/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    debug!(appends, threshold, "WAL compaction due");
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("compactor: {e}");
            false
        }
    }
}

/// Background task that rewrites the WAL when it has grown past `threshold`.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}
