use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the journal once it has grown by `threshold` appends.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.journal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not due");
        return false;
    }
    match engine.compact_journal().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "journal compaction failed");
            false
        }
    }
}

/// Background task that keeps the journal from growing without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}
