use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;

/// Apply every due automatic status change once. Returns how many stuck.
pub async fn sweep_once(engine: &Engine) -> usize {
    let now = engine.now_ms();
    let mut applied = 0;
    for (id, status) in engine.due_auto_transitions(now) {
        match engine.update_status(id, status).await {
            Ok(_) => {
                applied += 1;
                metrics::counter!(crate::observability::AUTO_TRANSITIONS_TOTAL, "status" => status.as_str())
                    .increment(1);
            }
            // Someone moved it first.
            Err(e) => debug!("sweeper skip {id}: {e}"),
        }
    }
    if applied > 0 {
        info!(applied, "auto status transitions applied");
    }
    applied
}

/// Periodic auto-transition task. Practices without a policy are untouched.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// Periodically compact the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            info!("compacting WAL ({appends} appends since last compaction)");
            if let Err(e) = engine.compact_wal().await {
                error!("WAL compaction failed: {e}");
            }
        }
    }
}
