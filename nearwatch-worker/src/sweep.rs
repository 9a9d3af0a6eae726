use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use nearwatch_core::retention::RetentionSweeper;

/// Run the retention sweep every `every`, starting immediately. The store is
/// blocking, so each sweep runs off the async workers.
pub async fn run_retention(sweeper: Arc<RetentionSweeper>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let sweeper = Arc::clone(&sweeper);
        match tokio::task::spawn_blocking(move || sweeper.sweep()).await {
            Ok(Ok(report)) if report.total() > 0 => {
                tracing::debug!(total = report.total(), "retention sweep removed rows");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "retention sweep failed"),
            Err(e) => tracing::error!(error = %e, "retention sweep task panicked"),
        }
    }
}
