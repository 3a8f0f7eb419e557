//! Long-running scheduler process

use crate::error::Result;
use crate::schedule::SchedulerStatus;
use crate::tracker::PriceTracker;
use std::future::Future;
use tracing::info;

/// Arm the scheduler, run until `shutdown` resolves, then stop cleanly.
/// A crawl that is already running is allowed to finish.
pub async fn cmd_serve<F>(tracker: &PriceTracker, shutdown: F) -> Result<SchedulerStatus>
where
    F: Future<Output = ()>,
{
    let status = tracker.scheduler().startup().await?;
    match &status.next_fire_local {
        Some(next) => info!("Scheduler armed, next crawl at {}", next),
        None => info!("Scheduler is disabled; waiting for shutdown"),
    }

    shutdown.await;
    info!("Shutting down");

    tracker.scheduler().shutdown();
    if tracker.crawl().is_running() {
        info!("Waiting for the running crawl to finish");
        tracker.crawl().wait_idle().await;
    }
    Ok(tracker.scheduler().status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_serve_arms_then_disarms() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(temp.path().to_path_buf()));
        let tracker = PriceTracker::open(config).await.unwrap();

        let status = cmd_serve(&tracker, async {}).await.unwrap();
        assert!(!status.armed);
        assert!(!status.loop_running);

        tracker.close().await;
    }
}
