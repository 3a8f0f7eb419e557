//! Observation retention

use crate::error::{Error, Result};
use crate::tracker::PriceTracker;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeReport {
    pub days: u32,
    pub deleted: u64,
}

/// Delete observations older than `days` (config retention when `None`)
pub async fn cmd_purge(tracker: &PriceTracker, days: Option<u32>) -> Result<PurgeReport> {
    let days = days.unwrap_or(tracker.config().store.retention_days);
    if days == 0 {
        return Err(Error::Other("Retention must be at least one day".to_string()));
    }
    let deleted = tracker.observations().purge_older_than(days).await?;
    Ok(PurgeReport { days, deleted })
}

pub fn print_purge_report(report: &PurgeReport) {
    println!(
        "✓ Purged {} observation(s) older than {} day(s)",
        report.deleted, report.days
    );
}
