//! Status command implementation

use crate::crawl::{CrawlRun, CrawlStatus};
use crate::error::Result;
use crate::links::LinkCounts;
use crate::observations::ObservationStats;
use crate::schedule::{format_run_time, ScheduleSettings};
use crate::tracker::PriceTracker;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub time_zone: String,
    pub links: LinkCounts,
    pub observations: ObservationStats,
    pub schedule: Option<ScheduleSettings>,
    pub crawl: CrawlStatus,
    pub recent_runs: Vec<CrawlRun>,
}

/// Get system status
pub async fn cmd_status(tracker: &PriceTracker, run_limit: usize) -> Result<StatusInfo> {
    info!("Getting status");

    let config = tracker.config();
    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        time_zone: config.schedule.time_zone.clone(),
        links: tracker.registry().counts().await?,
        observations: tracker.observations().stats().await?,
        schedule: tracker.schedule_settings().load().await?,
        crawl: tracker.crawl().status(),
        recent_runs: tracker.crawl().recent_runs(run_limit).await?,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 pricewatch Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);

    println!("\nLinks:");
    println!("  Items: {}", status.links.items);
    println!("  Active links: {}", status.links.active_links);

    println!("\nObservations:");
    println!("  Total: {}", status.observations.total);
    println!("  Active: {}", status.observations.active);
    println!("  Pasive: {}", status.observations.pasive);

    println!("\nSchedule:");
    match &status.schedule {
        Some(s) if s.enabled => println!(
            "  Daily at {} {} (reference slot {})",
            format_run_time(s.run_time),
            status.time_zone,
            if s.include_reference { "included" } else { "excluded" }
        ),
        Some(_) => println!("  Disabled"),
        None => println!("  Not configured (config default applies)"),
    }

    if status.crawl.is_running {
        println!(
            "\n⏳ Crawl in progress: {}/{}",
            status.crawl.progress, status.crawl.total
        );
    }

    println!("\nRecent runs:");
    if status.recent_runs.is_empty() {
        println!("  None yet. Use 'pricewatch crawl' to start one.");
    }
    for run in &status.recent_runs {
        println!(
            "  • {} {} by {}: {}/{} ok, {} failed [{}]",
            run.started_at, run.kind, run.started_by, run.succeeded, run.total, run.failed, run.outcome
        );
    }
}
