//! Foreground crawl command

use crate::crawl::{CrawlStatus, StartOutcome};
use crate::error::Result;
use crate::progress::follow_crawl;
use crate::slot::Slot;
use crate::tracker::PriceTracker;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for a foreground crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Only crawl this item
    pub item_key: Option<String>,
    /// Restrict an item crawl to these slots (all addressed slots when empty)
    pub slots: Vec<Slot>,
    pub include_reference: bool,
    pub actor: String,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlReport {
    pub outcome: StartOutcome,
    pub message: String,
    /// Final status, present when the run was started here
    pub status: Option<CrawlStatus>,
}

pub async fn cmd_crawl(tracker: &PriceTracker, options: CrawlOptions) -> Result<CrawlReport> {
    let crawl = tracker.crawl();
    let outcome = match &options.item_key {
        Some(item_key) => {
            let slots = if options.slots.is_empty() {
                Slot::all(options.include_reference).collect()
            } else {
                options.slots.clone()
            };
            crawl.start_for_item(item_key, &slots, &options.actor)
        }
        None => crawl.start_manual(options.include_reference, &options.actor),
    };

    if outcome == StartOutcome::Busy {
        return Ok(CrawlReport {
            outcome,
            message: outcome.message().to_string(),
            status: None,
        });
    }

    let status = follow_crawl(crawl, options.show_progress, Duration::from_millis(250)).await;
    Ok(CrawlReport {
        outcome,
        message: format!(
            "Crawl finished: {} of {} succeeded, {} failed",
            status.success_count, status.total, status.failed_count
        ),
        status: Some(status),
    })
}

/// Start a refresh of the given item slots and wait for it
pub async fn cmd_refresh_item(
    tracker: &PriceTracker,
    item_key: &str,
    slots: &[Slot],
    actor: &str,
    show_progress: bool,
) -> Result<Option<CrawlReport>> {
    if slots.is_empty() {
        return Ok(None);
    }
    let options = CrawlOptions {
        item_key: Some(item_key.to_string()),
        slots: slots.to_vec(),
        include_reference: true,
        actor: actor.to_string(),
        show_progress,
    };
    cmd_crawl(tracker, options).await.map(Some)
}

pub fn print_crawl_report(report: &CrawlReport) {
    match report.outcome {
        StartOutcome::Busy => println!("⚠ {}", report.message),
        StartOutcome::Started => {
            println!("✓ {}", report.message);
            if let Some(status) = &report.status {
                if !status.errors.is_empty() {
                    println!("\nRecent failures:");
                    for error in &status.errors {
                        println!("  • {}", error);
                    }
                }
            }
        }
    }
}
