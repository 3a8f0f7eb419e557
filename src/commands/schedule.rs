//! Schedule commands

use crate::error::Result;
use crate::schedule::{format_run_time, next_occurrence, parse_run_time, ScheduleSettings, SchedulerStatus};
use crate::tracker::PriceTracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored schedule plus where the next run would land
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleView {
    /// Persisted settings, `None` when the configured default applies
    pub stored: Option<ScheduleSettings>,
    pub effective_run_time: Option<String>,
    pub include_reference: bool,
    pub next_fire: Option<DateTime<Utc>>,
    pub time_zone: String,
}

pub async fn cmd_schedule_show(tracker: &PriceTracker) -> Result<ScheduleView> {
    let stored = tracker.schedule_settings().load().await?;
    let config = &tracker.config().schedule;
    let tz = tracker.scheduler().time_zone();

    let effective = match stored {
        Some(s) if !s.enabled => None,
        Some(s) => Some((s.run_time, s.include_reference)),
        None => Some((parse_run_time(&config.default_run_time)?, config.include_reference)),
    };

    Ok(ScheduleView {
        stored,
        effective_run_time: effective.map(|(t, _)| format_run_time(t)),
        include_reference: effective.map(|(_, r)| r).unwrap_or(false),
        next_fire: effective.map(|(t, _)| next_occurrence(t, Utc::now(), tz)),
        time_zone: tz.name().to_string(),
    })
}

pub async fn cmd_schedule_set(
    tracker: &PriceTracker,
    run_time: &str,
    include_reference: bool,
    actor: &str,
) -> Result<SchedulerStatus> {
    let run_time = parse_run_time(run_time)?;
    tracker
        .scheduler()
        .set_schedule(run_time, include_reference, actor)
        .await
}

pub async fn cmd_schedule_disable(tracker: &PriceTracker, actor: &str) -> Result<SchedulerStatus> {
    tracker.scheduler().disable(actor).await
}

pub fn print_schedule(view: &ScheduleView) {
    println!("\n⏰ Daily crawl schedule\n");
    match (&view.effective_run_time, view.next_fire) {
        (Some(run_time), Some(next)) => {
            let source = if view.stored.is_some() { "stored" } else { "config default" };
            println!("  Run time: {} {} ({})", run_time, view.time_zone, source);
            println!(
                "  Reference slot: {}",
                if view.include_reference { "included" } else { "excluded" }
            );
            println!("  Next run: {}", next.to_rfc3339());
        }
        _ => println!("  Disabled. Use 'pricewatch schedule set HH:MM' to enable."),
    }
}

pub fn print_scheduler_status(status: &SchedulerStatus) {
    match (&status.run_time, &status.next_fire_local) {
        (Some(run_time), Some(next)) if status.armed => {
            println!("✓ Daily crawl set to {} {}", run_time, status.time_zone);
            println!("  Next run: {}", next);
        }
        _ => println!("✓ Daily crawl disabled"),
    }
}
