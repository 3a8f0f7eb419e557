//! Daily crawl scheduler
//!
//! The scheduler is either stopped or armed with one time of day. While armed,
//! a background loop wakes every `tick_secs`, re-reads the persisted settings
//! and fires the orchestrator's scheduled entry point once the next fire
//! instant has passed. Times of day are interpreted in one configured zone,
//! never the host's local zone.

mod settings;

pub use settings::*;

use crate::config::ScheduleConfig;
use crate::crawl::{CrawlService, StartOutcome};
use crate::error::{Error, Result};
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Actor recorded on observations written by scheduled runs
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Parse an `HH:MM` time of day
pub fn parse_run_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| Error::InvalidTime(format!("Expected HH:MM, got '{}'", raw.trim())))
}

pub fn format_run_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// First instant strictly after `after` whose wall-clock time in `tz` is `run_time`.
///
/// A day where `run_time` does not exist (a DST gap) is skipped.
pub fn next_occurrence(run_time: NaiveTime, after: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_today = after.with_timezone(&tz).date_naive();
    for offset in 0..=3u64 {
        let Some(day) = local_today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(run_time)).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > after {
                return candidate;
            }
        }
    }
    // Unreachable for real zones; fall back to a plain day later
    after + chrono::Duration::days(1)
}

/// Result of evaluating the timer at an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// Timer was due and a scheduled run started
    Fired,
    /// Timer was due but a run was already in progress; not retried
    SkippedBusy,
    NotDue,
    Disarmed,
}

/// Scheduler state as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub armed: bool,
    pub run_time: Option<String>,
    pub include_reference: bool,
    pub next_fire: Option<DateTime<Utc>>,
    /// `next_fire` as wall-clock time in the configured zone
    pub next_fire_local: Option<String>,
    pub time_zone: String,
    pub loop_running: bool,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    run_time: NaiveTime,
    include_reference: bool,
    next_fire: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    timer: Option<Timer>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    crawl: CrawlService,
    settings: ScheduleConfigStore,
    tz: Tz,
    tick: Duration,
    defaults: ScheduleSettings,
    state: Mutex<State>,
}

/// Scheduler handle
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(crawl: CrawlService, settings: ScheduleConfigStore, config: &ScheduleConfig) -> Result<Self> {
        let defaults = ScheduleSettings::new(
            parse_run_time(&config.default_run_time)?,
            config.include_reference,
        );
        Ok(Self {
            inner: Arc::new(Inner {
                crawl,
                settings,
                tz: config.tz()?,
                tick: Duration::from_secs(config.tick_secs.max(1)),
                defaults,
                state: Mutex::new(State::default()),
            }),
        })
    }

    pub fn time_zone(&self) -> Tz {
        self.inner.tz
    }

    /// Register a daily timer, replacing any previous one, and make sure the loop runs
    pub fn arm(&self, run_time: NaiveTime, include_reference: bool) -> SchedulerStatus {
        {
            let mut state = self.inner.lock();
            state.timer = Some(self.inner.timer_for(run_time, include_reference, Utc::now()));
            self.ensure_loop(&mut state);
        }
        info!(
            "Scheduler armed for {} {} (reference slot {})",
            format_run_time(run_time),
            self.inner.tz,
            if include_reference { "included" } else { "excluded" }
        );
        self.status()
    }

    fn ensure_loop(&self, state: &mut State) {
        let loop_alive = state.task.as_ref().is_some_and(|t| !t.is_finished());
        if !loop_alive {
            state.task = Some(spawn_loop(Arc::downgrade(&self.inner), self.inner.tick));
        }
    }

    /// Clear the timer and stop the loop
    pub fn disarm(&self) -> SchedulerStatus {
        let had_timer = {
            let mut state = self.inner.lock();
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.timer.take().is_some()
        };
        if had_timer {
            info!("Scheduler disarmed");
        }
        self.status()
    }

    /// Replace the schedule: a full disarm followed by a fresh arm
    pub fn reconfigure(&self, run_time: NaiveTime, include_reference: bool) -> SchedulerStatus {
        self.disarm();
        self.arm(run_time, include_reference)
    }

    /// Persist a new schedule and apply it
    pub async fn set_schedule(
        &self,
        run_time: NaiveTime,
        include_reference: bool,
        actor: &str,
    ) -> Result<SchedulerStatus> {
        self.inner
            .settings
            .save(&ScheduleSettings::new(run_time, include_reference), actor)
            .await?;
        Ok(self.reconfigure(run_time, include_reference))
    }

    /// Persist the disabled flag and disarm
    pub async fn disable(&self, actor: &str) -> Result<SchedulerStatus> {
        self.inner.settings.set_enabled(false, actor).await?;
        Ok(self.disarm())
    }

    /// Evaluate the timer at `now`, firing the scheduled run when due
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let include_reference = {
            let mut state = self.inner.lock();
            let Some(timer) = state.timer.as_mut() else {
                return TickOutcome::Disarmed;
            };
            if now < timer.next_fire {
                return TickOutcome::NotDue;
            }
            timer.next_fire = next_occurrence(timer.run_time, now, self.inner.tz);
            timer.include_reference
        };

        match self.inner.crawl.start_scheduled(include_reference, SCHEDULER_ACTOR) {
            StartOutcome::Started => {
                info!("Scheduled crawl started");
                TickOutcome::Fired
            }
            StartOutcome::Busy => {
                info!("Scheduled crawl skipped, a crawl is already running");
                TickOutcome::SkippedBusy
            }
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.inner.lock();
        let timer = state.timer;
        SchedulerStatus {
            armed: timer.is_some(),
            run_time: timer.map(|t| format_run_time(t.run_time)),
            include_reference: timer.map(|t| t.include_reference).unwrap_or(false),
            next_fire: timer.map(|t| t.next_fire),
            next_fire_local: timer.map(|t| {
                t.next_fire
                    .with_timezone(&self.inner.tz)
                    .format("%Y-%m-%d %H:%M %Z")
                    .to_string()
            }),
            time_zone: self.inner.tz.name().to_string(),
            loop_running: state.task.as_ref().is_some_and(|t| !t.is_finished()),
        }
    }

    /// Process start hook: arm from persisted settings, or from config defaults
    /// when nothing was ever saved. A persisted disabled schedule leaves the
    /// timer unarmed, but the loop still runs so a later re-enable is seen.
    pub async fn startup(&self) -> Result<SchedulerStatus> {
        let settings = self.inner.settings.load().await?;
        match settings {
            Some(s) if !s.enabled => {
                info!("Scheduler is disabled in the stored settings, watching for changes");
                self.ensure_loop(&mut self.inner.lock());
                Ok(self.status())
            }
            Some(s) => Ok(self.arm(s.run_time, s.include_reference)),
            None => {
                debug!("No stored schedule, using configured default");
                Ok(self.arm(self.inner.defaults.run_time, self.inner.defaults.include_reference))
            }
        }
    }

    /// Process shutdown hook: disarm and cancel armed item refreshes
    pub fn shutdown(&self) {
        self.disarm();
        let cancelled = self.inner.crawl.cancel_pending();
        debug!("Scheduler shut down ({} pending refresh(es) cancelled)", cancelled);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn timer_for(&self, run_time: NaiveTime, include_reference: bool, now: DateTime<Utc>) -> Timer {
        Timer {
            run_time,
            include_reference,
            next_fire: next_occurrence(run_time, now, self.tz),
        }
    }

    /// Pick up settings another process saved since the last tick
    async fn sync_persisted(&self) {
        let settings = match self.settings.load().await {
            Ok(Some(settings)) => settings,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read schedule settings: {}", e);
                return;
            }
        };

        let mut state = self.lock();
        let current = state.timer.map(|t| (t.run_time, t.include_reference));
        let wanted = settings
            .enabled
            .then_some((settings.run_time, settings.include_reference));
        if current == wanted {
            return;
        }

        state.timer = wanted.map(|(run_time, include_reference)| {
            self.timer_for(run_time, include_reference, Utc::now())
        });
        match wanted {
            Some((run_time, _)) => info!("Schedule changed, next run at {}", format_run_time(run_time)),
            None => info!("Schedule disabled by stored settings"),
        }
    }
}

fn spawn_loop(inner: Weak<Inner>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.sync_persisted().await;
            let outcome = Scheduler { inner }.tick_at(Utc::now());
            debug!("Scheduler tick: {:?}", outcome);
        }
    })
}
