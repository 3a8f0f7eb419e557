//! Crawl orchestrator
//!
//! Runs visit a snapshot of active links one at a time, in slot then item
//! order, and append an observation for every successful extraction. At most
//! one run exists at any instant: every start path goes through a single
//! check-and-set on the shared status board, and a start attempt while a run
//! is going returns [`StartOutcome::Busy`] instead of queueing.

mod runs;
mod status;

pub use runs::*;
pub use status::*;

use crate::config::{CrawlConfig, PolitenessConfig};
use crate::db::Database;
use crate::error::Result;
use crate::extract::Extractor;
use crate::links::{LinkRegistry, LinkTarget};
use crate::observations::{NewObservation, ObservationStore};
use crate::slot::Slot;
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    /// Another run is in progress; nothing was queued
    Busy,
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started)
    }

    pub fn message(&self) -> &'static str {
        match self {
            StartOutcome::Started => "Crawl started",
            StartOutcome::Busy => "A crawl is already running",
        }
    }
}

/// Which links a run visits
#[derive(Debug, Clone)]
enum TargetPlan {
    All { include_reference: bool },
    Item { item_key: String, slots: Vec<Slot> },
}

struct Inner {
    db: Database,
    registry: LinkRegistry,
    store: ObservationStore,
    extractor: Arc<dyn Extractor>,
    politeness: PolitenessConfig,
    edit_refresh_delay: Duration,
    status: StatusBoard,
    idle: Notify,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

/// Crawl orchestrator handle
#[derive(Clone)]
pub struct CrawlService {
    inner: Arc<Inner>,
}

/// Resets the board to idle when a run task ends, including by panic or abort
struct RunGuard {
    inner: Arc<Inner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.status.finish();
        self.inner.idle.notify_waiters();
    }
}

impl CrawlService {
    pub fn new(
        db: Database,
        registry: LinkRegistry,
        store: ObservationStore,
        extractor: Arc<dyn Extractor>,
        politeness: PolitenessConfig,
        config: &CrawlConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                registry,
                store,
                extractor,
                politeness,
                edit_refresh_delay: Duration::from_secs(config.edit_refresh_delay_secs),
                status: StatusBoard::new(config.error_buffer),
                idle: Notify::new(),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Full run started by an operator
    pub fn start_manual(&self, include_reference: bool, actor: &str) -> StartOutcome {
        self.start(RunKind::Manual, TargetPlan::All { include_reference }, actor)
    }

    /// Full run started by the daily scheduler
    pub fn start_scheduled(&self, include_reference: bool, actor: &str) -> StartOutcome {
        self.start(RunKind::Scheduled, TargetPlan::All { include_reference }, actor)
    }

    /// Run limited to the given slots of one item
    pub fn start_for_item(&self, item_key: &str, slots: &[Slot], actor: &str) -> StartOutcome {
        self.start(
            RunKind::Item,
            TargetPlan::Item {
                item_key: item_key.to_string(),
                slots: slots.to_vec(),
            },
            actor,
        )
    }

    fn start(&self, kind: RunKind, plan: TargetPlan, actor: &str) -> StartOutcome {
        let run_id = uuid::Uuid::new_v4().to_string();
        if !self.inner.status.try_begin(kind, actor, &run_id) {
            info!(kind = %kind, actor = actor, "Crawl start refused, a run is already in progress");
            return StartOutcome::Busy;
        }

        let guard = RunGuard {
            inner: self.inner.clone(),
        };
        let inner = self.inner.clone();
        let actor = actor.to_string();

        tokio::spawn(async move {
            let _guard = guard;
            let started_at = Utc::now();

            let result = AssertUnwindSafe(inner.execute(kind, &plan, &actor, &run_id))
                .catch_unwind()
                .await;

            let outcome = match result {
                Ok(Ok(())) => RunOutcome::Completed,
                Ok(Err(e)) => {
                    error!(run_id = %run_id, "Crawl aborted: {}", e);
                    RunOutcome::Aborted
                }
                Err(_) => {
                    error!(run_id = %run_id, "Crawl task panicked");
                    RunOutcome::Aborted
                }
            };

            let status = inner.status.snapshot();
            let run = CrawlRun::new(
                &run_id,
                kind,
                &actor,
                started_at,
                status.total,
                status.success_count,
                status.failed_count,
                outcome,
            );
            if let Err(e) = record_run(&inner.db, &run).await {
                warn!(run_id = %run_id, "Failed to record crawl run: {}", e);
            }
        });

        StartOutcome::Started
    }

    /// Start a single-item run for `slots` after the configured delay.
    ///
    /// Used after a link edit so fresh prices show up without waiting for the
    /// daily run. If a run is going when the delay ends, the refresh is skipped.
    pub fn schedule_item_refresh(&self, item_key: &str, slots: &[Slot], actor: &str) {
        if slots.is_empty() {
            return;
        }

        let service = self.clone();
        let item_key = item_key.to_string();
        let slots = slots.to_vec();
        let actor = actor.to_string();
        let delay = self.inner.edit_refresh_delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if service.start_for_item(&item_key, &slots, &actor) == StartOutcome::Busy {
                info!(item = %item_key, "Skipped item refresh, a crawl is running");
            }
        });

        let mut pending = self.lock_pending();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Cancel armed item refreshes that have not fired yet
    pub fn cancel_pending(&self) -> usize {
        let mut pending = self.lock_pending();
        let mut cancelled = 0;
        for handle in pending.drain(..) {
            if !handle.is_finished() {
                handle.abort();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!("Cancelled {} pending item refresh(es)", cancelled);
        }
        cancelled
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> CrawlStatus {
        self.inner.status.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.inner.status.is_running()
    }

    /// Wait until no run is in progress
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking; notify_waiters only reaches existing waiters
            let notified = self.inner.idle.notified();
            if !self.inner.status.is_running() {
                return;
            }
            notified.await;
        }
    }

    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<CrawlRun>> {
        recent_runs(&self.inner.db, limit).await
    }
}

impl Inner {
    async fn snapshot_targets(&self, plan: &TargetPlan) -> Result<Vec<LinkTarget>> {
        match plan {
            TargetPlan::All { include_reference } => {
                self.registry.get_all_active_links(*include_reference).await
            }
            TargetPlan::Item { item_key, slots } => {
                self.registry.get_item_targets(item_key, slots).await
            }
        }
    }

    async fn execute(&self, kind: RunKind, plan: &TargetPlan, actor: &str, run_id: &str) -> Result<()> {
        let targets = self.snapshot_targets(plan).await?;
        self.status.set_total(targets.len());
        info!(run_id = run_id, kind = %kind, actor = actor, "Crawling {} target(s)", targets.len());

        for (idx, target) in targets.iter().enumerate() {
            self.status
                .set_current(format!("{} / slot {}", target.item_key, target.slot));
            self.visit(target, actor).await;

            if idx + 1 < targets.len() {
                let profile = self.politeness.for_slot(target.slot);
                let gap = match kind {
                    RunKind::Scheduled => profile.scheduled_gap.sample(),
                    RunKind::Manual | RunKind::Item => profile.manual_gap.sample(),
                };
                if !gap.is_zero() {
                    tokio::time::sleep(gap).await;
                }
            }
        }

        let status = self.status.snapshot();
        info!(
            run_id = run_id,
            "Crawl finished: {} succeeded, {} failed",
            status.success_count,
            status.failed_count
        );
        Ok(())
    }

    /// Extract one target and store the result; failures are counted, never raised
    async fn visit(&self, target: &LinkTarget, actor: &str) {
        let extraction = match self.extractor.extract(&target.url, target.slot).await {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(item = %target.item_key, slot = %target.slot, url = %target.url, "Extraction failed: {}", e);
                self.status
                    .record_failure(format!("{} slot {}: {}", target.item_key, target.slot, e));
                return;
            }
        };

        let observation = NewObservation {
            item_key: target.item_key.clone(),
            slot: i64::from(target.slot),
            source_url: target.url.clone(),
            title: Some(extraction.title),
            price: Some(extraction.price),
            seller_name: Some(extraction.seller_name),
            scraped_by: actor.to_string(),
        };

        match self.store.append(&observation).await {
            Ok(_) => self.status.record_success(),
            Err(e) => {
                warn!(item = %target.item_key, slot = %target.slot, "Failed to store observation: {}", e);
                self.status
                    .record_failure(format!("{} slot {}: {}", target.item_key, target.slot, e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::temp_db;
    use crate::error::Error;
    use crate::extract::Extraction;
    use crate::links::LinkValidator;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Succeeds for URLs containing "good", fails otherwise; records visit order
    #[derive(Default)]
    struct ScriptedExtractor {
        visits: Mutex<Vec<(String, Slot)>>,
    }

    #[async_trait]
    impl Extractor for ScriptedExtractor {
        async fn extract(&self, url: &str, slot: Slot) -> Result<Extraction> {
            self.visits.lock().unwrap().push((url.to_string(), slot));
            if url.contains("good") {
                Ok(Extraction {
                    title: "Widget".to_string(),
                    price: 10.0 + f64::from(slot.number()),
                    seller_name: "Shop".to_string(),
                })
            } else {
                Err(Error::Extraction(format!("No price found ({})", url)))
            }
        }
    }

    /// Blocks every extraction until the test adds permits
    struct GatedExtractor {
        gate: Semaphore,
    }

    #[async_trait]
    impl Extractor for GatedExtractor {
        async fn extract(&self, _url: &str, _slot: Slot) -> Result<Extraction> {
            let _permit = self.gate.acquire().await.unwrap();
            Ok(Extraction {
                title: "Widget".to_string(),
                price: 1.0,
                seller_name: "Shop".to_string(),
            })
        }
    }

    struct PanickingExtractor;

    #[async_trait]
    impl Extractor for PanickingExtractor {
        async fn extract(&self, _url: &str, _slot: Slot) -> Result<Extraction> {
            panic!("parser bug");
        }
    }

    struct Fixture {
        service: CrawlService,
        registry: LinkRegistry,
        store: ObservationStore,
        _tmp: TempDir,
    }

    async fn fixture(extractor: Arc<dyn Extractor>) -> Fixture {
        let (db, tmp) = temp_db().await;
        let registry = LinkRegistry::new(
            db.clone(),
            LinkValidator::new(&["https://src.example/".to_string()]),
        );
        let store = ObservationStore::new(db.clone());
        let config = CrawlConfig {
            error_buffer: 10,
            edit_refresh_delay_secs: 0,
        };
        let service = CrawlService::new(
            db,
            registry.clone(),
            store.clone(),
            extractor,
            PolitenessConfig::immediate(),
            &config,
        );
        Fixture {
            service,
            registry,
            store,
            _tmp: tmp,
        }
    }

    async fn link(registry: &LinkRegistry, item: &str, entries: &[(i64, &str)]) {
        let slots: BTreeMap<i64, String> = entries
            .iter()
            .map(|(slot, url)| (*slot, url.to_string()))
            .collect();
        registry.set_links(item, &slots, "alice", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_extraction_is_counted_not_stored() {
        let fx = fixture(Arc::new(ScriptedExtractor::default())).await;
        link(&fx.registry, "A123", &[(1, "https://src.example/p/1")]).await;

        assert_eq!(fx.service.start_manual(false, "alice"), StartOutcome::Started);
        fx.service.wait_idle().await;

        let status = fx.service.status();
        assert!(!status.is_running);
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.success_count, 0);
        assert_eq!(status.errors.len(), 1);
        assert!(fx.store.latest_active_prices("A123", false).await.is_empty());
    }

    #[tokio::test]
    async fn test_run_visits_slot_then_item_order() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let fx = fixture(extractor.clone()).await;
        link(
            &fx.registry,
            "B2",
            &[(0, "https://src.example/good/b0"), (2, "https://src.example/good/b2")],
        )
        .await;
        link(
            &fx.registry,
            "A1",
            &[(2, "https://src.example/good/a2"), (1, "https://src.example/bad/a1")],
        )
        .await;

        fx.service.start_manual(true, "alice");
        fx.service.wait_idle().await;

        let visits: Vec<String> = extractor
            .visits
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.rsplit('/').next().unwrap().to_string())
            .collect();
        assert_eq!(visits, vec!["b0", "a1", "a2", "b2"]);

        let status = fx.service.status();
        assert_eq!(status.total, 4);
        assert_eq!(status.progress, 4);
        assert_eq!(status.success_count, 3);
        assert_eq!(status.failed_count, 1);

        let latest = fx.store.latest_active_prices("A1", false).await;
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].price, Some(12.0));
    }

    #[tokio::test]
    async fn test_reference_slot_excluded_unless_requested() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let fx = fixture(extractor.clone()).await;
        link(
            &fx.registry,
            "A1",
            &[(0, "https://src.example/good/own"), (1, "https://src.example/good/c1")],
        )
        .await;

        fx.service.start_scheduled(false, "scheduler");
        fx.service.wait_idle().await;

        let visits = extractor.visits.lock().unwrap().clone();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].1, Slot::new(1).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_admit_exactly_one() {
        let extractor = Arc::new(GatedExtractor {
            gate: Semaphore::new(0),
        });
        let fx = fixture(extractor.clone()).await;
        link(&fx.registry, "A1", &[(1, "https://src.example/p/1")]).await;

        let attempts = (0..16).map(|i| {
            let service = fx.service.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    service.start_manual(false, "alice")
                } else {
                    service.start_scheduled(false, "scheduler")
                }
            })
        });
        let outcomes: Vec<StartOutcome> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let started = outcomes.iter().filter(|o| o.is_started()).count();
        assert_eq!(started, 1);
        assert_eq!(outcomes.len() - started, 15);
        assert!(fx.service.is_running());

        extractor.gate.add_permits(1);
        fx.service.wait_idle().await;
        assert!(!fx.service.is_running());
        assert!(fx.service.start_manual(false, "alice").is_started());
        fx.service.wait_idle().await;
    }

    #[tokio::test]
    async fn test_panic_resets_status_and_records_aborted_run() {
        let fx = fixture(Arc::new(PanickingExtractor)).await;
        link(&fx.registry, "A1", &[(1, "https://src.example/p/1")]).await;

        assert!(fx.service.start_manual(false, "alice").is_started());
        fx.service.wait_idle().await;

        let status = fx.service.status();
        assert!(!status.is_running);
        assert_eq!(status.current_item_label, None);

        let runs = fx.service.recent_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, "aborted");

        // A later run is not blocked
        assert!(fx.service.start_manual(false, "alice").is_started());
        fx.service.wait_idle().await;
    }

    #[tokio::test]
    async fn test_item_run_only_visits_requested_slots() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let fx = fixture(extractor.clone()).await;
        link(
            &fx.registry,
            "A1",
            &[(1, "https://src.example/good/1"), (2, "https://src.example/good/2")],
        )
        .await;
        link(&fx.registry, "B2", &[(2, "https://src.example/good/b2")]).await;

        let outcome = fx
            .service
            .start_for_item("A1", &[Slot::new(2).unwrap()], "alice");
        assert!(outcome.is_started());
        fx.service.wait_idle().await;

        let visits = extractor.visits.lock().unwrap().clone();
        assert_eq!(visits, vec![("https://src.example/good/2".to_string(), Slot::new(2).unwrap())]);

        let runs = fx.service.recent_runs(1).await.unwrap();
        assert_eq!(runs[0].kind, "item");
        assert_eq!(runs[0].succeeded, 1);
        assert_eq!(runs[0].outcome, "completed");
    }

    #[tokio::test]
    async fn test_item_refresh_fires_after_delay() {
        let extractor = Arc::new(ScriptedExtractor::default());
        let fx = fixture(extractor.clone()).await;
        link(&fx.registry, "A1", &[(1, "https://src.example/good/1")]).await;

        fx.service
            .schedule_item_refresh("A1", &[Slot::new(1).unwrap()], "alice");

        for _ in 0..100 {
            if !fx.service.recent_runs(1).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fx.store.latest_active_prices("A1", false).await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_counts_as_failed_target() {
        let (db, _tmp) = temp_db().await;
        sqlx::query(
            r#"
            CREATE TRIGGER reject_locked_listing BEFORE INSERT ON observations
            WHEN NEW.source_url LIKE '%/locked'
            BEGIN SELECT RAISE(ABORT, 'observations unavailable'); END
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        let registry = LinkRegistry::new(
            db.clone(),
            LinkValidator::new(&["https://src.example/".to_string()]),
        );
        let store = ObservationStore::new(db.clone());
        let extractor = Arc::new(ScriptedExtractor::default());
        let service = CrawlService::new(
            db,
            registry.clone(),
            store.clone(),
            extractor.clone(),
            PolitenessConfig::immediate(),
            &CrawlConfig::default(),
        );
        link(
            &registry,
            "A1",
            &[(1, "https://src.example/good/a1"), (2, "https://src.example/good/locked")],
        )
        .await;
        link(&registry, "B2", &[(3, "https://src.example/good/b3")]).await;

        assert!(service.start_manual(false, "alice").is_started());
        service.wait_idle().await;

        // The target after the rejected write was still visited and stored
        assert_eq!(extractor.visits.lock().unwrap().len(), 3);
        let status = service.status();
        assert_eq!(status.success_count, 2);
        assert_eq!(status.failed_count, 1);
        assert!(status.errors[0].contains("A1 slot 2"));
        assert_eq!(store.latest_active_prices("B2", false).await.len(), 1);

        let runs = service.recent_runs(1).await.unwrap();
        assert_eq!(runs[0].outcome, "completed");
        assert_eq!(runs[0].failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_refresh() {
        let (db, _tmp) = temp_db().await;
        let registry = LinkRegistry::new(
            db.clone(),
            LinkValidator::new(&["https://src.example/".to_string()]),
        );
        let store = ObservationStore::new(db.clone());
        let config = CrawlConfig {
            error_buffer: 10,
            edit_refresh_delay_secs: 3600,
        };
        let service = CrawlService::new(
            db,
            registry,
            store,
            Arc::new(ScriptedExtractor::default()),
            PolitenessConfig::immediate(),
            &config,
        );

        service.schedule_item_refresh("A1", &[Slot::new(1).unwrap()], "alice");
        service.schedule_item_refresh("A2", &[], "alice");

        assert_eq!(service.cancel_pending(), 1);
        assert_eq!(service.cancel_pending(), 0);
        assert!(!service.is_running());
    }
}
