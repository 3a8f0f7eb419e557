//! Wiring of the registry, store, orchestrator and scheduler into one service

use crate::config::Config;
use crate::crawl::CrawlService;
use crate::db::Database;
use crate::error::Result;
use crate::extract::{Extractor, HtmlExtractor};
use crate::links::{LinkChangeSet, LinkRegistry, LinkValidator};
use crate::observations::ObservationStore;
use crate::schedule::{ScheduleConfigStore, Scheduler};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Every component of the price tracker, sharing one database
#[derive(Clone)]
pub struct PriceTracker {
    config: Config,
    db: Database,
    registry: LinkRegistry,
    observations: ObservationStore,
    crawl: CrawlService,
    scheduler: Scheduler,
    schedule_settings: ScheduleConfigStore,
}

impl PriceTracker {
    /// Build the tracker with the HTML extractor described by `config`
    pub async fn open(config: Config) -> Result<Self> {
        let extractor = Arc::new(HtmlExtractor::from_config(&config)?);
        Self::with_extractor(config, extractor).await
    }

    pub async fn with_extractor(config: Config, extractor: Arc<dyn Extractor>) -> Result<Self> {
        let db = Database::connect(&config).await?;
        let registry = LinkRegistry::new(
            db.clone(),
            LinkValidator::new(&config.source.link_prefixes),
        );
        let observations = ObservationStore::with_time_zone(db.clone(), config.schedule.tz()?);
        let crawl = CrawlService::new(
            db.clone(),
            registry.clone(),
            observations.clone(),
            extractor,
            config.politeness.clone(),
            &config.crawl,
        );
        let schedule_settings = ScheduleConfigStore::new(db.clone());
        let scheduler = Scheduler::new(crawl.clone(), schedule_settings.clone(), &config.schedule)?;

        Ok(Self {
            config,
            db,
            registry,
            observations,
            crawl,
            scheduler,
            schedule_settings,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    pub fn observations(&self) -> &ObservationStore {
        &self.observations
    }

    pub fn crawl(&self) -> &CrawlService {
        &self.crawl
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn schedule_settings(&self) -> &ScheduleConfigStore {
        &self.schedule_settings
    }

    /// Replace an item's links and optionally arm a refresh of the changed slots
    pub async fn update_links(
        &self,
        item_key: &str,
        slots: &BTreeMap<i64, String>,
        actor: &str,
        include_reference: bool,
        refresh: bool,
    ) -> Result<LinkChangeSet> {
        let changes = self
            .registry
            .set_links(item_key, slots, actor, include_reference)
            .await?;
        if refresh {
            self.crawl
                .schedule_item_refresh(&changes.item_key, &changes.updated, actor);
        }
        Ok(changes)
    }

    /// Stop background work and close the pool
    pub async fn close(&self) {
        self.scheduler.shutdown();
        self.db.close().await;
    }
}
