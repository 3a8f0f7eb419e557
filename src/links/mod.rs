//! Link registry
//!
//! Maps each catalog item to at most one active source URL per slot. A call
//! to [`LinkRegistry::set_links`] replaces the whole slot set within the
//! addressed range inside one transaction:
//! - blank URL or omitted slot: the slot is retired and its observations go `pasive`
//! - same URL as the active one: nothing happens
//! - new URL: the slot is upserted and its earlier observations go `pasive`

use crate::db::{now_timestamp, Database};
use crate::error::{Error, Result};
use crate::observations::mark_slot_pasive;
use crate::slot::Slot;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use url::Url;

/// A registered price source for one slot of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSource {
    pub item_key: String,
    pub slot: Slot,
    pub source_url: String,
    pub is_active: bool,
    pub created_at: String,
    pub created_by: String,
    pub updated_at: String,
    pub updated_by: String,
}

#[derive(Debug, FromRow)]
struct PriceSourceRow {
    item_key: String,
    slot: i64,
    source_url: String,
    is_active: bool,
    created_at: String,
    created_by: String,
    updated_at: String,
    updated_by: String,
}

impl TryFrom<PriceSourceRow> for PriceSource {
    type Error = Error;

    fn try_from(row: PriceSourceRow) -> Result<Self> {
        Ok(Self {
            item_key: row.item_key,
            slot: Slot::new(row.slot)?,
            source_url: row.source_url,
            is_active: row.is_active,
            created_at: row.created_at,
            created_by: row.created_by,
            updated_at: row.updated_at,
            updated_by: row.updated_by,
        })
    }
}

/// One (item, slot, url) triple the crawler visits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub item_key: String,
    pub slot: Slot,
    pub url: String,
}

#[derive(Debug, FromRow)]
struct LinkTargetRow {
    item_key: String,
    slot: i64,
    source_url: String,
}

impl TryFrom<LinkTargetRow> for LinkTarget {
    type Error = Error;

    fn try_from(row: LinkTargetRow) -> Result<Self> {
        Ok(Self {
            item_key: row.item_key,
            slot: Slot::new(row.slot)?,
            url: row.source_url,
        })
    }
}

/// What a `set_links` call changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkChangeSet {
    pub item_key: String,
    pub updated: Vec<Slot>,
    pub retired: Vec<Slot>,
    pub unchanged: Vec<Slot>,
    /// Submitted slots outside the addressed range; left untouched
    #[serde(default)]
    pub ignored: Vec<Slot>,
}

impl LinkChangeSet {
    pub fn is_noop(&self) -> bool {
        self.updated.is_empty() && self.retired.is_empty()
    }

    /// Human-readable summary
    pub fn message(&self) -> String {
        let join = |slots: &[Slot]| {
            slots
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut parts = Vec::new();
        if !self.updated.is_empty() {
            parts.push(format!("updated slot(s) {}", join(&self.updated)));
        }
        if !self.retired.is_empty() {
            parts.push(format!("retired slot(s) {}", join(&self.retired)));
        }
        if parts.is_empty() {
            parts.push("no changes".to_string());
        }
        if !self.ignored.is_empty() {
            parts.push(format!(
                "ignored slot(s) {} outside the addressed range",
                join(&self.ignored)
            ));
        }
        format!("Links for {}: {}", self.item_key, parts.join("; "))
    }
}

/// Active link totals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkCounts {
    pub items: usize,
    pub active_links: usize,
}

/// Accepts only URLs under the source's canonical prefixes
#[derive(Debug, Clone)]
pub struct LinkValidator {
    prefixes: Vec<String>,
}

impl LinkValidator {
    pub fn new(prefixes: &[String]) -> Self {
        Self {
            prefixes: prefixes
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_valid(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return false;
        }
        self.prefixes.iter().any(|prefix| url.starts_with(prefix.as_str()))
    }
}

/// Link registry handle
#[derive(Clone)]
pub struct LinkRegistry {
    db: Database,
    validator: LinkValidator,
}

impl LinkRegistry {
    pub fn new(db: Database, validator: LinkValidator) -> Self {
        Self { db, validator }
    }

    pub fn validator(&self) -> &LinkValidator {
        &self.validator
    }

    /// Active sources of an item, ordered by slot
    pub async fn get_links(&self, item_key: &str, include_reference: bool) -> Result<Vec<PriceSource>> {
        let min_slot = *Slot::range(include_reference).start();
        let rows = sqlx::query_as::<_, PriceSourceRow>(
            r#"
            SELECT item_key, slot, source_url, is_active, created_at, created_by, updated_at, updated_by
            FROM price_sources
            WHERE item_key = ? AND is_active = 1 AND slot >= ?
            ORDER BY slot
            "#,
        )
        .bind(item_key)
        .bind(i64::from(min_slot))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(PriceSource::try_from).collect()
    }

    /// Every active link, ordered by slot then item
    pub async fn get_all_active_links(&self, include_reference: bool) -> Result<Vec<LinkTarget>> {
        let min_slot = *Slot::range(include_reference).start();
        let rows = sqlx::query_as::<_, LinkTargetRow>(
            r#"
            SELECT item_key, slot, source_url
            FROM price_sources
            WHERE is_active = 1 AND slot >= ?
            ORDER BY slot, item_key
            "#,
        )
        .bind(i64::from(min_slot))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(LinkTarget::try_from).collect()
    }

    /// Active links of one item restricted to `slots`
    pub async fn get_item_targets(&self, item_key: &str, slots: &[Slot]) -> Result<Vec<LinkTarget>> {
        let links = self.get_links(item_key, true).await?;
        Ok(links
            .into_iter()
            .filter(|link| slots.contains(&link.slot))
            .map(|link| LinkTarget {
                item_key: link.item_key,
                slot: link.slot,
                url: link.source_url,
            })
            .collect())
    }

    /// Replace the item's slot set within the addressed range.
    ///
    /// `slots` maps raw slot numbers to URLs. Validation failures commit nothing.
    pub async fn set_links(
        &self,
        item_key: &str,
        slots: &BTreeMap<i64, String>,
        actor: &str,
        include_reference: bool,
    ) -> Result<LinkChangeSet> {
        let item_key = item_key.trim();
        if item_key.is_empty() {
            return Err(Error::Other("Item key must not be empty".to_string()));
        }

        let range = Slot::range(include_reference);
        let mut desired: BTreeMap<Slot, String> = BTreeMap::new();
        let mut ignored = Vec::new();
        for (raw, url) in slots {
            let slot = Slot::new(*raw)?;
            if !range.contains(&slot.number()) {
                warn!(item = item_key, slot = %slot, "Ignoring slot outside the addressed range");
                ignored.push(slot);
                continue;
            }
            let url = url.trim();
            if !url.is_empty() {
                desired.insert(slot, url.to_string());
            }
        }

        let invalid: Vec<String> = desired
            .values()
            .filter(|url| !self.validator.is_valid(url))
            .cloned()
            .collect();
        if !invalid.is_empty() {
            warn!(item = item_key, "Rejected invalid link(s): {}", invalid.join(", "));
            return Err(Error::InvalidLink(invalid));
        }

        let mut seen: HashMap<&str, Slot> = HashMap::new();
        for (slot, url) in &desired {
            if let Some(other) = seen.insert(url.as_str(), *slot) {
                warn!(item = item_key, url = %url, "Rejected link used in two slots");
                return Err(Error::SlotConflict {
                    url: url.clone(),
                    slot: slot.number(),
                    other_slot: other.number(),
                });
            }
        }

        let pool = self.db.pool();
        let desired = &desired;
        let mut changes = self
            .db
            .retry()
            .run("set_links", move || {
                apply_link_changes(pool, item_key, desired, actor, include_reference)
            })
            .await?;
        changes.ignored = ignored;

        if changes.is_noop() {
            debug!("{}", changes.message());
        } else {
            info!(actor = actor, "{}", changes.message());
        }
        Ok(changes)
    }

    /// Retire every slot of an item (the item left the catalog)
    pub async fn retire_item(&self, item_key: &str, actor: &str) -> Result<LinkChangeSet> {
        self.set_links(item_key, &BTreeMap::new(), actor, true).await
    }

    pub async fn counts(&self) -> Result<LinkCounts> {
        let (items, active_links): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(DISTINCT item_key), COUNT(*) FROM price_sources WHERE is_active = 1",
        )
        .fetch_one(self.db.pool())
        .await?;

        Ok(LinkCounts {
            items: items as usize,
            active_links: active_links as usize,
        })
    }
}

async fn apply_link_changes(
    pool: &SqlitePool,
    item_key: &str,
    desired: &BTreeMap<Slot, String>,
    actor: &str,
    include_reference: bool,
) -> Result<LinkChangeSet> {
    let mut tx = pool.begin().await?;

    let current: Vec<LinkTarget> = sqlx::query_as::<_, LinkTargetRow>(
        "SELECT item_key, slot, source_url FROM price_sources WHERE item_key = ? AND is_active = 1",
    )
    .bind(item_key)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(LinkTarget::try_from)
    .collect::<Result<_>>()?;

    // Slots outside the addressed range keep their links; a new URL may not collide with them.
    let range = Slot::range(include_reference);
    for kept in current.iter().filter(|t| !range.contains(&t.slot.number())) {
        if let Some((slot, url)) = desired.iter().find(|(_, url)| **url == kept.url) {
            warn!(item = item_key, url = %url, "Rejected link already active in slot {}", kept.slot);
            return Err(Error::SlotConflict {
                url: url.clone(),
                slot: slot.number(),
                other_slot: kept.slot.number(),
            });
        }
    }

    let now = now_timestamp();
    let mut changes = LinkChangeSet {
        item_key: item_key.to_string(),
        ..Default::default()
    };

    for slot in Slot::all(include_reference) {
        let active = current.iter().find(|t| t.slot == slot).map(|t| t.url.as_str());

        match (desired.get(&slot), active) {
            (None, None) => {}
            (None, Some(_)) => {
                sqlx::query(
                    "UPDATE price_sources SET is_active = 0, updated_at = ?, updated_by = ? WHERE item_key = ? AND slot = ?",
                )
                .bind(&now)
                .bind(actor)
                .bind(item_key)
                .bind(i64::from(slot))
                .execute(&mut *tx)
                .await?;
                mark_slot_pasive(&mut tx, item_key, slot).await?;
                changes.retired.push(slot);
            }
            (Some(url), Some(active_url)) if url == active_url => {
                changes.unchanged.push(slot);
            }
            (Some(url), _) => {
                sqlx::query(
                    r#"
                    INSERT INTO price_sources (item_key, slot, source_url, is_active, created_at, created_by, updated_at, updated_by)
                    VALUES (?, ?, ?, 1, ?, ?, ?, ?)
                    ON CONFLICT(item_key, slot) DO UPDATE SET
                        source_url = excluded.source_url,
                        is_active = 1,
                        updated_at = excluded.updated_at,
                        updated_by = excluded.updated_by
                    "#,
                )
                .bind(item_key)
                .bind(i64::from(slot))
                .bind(url)
                .bind(&now)
                .bind(actor)
                .bind(&now)
                .bind(actor)
                .execute(&mut *tx)
                .await?;
                mark_slot_pasive(&mut tx, item_key, slot).await?;
                changes.updated.push(slot);
            }
        }
    }

    tx.commit().await?;
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::temp_db;
    use crate::observations::{NewObservation, ObservationStore};
    use tempfile::TempDir;

    async fn setup() -> (LinkRegistry, ObservationStore, TempDir) {
        let (db, tmp) = temp_db().await;
        let validator = LinkValidator::new(&["https://src.example/".to_string()]);
        (
            LinkRegistry::new(db.clone(), validator),
            ObservationStore::new(db),
            tmp,
        )
    }

    fn slots(entries: &[(i64, &str)]) -> BTreeMap<i64, String> {
        entries
            .iter()
            .map(|(slot, url)| (*slot, url.to_string()))
            .collect()
    }

    async fn record(store: &ObservationStore, slot: i64, url: &str, price: f64) {
        store
            .append(&NewObservation {
                item_key: "A123".to_string(),
                slot,
                source_url: url.to_string(),
                title: Some("Widget".to_string()),
                price: Some(price),
                seller_name: Some("Shop".to_string()),
                scraped_by: "test".to_string(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_validator() {
        let validator = LinkValidator::new(&["https://src.example/".to_string()]);
        assert!(validator.is_valid("https://src.example/p/1"));
        assert!(!validator.is_valid("https://other.example/p/1"));
        assert!(!validator.is_valid("src.example/p/1"));
        assert!(!validator.is_valid("ftp://src.example/p/1"));
    }

    #[tokio::test]
    async fn test_first_link_for_item() {
        let (registry, _store, _tmp) = setup().await;

        assert!(registry.get_links("A123", true).await.unwrap().is_empty());

        let changes = registry
            .set_links("A123", &slots(&[(1, "https://src.example/p/1")]), "alice", false)
            .await
            .unwrap();
        assert_eq!(changes.updated, vec![Slot::new(1).unwrap()]);

        let links = registry.get_links("A123", true).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].slot.number(), 1);
        assert!(links[0].is_active);
        assert_eq!(links[0].created_by, "alice");
    }

    #[tokio::test]
    async fn test_url_change_replaces_active_link() {
        let (registry, _store, _tmp) = setup().await;

        registry
            .set_links("A123", &slots(&[(1, "https://src.example/p/1")]), "alice", false)
            .await
            .unwrap();
        registry
            .set_links("A123", &slots(&[(1, "https://src.example/p/2")]), "alice", false)
            .await
            .unwrap();

        let links = registry.get_links("A123", true).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].source_url, "https://src.example/p/2");

        let rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM price_sources WHERE item_key = 'A123' AND slot = 1 AND is_active = 1",
        )
        .fetch_one(registry.db.pool())
        .await
        .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_same_url_is_noop() {
        let (registry, _store, _tmp) = setup().await;
        let input = slots(&[(1, "https://src.example/p/1")]);

        registry.set_links("A123", &input, "alice", false).await.unwrap();
        let changes = registry.set_links("A123", &input, "bob", false).await.unwrap();

        assert!(changes.is_noop());
        assert_eq!(changes.unchanged, vec![Slot::new(1).unwrap()]);
        let links = registry.get_links("A123", false).await.unwrap();
        assert_eq!(links[0].updated_by, "alice");
    }

    #[tokio::test]
    async fn test_invalid_link_commits_nothing() {
        let (registry, _store, _tmp) = setup().await;
        registry
            .set_links("A123", &slots(&[(1, "https://src.example/p/1")]), "alice", false)
            .await
            .unwrap();

        let result = registry
            .set_links(
                "A123",
                &slots(&[(1, "https://src.example/p/9"), (2, "https://evil.example/x")]),
                "alice",
                false,
            )
            .await;

        match result {
            Err(Error::InvalidLink(urls)) => assert_eq!(urls, vec!["https://evil.example/x"]),
            other => panic!("expected InvalidLink, got {:?}", other),
        }
        let links = registry.get_links("A123", true).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].source_url, "https://src.example/p/1");
    }

    #[tokio::test]
    async fn test_duplicate_url_across_slots_is_rejected() {
        let (registry, _store, _tmp) = setup().await;

        let result = registry
            .set_links(
                "A123",
                &slots(&[(1, "https://src.example/p/1"), (3, "https://src.example/p/1")]),
                "alice",
                false,
            )
            .await;

        assert!(matches!(result, Err(Error::SlotConflict { slot: 3, other_slot: 1, .. })));
        assert!(registry.get_links("A123", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_with_reference_slot_outside_range() {
        let (registry, _store, _tmp) = setup().await;
        registry
            .set_links("A123", &slots(&[(0, "https://src.example/own")]), "alice", true)
            .await
            .unwrap();

        let result = registry
            .set_links("A123", &slots(&[(2, "https://src.example/own")]), "alice", false)
            .await;

        assert!(matches!(result, Err(Error::SlotConflict { slot: 2, other_slot: 0, .. })));
        let links = registry.get_links("A123", true).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].slot, Slot::REFERENCE);
    }

    #[tokio::test]
    async fn test_same_url_on_different_items_is_allowed() {
        let (registry, _store, _tmp) = setup().await;
        let input = slots(&[(1, "https://src.example/p/1")]);

        registry.set_links("A123", &input, "alice", false).await.unwrap();
        registry.set_links("B456", &input, "alice", false).await.unwrap();

        assert_eq!(registry.get_all_active_links(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_omitted_slots_are_retired() {
        let (registry, _store, _tmp) = setup().await;
        registry
            .set_links(
                "A123",
                &slots(&[
                    (0, "https://src.example/own"),
                    (1, "https://src.example/p/1"),
                    (2, "https://src.example/p/2"),
                ]),
                "alice",
                true,
            )
            .await
            .unwrap();

        // Slot 2 omitted, slot 1 blank, slot 0 outside the addressed range
        let changes = registry
            .set_links("A123", &slots(&[(1, "  ")]), "bob", false)
            .await
            .unwrap();

        assert_eq!(
            changes.retired,
            vec![Slot::new(1).unwrap(), Slot::new(2).unwrap()]
        );
        let links = registry.get_links("A123", true).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].slot, Slot::REFERENCE);
        assert!(registry.get_links("A123", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_slot_is_rejected() {
        let (registry, _store, _tmp) = setup().await;
        let result = registry
            .set_links("A123", &slots(&[(6, "https://src.example/p/1")]), "alice", true)
            .await;
        assert!(matches!(result, Err(Error::InvalidSlot(6))));
    }

    #[tokio::test]
    async fn test_reference_slot_without_flag_is_reported_as_ignored() {
        let (registry, _store, _tmp) = setup().await;
        let changes = registry
            .set_links(
                "A123",
                &slots(&[(0, "https://src.example/own"), (1, "https://src.example/p/1")]),
                "alice",
                false,
            )
            .await
            .unwrap();

        assert_eq!(changes.updated, vec![Slot::new(1).unwrap()]);
        assert_eq!(changes.ignored, vec![Slot::REFERENCE]);
        assert!(changes.message().contains("ignored slot(s) 0"));
        assert!(registry.get_links("A123", true).await.unwrap().iter().all(|l| l.slot != Slot::REFERENCE));

        let only_reference = registry
            .set_links("A123", &slots(&[(0, "https://src.example/own"), (1, "https://src.example/p/1")]), "alice", false)
            .await
            .unwrap();
        assert!(only_reference.is_noop());
        assert!(only_reference.message().contains("no changes"));
        assert_eq!(only_reference.ignored, vec![Slot::REFERENCE]);
    }

    #[tokio::test]
    async fn test_url_change_invalidates_previous_observations() {
        let (registry, store, _tmp) = setup().await;
        registry
            .set_links("A123", &slots(&[(1, "https://src.example/p/1")]), "alice", false)
            .await
            .unwrap();
        record(&store, 1, "https://src.example/p/1", 10.0).await;
        assert_eq!(store.latest_active_prices("A123", false).await.len(), 1);

        registry
            .set_links("A123", &slots(&[(1, "https://src.example/p/2")]), "alice", false)
            .await
            .unwrap();

        assert!(store.latest_active_prices("A123", false).await.is_empty());
        assert_eq!(store.stats().await.unwrap().pasive, 1);
    }

    #[tokio::test]
    async fn test_retire_item_keeps_history() {
        let (registry, store, _tmp) = setup().await;
        registry
            .set_links("A123", &slots(&[(1, "https://src.example/p/1")]), "alice", false)
            .await
            .unwrap();
        record(&store, 1, "https://src.example/p/1", 10.0).await;

        let changes = registry.retire_item("A123", "alice").await.unwrap();
        assert_eq!(changes.retired, vec![Slot::new(1).unwrap()]);
        assert!(registry.get_links("A123", true).await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().total, 1);

        let counts = registry.counts().await.unwrap();
        assert_eq!(counts.active_links, 0);
    }

    #[tokio::test]
    async fn test_active_links_ordered_by_slot_then_item() {
        let (registry, _store, _tmp) = setup().await;
        registry
            .set_links(
                "B2",
                &slots(&[(0, "https://src.example/b0"), (2, "https://src.example/b2")]),
                "alice",
                true,
            )
            .await
            .unwrap();
        registry
            .set_links("A1", &slots(&[(2, "https://src.example/a2")]), "alice", false)
            .await
            .unwrap();

        let all = registry.get_all_active_links(true).await.unwrap();
        let order: Vec<(u8, &str)> = all
            .iter()
            .map(|t| (t.slot.number(), t.item_key.as_str()))
            .collect();
        assert_eq!(order, vec![(0, "B2"), (2, "A1"), (2, "B2")]);

        let competitors = registry.get_all_active_links(false).await.unwrap();
        assert!(competitors.iter().all(|t| t.slot != Slot::REFERENCE));
    }
}
