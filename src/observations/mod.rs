//! Observation store
//!
//! Append-only price records. Rows are never updated except for the
//! `active` -> `pasive` flip when their slot's URL changes, and never deleted
//! except by the retention purge. Reads do not retry: a failed query logs an
//! error and returns an empty result.

use crate::db::{format_timestamp, parse_timestamp, Database};
use crate::error::Result;
use crate::slot::Slot;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// Input for [`ObservationStore::append`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObservation {
    pub item_key: String,
    /// Raw slot number, validated on append
    pub slot: i64,
    pub source_url: String,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub seller_name: Option<String>,
    pub scraped_by: String,
}

/// Most recent active observation of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPrice {
    pub slot: Slot,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub seller_name: Option<String>,
    pub scraped_at: String,
    pub url: String,
}

/// Last observation of one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub price: Option<f64>,
    pub title: Option<String>,
    pub seller_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationStats {
    pub total: u64,
    pub active: u64,
    pub pasive: u64,
}

#[derive(Debug, FromRow)]
struct LatestRow {
    slot: i64,
    title: Option<String>,
    price: Option<f64>,
    seller_name: Option<String>,
    scraped_at: String,
    source_url: String,
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    scraped_at: String,
    price: Option<f64>,
    title: Option<String>,
    seller_name: Option<String>,
}

/// Flip every `active` observation of one slot to `pasive`.
///
/// Runs on the caller's connection so it joins the caller's transaction.
pub(crate) async fn mark_slot_pasive(
    conn: &mut SqliteConnection,
    item_key: &str,
    slot: Slot,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE observations SET status = 'pasive' WHERE item_key = ? AND slot = ? AND status = 'active'",
    )
    .bind(item_key)
    .bind(i64::from(slot))
    .execute(conn)
    .await?;

    if result.rows_affected() > 0 {
        debug!(
            item = item_key,
            slot = %slot,
            "Marked {} observation(s) pasive",
            result.rows_affected()
        );
    }
    Ok(result.rows_affected())
}

/// Observation store handle
#[derive(Clone)]
pub struct ObservationStore {
    db: Database,
    tz: Tz,
}

impl ObservationStore {
    /// Store that buckets history days in UTC
    pub fn new(db: Database) -> Self {
        Self::with_time_zone(db, Tz::UTC)
    }

    pub fn with_time_zone(db: Database, tz: Tz) -> Self {
        Self { db, tz }
    }

    /// Append one observation with status `active`
    pub async fn append(&self, obs: &NewObservation) -> Result<i64> {
        self.append_at(obs, Utc::now()).await
    }

    async fn append_at(&self, obs: &NewObservation, scraped_at: DateTime<Utc>) -> Result<i64> {
        let slot = Slot::new(obs.slot)?;
        let pool = self.db.pool();
        let scraped_at = format_timestamp(scraped_at);
        let scraped_at = scraped_at.as_str();

        let id = self
            .db
            .retry()
            .run("append observation", move || {
                insert_observation(pool, obs, slot, scraped_at)
            })
            .await?;

        debug!(
            item = %obs.item_key,
            slot = %slot,
            price = ?obs.price,
            "Recorded observation {}",
            id
        );
        Ok(id)
    }

    /// Most recent active observation per slot whose link is still active.
    ///
    /// Only rows scraped from the slot's current URL count, so a run that
    /// started before a link edit cannot resurface the old listing.
    pub async fn latest_active_prices(&self, item_key: &str, exclude_reference: bool) -> Vec<LatestPrice> {
        let min_slot = *Slot::range(!exclude_reference).start();
        let rows = sqlx::query_as::<_, LatestRow>(
            r#"
            SELECT o.slot, o.title, o.price, o.seller_name, o.scraped_at, o.source_url
            FROM observations o
            JOIN price_sources s
              ON s.item_key = o.item_key AND s.slot = o.slot AND s.is_active = 1
             AND s.source_url = o.source_url
            WHERE o.item_key = ? AND o.status = 'active' AND o.slot >= ?
              AND o.id = (
                SELECT o2.id FROM observations o2
                WHERE o2.item_key = o.item_key AND o2.slot = o.slot AND o2.status = 'active'
                  AND o2.source_url = s.source_url
                ORDER BY o2.scraped_at DESC, o2.id DESC
                LIMIT 1
              )
            ORDER BY o.slot
            "#,
        )
        .bind(item_key)
        .bind(i64::from(min_slot))
        .fetch_all(self.db.pool())
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                error!(item = item_key, "Failed to read latest prices: {}", e);
                return Vec::new();
            }
        };

        rows.into_iter()
            .filter_map(|row| {
                let slot = Slot::new(row.slot).ok()?;
                Some(LatestPrice {
                    slot,
                    title: row.title,
                    price: row.price,
                    seller_name: row.seller_name,
                    scraped_at: row.scraped_at,
                    url: row.source_url,
                })
            })
            .collect()
    }

    /// One entry per calendar day over the trailing `days` window, oldest first
    pub async fn history(&self, item_key: &str, slot: Slot, days: u32) -> Vec<HistoryPoint> {
        self.history_as_of(item_key, slot, days, Utc::now()).await
    }

    /// [`history`](Self::history) with an explicit "now"
    pub async fn history_as_of(
        &self,
        item_key: &str,
        slot: Slot,
        days: u32,
        now: DateTime<Utc>,
    ) -> Vec<HistoryPoint> {
        if days == 0 {
            return Vec::new();
        }

        let today = now.with_timezone(&self.tz).date_naive();
        let first_day = today - Duration::days(i64::from(days) - 1);
        let since = match first_day
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| self.tz.from_local_datetime(&midnight).earliest())
        {
            Some(start) => start.with_timezone(&Utc),
            None => {
                error!("Cannot resolve the start of {} in {}", first_day, self.tz);
                return Vec::new();
            }
        };

        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT scraped_at, price, title, seller_name
            FROM observations
            WHERE item_key = ? AND slot = ? AND status = 'active' AND scraped_at >= ?
            ORDER BY scraped_at, id
            "#,
        )
        .bind(item_key)
        .bind(i64::from(slot))
        .bind(format_timestamp(since))
        .fetch_all(self.db.pool())
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                error!(item = item_key, slot = %slot, "Failed to read price history: {}", e);
                return Vec::new();
            }
        };

        // Rows arrive in time order, so the last insert per day wins
        let mut by_day: BTreeMap<NaiveDate, HistoryPoint> = BTreeMap::new();
        for row in rows {
            let Some(ts) = parse_timestamp(&row.scraped_at) else {
                continue;
            };
            let date = ts.with_timezone(&self.tz).date_naive();
            if date < first_day || date > today {
                continue;
            }
            by_day.insert(
                date,
                HistoryPoint {
                    date,
                    price: row.price,
                    title: row.title,
                    seller_name: row.seller_name,
                },
            );
        }

        by_day.into_values().collect()
    }

    /// Hard-delete observations older than `days` days
    pub async fn purge_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = format_timestamp(Utc::now() - Duration::days(i64::from(days)));
        let pool = self.db.pool();
        let cutoff = cutoff.as_str();

        let deleted = self
            .db
            .retry()
            .run("purge observations", move || delete_before(pool, cutoff))
            .await?;

        info!("Purged {} observation(s) older than {} days", deleted, days);
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<ObservationStats> {
        let (total, active): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0) FROM observations",
        )
        .fetch_one(self.db.pool())
        .await?;

        Ok(ObservationStats {
            total: total as u64,
            active: active as u64,
            pasive: (total - active) as u64,
        })
    }
}

async fn insert_observation(
    pool: &SqlitePool,
    obs: &NewObservation,
    slot: Slot,
    scraped_at: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO observations (item_key, slot, source_url, scraped_at, scraped_by, title, price, seller_name, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active')
        "#,
    )
    .bind(&obs.item_key)
    .bind(i64::from(slot))
    .bind(&obs.source_url)
    .bind(scraped_at)
    .bind(&obs.scraped_by)
    .bind(&obs.title)
    .bind(obs.price)
    .bind(&obs.seller_name)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn delete_before(pool: &SqlitePool, cutoff: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM observations WHERE scraped_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
