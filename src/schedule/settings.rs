//! Persisted schedule settings (the `schedule_config` key/value table)

use super::{format_run_time, parse_run_time};
use crate::db::{now_timestamp, Database};
use crate::error::{Error, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{info, warn};

const KEY_RUN_TIME: &str = "daily_run_time";
const KEY_INCLUDE_REFERENCE: &str = "include_reference_slot";
const KEY_ENABLED: &str = "scheduler_enabled";

/// Daily schedule as an operator configured it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub run_time: NaiveTime,
    pub include_reference: bool,
    pub enabled: bool,
}

impl ScheduleSettings {
    pub fn new(run_time: NaiveTime, include_reference: bool) -> Self {
        Self {
            run_time,
            include_reference,
            enabled: true,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Reads and writes [`ScheduleSettings`]
#[derive(Clone)]
pub struct ScheduleConfigStore {
    db: Database,
}

impl ScheduleConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persisted settings, or `None` if no run time was ever saved
    pub async fn load(&self) -> Result<Option<ScheduleSettings>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM schedule_config")
            .fetch_all(self.db.pool())
            .await?;
        let values: HashMap<String, String> = rows.into_iter().collect();

        let Some(raw_time) = values.get(KEY_RUN_TIME) else {
            return Ok(None);
        };
        let run_time = parse_run_time(raw_time)?;

        let read_flag = |key: &str, default: bool| match values.get(key) {
            None => default,
            Some(raw) => parse_flag(raw).unwrap_or_else(|| {
                warn!("Ignoring malformed schedule setting {} = {:?}", key, raw);
                default
            }),
        };

        Ok(Some(ScheduleSettings {
            run_time,
            include_reference: read_flag(KEY_INCLUDE_REFERENCE, false),
            enabled: read_flag(KEY_ENABLED, true),
        }))
    }

    /// Persist all settings in one transaction
    pub async fn save(&self, settings: &ScheduleSettings, actor: &str) -> Result<()> {
        let run_time = format_run_time(settings.run_time);
        let entries = [
            (KEY_RUN_TIME, run_time.as_str()),
            (KEY_INCLUDE_REFERENCE, flag(settings.include_reference)),
            (KEY_ENABLED, flag(settings.enabled)),
        ];
        let pool = self.db.pool();
        let entries = &entries;

        self.db
            .retry()
            .run("save schedule", move || upsert_entries(pool, entries, actor))
            .await?;

        info!(
            actor = actor,
            "Schedule saved: {} (reference slot {}, {})",
            run_time,
            if settings.include_reference { "included" } else { "excluded" },
            if settings.enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Flip the enabled flag, keeping the stored run time
    pub async fn set_enabled(&self, enabled: bool, actor: &str) -> Result<ScheduleSettings> {
        let mut settings = self
            .load()
            .await?
            .ok_or_else(|| Error::Other("No schedule has been configured yet".to_string()))?;
        settings.enabled = enabled;
        self.save(&settings, actor).await?;
        Ok(settings)
    }
}

async fn upsert_entries(pool: &SqlitePool, entries: &[(&str, &str)], actor: &str) -> Result<()> {
    let now = now_timestamp();
    let mut tx = pool.begin().await?;
    for (key, value) in entries {
        sqlx::query(
            r#"
            INSERT INTO schedule_config (key, value, updated_at, updated_by)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
            "#,
        )
        .bind(*key)
        .bind(*value)
        .bind(&now)
        .bind(actor)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
