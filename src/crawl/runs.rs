//! Persisted summary of finished crawl runs

use super::status::RunKind;
use crate::db::{format_timestamp, Database};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fmt;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every target in the snapshot was visited
    Completed,
    /// An internal error or panic stopped the run early
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the run log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CrawlRun {
    pub id: String,
    pub kind: String,
    pub started_by: String,
    pub started_at: String,
    pub finished_at: String,
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub outcome: String,
}

impl CrawlRun {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: &str,
        kind: RunKind,
        started_by: &str,
        started_at: DateTime<Utc>,
        total: usize,
        succeeded: usize,
        failed: usize,
        outcome: RunOutcome,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.as_str().to_string(),
            started_by: started_by.to_string(),
            started_at: format_timestamp(started_at),
            finished_at: format_timestamp(Utc::now()),
            total: total as i64,
            succeeded: succeeded as i64,
            failed: failed as i64,
            outcome: outcome.as_str().to_string(),
        }
    }
}

pub(crate) async fn record_run(db: &Database, run: &CrawlRun) -> Result<()> {
    let pool = db.pool();
    db.retry()
        .run("record crawl run", move || insert_run(pool, run))
        .await
}

async fn insert_run(pool: &SqlitePool, run: &CrawlRun) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO crawl_runs (id, kind, started_by, started_at, finished_at, total, succeeded, failed, outcome)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&run.id)
    .bind(&run.kind)
    .bind(&run.started_by)
    .bind(&run.started_at)
    .bind(&run.finished_at)
    .bind(run.total)
    .bind(run.succeeded)
    .bind(run.failed)
    .bind(&run.outcome)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent runs, newest first
pub async fn recent_runs(db: &Database, limit: usize) -> Result<Vec<CrawlRun>> {
    let runs = sqlx::query_as::<_, CrawlRun>(
        r#"
        SELECT id, kind, started_by, started_at, finished_at, total, succeeded, failed, outcome
        FROM crawl_runs
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(db.pool())
    .await?;
    Ok(runs)
}
