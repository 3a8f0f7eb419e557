//! SQLite schema definition

/// SQL schema for the price tracking database
pub const SCHEMA_SQL: &str = r#"
-- Price sources: one row per (item, slot); retirement flips is_active
CREATE TABLE IF NOT EXISTS price_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_key TEXT NOT NULL,
    slot INTEGER NOT NULL CHECK (slot BETWEEN 0 AND 5),
    source_url TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    UNIQUE(item_key, slot)
);

-- Observations: append-only scraped prices
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_key TEXT NOT NULL,
    slot INTEGER NOT NULL CHECK (slot BETWEEN 0 AND 5),
    source_url TEXT NOT NULL,
    scraped_at TEXT NOT NULL,
    scraped_by TEXT NOT NULL,
    title TEXT,
    price REAL,
    seller_name TEXT,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'pasive'))
);

-- Schedule configuration: process-wide key/value settings
CREATE TABLE IF NOT EXISTS schedule_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    updated_by TEXT NOT NULL
);

-- Crawl runs: one summary row per finished run
CREATE TABLE IF NOT EXISTS crawl_runs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    started_by TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    total INTEGER NOT NULL DEFAULT 0,
    succeeded INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    outcome TEXT NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_sources_item ON price_sources(item_key);
CREATE INDEX IF NOT EXISTS idx_sources_active ON price_sources(is_active);
CREATE INDEX IF NOT EXISTS idx_obs_item ON observations(item_key);
CREATE INDEX IF NOT EXISTS idx_obs_slot ON observations(slot);
CREATE INDEX IF NOT EXISTS idx_obs_status ON observations(status);
CREATE INDEX IF NOT EXISTS idx_obs_scraped ON observations(scraped_at);
CREATE INDEX IF NOT EXISTS idx_runs_started ON crawl_runs(started_at);
"#;
