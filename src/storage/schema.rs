//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Feed-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Posts pulled from remote accounts; classification is NULL until classified
CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    platform TEXT NOT NULL,
    account_id TEXT NOT NULL,
    account_url TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    description TEXT,
    post_url TEXT NOT NULL,
    author_name TEXT,
    username TEXT,
    profile_picture TEXT,
    media TEXT NOT NULL DEFAULT '[]',
    classification INTEGER,
    inserted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_account ON posts(account_url);
CREATE INDEX IF NOT EXISTS idx_posts_classification ON posts(classification);

-- Events extracted from matched posts
CREATE TABLE IF NOT EXISTS post_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
    theme TEXT,
    date TEXT,
    event_time INTEGER,
    venue TEXT,
    location TEXT,
    speaker TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_post_events_post ON post_events(post_id);

-- Per-account extraction cursor
CREATE TABLE IF NOT EXISTS watermarks (
    account_url TEXT PRIMARY KEY,
    last_seen_item_id TEXT,
    last_seen_creation_time INTEGER,
    last_successful_item_id TEXT,
    last_successful_creation_time INTEGER,
    updated_at TEXT NOT NULL
);

-- Retry ledger, keyed by scope (server id + job) and item key
CREATE TABLE IF NOT EXISTS retry_entries (
    scope TEXT NOT NULL,
    item_key TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    last_error TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (scope, item_key)
);

-- One rate-limit reset per credential
CREATE TABLE IF NOT EXISTS rate_limits (
    credential_id TEXT PRIMARY KEY,
    reset_at INTEGER NOT NULL,
    rate_limit INTEGER,
    remaining INTEGER
);

-- Sync cycle history
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    items_total INTEGER NOT NULL DEFAULT 0,
    items_failed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_job ON sync_runs(job);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
