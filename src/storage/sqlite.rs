//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::model::{ClassificationOutcome, MediaItem, Post};
use crate::state::{CycleState, Watermark};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{ClassificationCounts, RateLimitState, RetryEntry, RunRecord};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const POST_COLUMNS: &str = "id, platform, account_id, account_url, created_at, description,
     post_url, author_name, username, profile_picture, media";

const RUN_COLUMNS: &str =
    "id, job, started_at, finished_at, config_hash, status, items_total, items_failed";

/// SQLite storage backend
///
/// The connection sits behind a mutex so the backend can be shared between
/// concurrently running workers.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Maps a post row; the media column is returned raw and decoded by the caller
fn post_from_row(row: &Row<'_>) -> rusqlite::Result<(Post, String)> {
    let post = Post {
        id: row.get(0)?,
        platform: row.get(1)?,
        account_id: row.get(2)?,
        account_url: row.get(3)?,
        created_at: row.get(4)?,
        description: row.get(5)?,
        post_url: row.get(6)?,
        author_name: row.get(7)?,
        username: row.get(8)?,
        profile_picture: row.get(9)?,
        media: Vec::new(),
    };
    Ok((post, row.get(10)?))
}

fn attach_media((mut post, media): (Post, String)) -> StorageResult<Post> {
    post.media = serde_json::from_str::<Vec<MediaItem>>(&media)?;
    Ok(post)
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        job: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: CycleState::from_db_string(&row.get::<_, String>(5)?)
            .unwrap_or(CycleState::Running),
        items_total: row.get::<_, i64>(6)? as u64,
        items_failed: row.get::<_, i64>(7)? as u64,
    })
}

impl Storage for SqliteStorage {
    // ===== Posts =====

    fn upsert_posts(&self, posts: &[Post]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO posts (id, platform, account_id, account_url, created_at, description,
                 post_url, author_name, username, profile_picture, media, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO NOTHING",
            )?;

            for post in posts {
                let media = serde_json::to_string(&post.media)?;
                inserted += stmt.execute(params![
                    post.id,
                    post.platform,
                    post.account_id,
                    post.account_url,
                    post.created_at,
                    post.description,
                    post.post_url,
                    post.author_name,
                    post.username,
                    post.profile_picture,
                    media,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn get_post(&self, post_id: &str) -> StorageResult<Option<Post>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
                params![post_id],
                post_from_row,
            )
            .optional()?;

        row.map(attach_media).transpose()
    }

    fn count_posts(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn pending_classification(&self) -> StorageResult<Vec<Post>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM posts WHERE classification IS NULL ORDER BY created_at ASC, id ASC",
            POST_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], post_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(attach_media).collect()
    }

    fn record_classification(
        &self,
        post_id: &str,
        outcome: &ClassificationOutcome,
    ) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let updated = tx.execute(
            "UPDATE posts SET classification = ?1 WHERE id = ?2",
            params![outcome.is_match(), post_id],
        )?;
        if updated == 0 {
            return Err(StorageError::PostNotFound(post_id.to_string()));
        }

        if let ClassificationOutcome::Matched(events) = outcome {
            let mut stmt = tx.prepare(
                "INSERT INTO post_events (post_id, theme, date, event_time, venue, location, speaker, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for event in events {
                stmt.execute(params![
                    post_id,
                    event.theme,
                    event.date,
                    event.event_time(),
                    event.venue,
                    event.location,
                    event.speaker,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn classification_counts(&self) -> StorageResult<ClassificationCounts> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT classification, COUNT(*) FROM posts GROUP BY classification")?;

        let mut counts = ClassificationCounts::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Option<bool>>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (classification, count) = row?;
            match classification {
                None => counts.pending = count as u64,
                Some(true) => counts.matched = count as u64,
                Some(false) => counts.not_matched = count as u64,
            }
        }

        Ok(counts)
    }

    fn count_events(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM post_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Watermarks =====

    fn get_watermark(&self, account_url: &str) -> StorageResult<Option<Watermark>> {
        let conn = self.conn()?;
        let watermark = conn
            .query_row(
                "SELECT account_url, last_seen_item_id, last_seen_creation_time,
                 last_successful_item_id, last_successful_creation_time
                 FROM watermarks WHERE account_url = ?1",
                params![account_url],
                |row| {
                    Ok(Watermark {
                        account_url: row.get(0)?,
                        last_seen_item_id: row.get(1)?,
                        last_seen_creation_time: row.get(2)?,
                        last_successful_item_id: row.get(3)?,
                        last_successful_creation_time: row.get(4)?,
                    })
                },
            )
            .optional()?;

        Ok(watermark)
    }

    fn put_watermark(&self, watermark: &Watermark) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO watermarks (account_url, last_seen_item_id, last_seen_creation_time,
             last_successful_item_id, last_successful_creation_time, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(account_url) DO UPDATE SET
                last_seen_item_id = excluded.last_seen_item_id,
                last_seen_creation_time = excluded.last_seen_creation_time,
                last_successful_item_id = excluded.last_successful_item_id,
                last_successful_creation_time = excluded.last_successful_creation_time,
                updated_at = excluded.updated_at",
            params![
                watermark.account_url,
                watermark.last_seen_item_id,
                watermark.last_seen_creation_time,
                watermark.last_successful_item_id,
                watermark.last_successful_creation_time,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn count_watermarks(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM watermarks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Retry Ledger =====

    fn get_retry_entry(&self, scope: &str, item_key: &str) -> StorageResult<Option<RetryEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                "SELECT scope, item_key, retry_count, last_error, updated_at
                 FROM retry_entries WHERE scope = ?1 AND item_key = ?2",
                params![scope, item_key],
                |row| {
                    Ok(RetryEntry {
                        scope: row.get(0)?,
                        item_key: row.get(1)?,
                        retry_count: row.get(2)?,
                        last_error: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        Ok(entry)
    }

    fn upsert_increment_retry(
        &self,
        scope: &str,
        item_key: &str,
        last_error: Option<&str>,
    ) -> StorageResult<u32> {
        let conn = self.conn()?;
        let count: u32 = conn.query_row(
            "INSERT INTO retry_entries (scope, item_key, retry_count, last_error, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(scope, item_key) DO UPDATE SET
                retry_count = retry_count + 1,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
             RETURNING retry_count",
            params![scope, item_key, last_error, Utc::now().to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn delete_retry_entry(&self, scope: &str, item_key: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM retry_entries WHERE scope = ?1 AND item_key = ?2",
            params![scope, item_key],
        )?;
        Ok(())
    }

    fn clear_retry_scope(&self, scope: &str) -> StorageResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM retry_entries WHERE scope = ?1", params![scope])?;
        Ok(removed)
    }

    // ===== Rate Limits =====

    fn get_rate_limit(&self, credential_id: &str) -> StorageResult<Option<RateLimitState>> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT credential_id, reset_at, rate_limit, remaining
                 FROM rate_limits WHERE credential_id = ?1",
                params![credential_id],
                |row| {
                    Ok(RateLimitState {
                        credential_id: row.get(0)?,
                        reset_at: row.get(1)?,
                        limit: row.get(2)?,
                        remaining: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(state)
    }

    fn put_rate_limit(&self, state: &RateLimitState) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO rate_limits (credential_id, reset_at, rate_limit, remaining)
             VALUES (?1, ?2, ?3, ?4)",
            params![state.credential_id, state.reset_at, state.limit, state.remaining],
        )?;
        Ok(())
    }

    fn delete_rate_limit(&self, credential_id: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM rate_limits WHERE credential_id = ?1",
            params![credential_id],
        )?;
        Ok(())
    }

    fn count_rate_limits(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM rate_limits", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Run History =====

    fn create_run(&self, job: &str, config_hash: &str) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_runs (job, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                job,
                Utc::now().to_rfc3339(),
                config_hash,
                CycleState::Running.to_db_string()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(
        &self,
        run_id: i64,
        status: CycleState,
        items_total: usize,
        items_failed: usize,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sync_runs SET status = ?1, finished_at = ?2, items_total = ?3, items_failed = ?4
             WHERE id = ?5",
            params![
                status.to_db_string(),
                Utc::now().to_rfc3339(),
                items_total as i64,
                items_failed as i64,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM sync_runs WHERE id = ?1", RUN_COLUMNS),
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(&self, job: &str) -> StorageResult<Option<RunRecord>> {
        let conn = self.conn()?;
        let run = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sync_runs WHERE job = ?1 ORDER BY id DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                params![job],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }
}
