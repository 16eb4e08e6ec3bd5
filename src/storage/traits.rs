//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::model::{ClassificationOutcome, Post};
use crate::state::{CycleState, Watermark};
use crate::storage::{ClassificationCounts, RateLimitState, RetryEntry, RunRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Post not found: {0}")]
    PostNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every method takes `&self` so one backend can be shared by all workers of a
/// cycle. Counter and rate-limit rows are written with single-statement upserts
/// so concurrent writers never lose an update.
pub trait Storage: Send + Sync {
    // ===== Posts =====

    /// Inserts posts, ignoring any whose id already exists
    ///
    /// # Returns
    ///
    /// The number of rows actually inserted
    fn upsert_posts(&self, posts: &[Post]) -> StorageResult<usize>;

    /// Gets a post by id
    fn get_post(&self, post_id: &str) -> StorageResult<Option<Post>>;

    /// Counts all stored posts
    fn count_posts(&self) -> StorageResult<u64>;

    /// Gets posts that have no classification outcome yet, oldest first
    fn pending_classification(&self) -> StorageResult<Vec<Post>>;

    /// Stores a classification outcome and its events in one transaction
    fn record_classification(
        &self,
        post_id: &str,
        outcome: &ClassificationOutcome,
    ) -> StorageResult<()>;

    /// Counts posts by classification outcome
    fn classification_counts(&self) -> StorageResult<ClassificationCounts>;

    /// Counts extracted events across all matched posts
    fn count_events(&self) -> StorageResult<u64>;

    // ===== Watermarks =====

    fn get_watermark(&self, account_url: &str) -> StorageResult<Option<Watermark>>;

    /// Inserts or replaces the watermark for its account
    fn put_watermark(&self, watermark: &Watermark) -> StorageResult<()>;

    fn count_watermarks(&self) -> StorageResult<u64>;

    // ===== Retry Ledger =====

    fn get_retry_entry(&self, scope: &str, item_key: &str) -> StorageResult<Option<RetryEntry>>;

    /// Atomically inserts a counter at 1 or increments an existing one
    ///
    /// # Returns
    ///
    /// The counter value after the increment
    fn upsert_increment_retry(
        &self,
        scope: &str,
        item_key: &str,
        last_error: Option<&str>,
    ) -> StorageResult<u32>;

    /// Removes a single counter (the item succeeded)
    fn delete_retry_entry(&self, scope: &str, item_key: &str) -> StorageResult<()>;

    /// Removes every counter in `scope`, returning how many were removed
    fn clear_retry_scope(&self, scope: &str) -> StorageResult<usize>;

    // ===== Rate Limits =====

    fn get_rate_limit(&self, credential_id: &str) -> StorageResult<Option<RateLimitState>>;

    /// Inserts or overwrites the single record for the credential
    fn put_rate_limit(&self, state: &RateLimitState) -> StorageResult<()>;

    fn delete_rate_limit(&self, credential_id: &str) -> StorageResult<()>;

    fn count_rate_limits(&self) -> StorageResult<u64>;

    // ===== Run History =====

    /// Records the start of a sync cycle
    fn create_run(&self, job: &str, config_hash: &str) -> StorageResult<i64>;

    /// Records the terminal state and totals of a sync cycle
    fn complete_run(
        &self,
        run_id: i64,
        status: CycleState,
        items_total: usize,
        items_failed: usize,
    ) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run of `job`
    fn latest_run(&self, job: &str) -> StorageResult<Option<RunRecord>>;
}
