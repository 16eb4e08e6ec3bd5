//! Storage module for persisting sync data
//!
//! This module handles all database operations for the engine, including:
//! - Idempotent post insertion and classification outcomes
//! - Per-account watermarks
//! - The retry ledger and rate-limit records
//! - Sync-run history

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::CycleState;

/// Durable retry counter for one work item within a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEntry {
    pub scope: String,
    pub item_key: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// Durable record of an external rate-limit reset for one credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitState {
    pub credential_id: String,
    /// Reset instant in epoch milliseconds
    pub reset_at: i64,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
}

/// Represents a sync cycle in the run history
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub job: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: CycleState,
    pub items_total: u64,
    pub items_failed: u64,
}

/// Post counts by classification outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationCounts {
    pub pending: u64,
    pub matched: u64,
    pub not_matched: u64,
}
