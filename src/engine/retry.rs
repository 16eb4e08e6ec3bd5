//! Durable retry ledger
//!
//! Counts failures per work item within a scope (`<server-id>/<job>`). Counters
//! live in storage so a budget survives a restart in the middle of a cycle; the
//! scope is cleared when the next cycle begins.

use crate::storage::Storage;
use crate::{HarvestError, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct RetryLedger {
    storage: Arc<dyn Storage>,
    scope: String,
}

impl RetryLedger {
    pub fn new(storage: Arc<dyn Storage>, scope: impl Into<String>) -> Self {
        Self {
            storage,
            scope: scope.into(),
        }
    }

    /// Builds the scope name for a job on one node
    pub fn scope_for(server_id: &str, job: &str) -> String {
        format!("{}/{}", server_id, job)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Clears every counter in the scope
    pub fn begin_cycle(&self) -> Result<usize> {
        let cleared = self.storage.clear_retry_scope(&self.scope)?;
        if cleared > 0 {
            tracing::debug!("Cleared {} retry entries in {}", cleared, self.scope);
        }
        Ok(cleared)
    }

    /// Records one failure of `key` and returns the updated count
    pub fn record_failure(&self, key: &str, error: &HarvestError) -> Result<u32> {
        let message = error.to_string();
        let count = self
            .storage
            .upsert_increment_retry(&self.scope, key, Some(&message))?;
        Ok(count)
    }

    /// Forgets the counter of `key` after it succeeded
    pub fn record_success(&self, key: &str) -> Result<()> {
        self.storage.delete_retry_entry(&self.scope, key)?;
        Ok(())
    }

    /// Current failure count of `key` (0 when it never failed)
    pub fn retry_count(&self, key: &str) -> Result<u32> {
        Ok(self
            .storage
            .get_retry_entry(&self.scope, key)?
            .map(|entry| entry.retry_count)
            .unwrap_or(0))
    }
}
