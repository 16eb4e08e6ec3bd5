//! Durable rate-limit gate
//!
//! One record per credential holds the instant at which the upstream quota
//! resets. Work keyed to the credential waits for that instant, with a safety
//! margin, and then consumes the record.

use crate::storage::{RateLimitState, Storage};
use crate::Result;
use chrono::{SecondsFormat, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Multiplier applied to the remaining time before a reset
pub const SAFETY_MARGIN: f64 = 1.25;

#[derive(Clone)]
pub struct RateLimitGate {
    storage: Arc<dyn Storage>,
}

impl RateLimitGate {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Suspends until the credential's recorded reset has passed
    ///
    /// The record is deleted once honored, so a single reset delays dispatch
    /// exactly once. Returns the time slept, if any.
    pub async fn check_and_wait(&self, credential_id: &str) -> Result<Option<Duration>> {
        let Some(state) = self.storage.get_rate_limit(credential_id)? else {
            return Ok(None);
        };

        let remaining_ms = state.reset_at - Utc::now().timestamp_millis();
        let waited = if remaining_ms > 0 {
            let wait = Duration::from_millis(remaining_ms as u64).mul_f64(SAFETY_MARGIN);
            let reset = Utc
                .timestamp_millis_opt(state.reset_at)
                .single()
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_else(|| state.reset_at.to_string());
            tracing::info!(
                "Credential {} is rate limited until {}, waiting {:.1}s",
                credential_id,
                reset,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
            Some(wait)
        } else {
            None
        };

        self.storage.delete_rate_limit(credential_id)?;
        Ok(waited)
    }

    /// Records that `credential_id` may not be used before `reset_at_ms`
    pub fn record_limited(&self, credential_id: &str, reset_at_ms: i64) -> Result<()> {
        self.storage.put_rate_limit(&RateLimitState {
            credential_id: credential_id.to_string(),
            reset_at: reset_at_ms,
            limit: None,
            remaining: None,
        })?;
        Ok(())
    }

    /// Records a reset `hint` from now, or `default` when the upstream gave none
    ///
    /// Returns the recorded reset instant in epoch milliseconds.
    pub fn record_backoff(
        &self,
        credential_id: &str,
        hint: Option<Duration>,
        default: Duration,
    ) -> Result<i64> {
        let backoff = hint.unwrap_or(default);
        let reset_at = Utc::now().timestamp_millis() + backoff.as_millis() as i64;
        self.record_limited(credential_id, reset_at)?;
        tracing::warn!(
            "Credential {} hit its rate limit, backing off {}s",
            credential_id,
            backoff.as_secs()
        );
        Ok(reset_at)
    }
}
