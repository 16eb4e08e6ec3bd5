//! Chunked job orchestrator
//!
//! Drains a FIFO of work items `max_concurrency` at a time. Every member of a
//! chunk runs in its own task and the chunk is awaited as a whole, so one
//! failure never cancels its siblings. Failed items are counted in the retry
//! ledger and requeued at the tail until their budget is spent.

use crate::engine::rate_limit::RateLimitGate;
use crate::engine::retry::RetryLedger;
use crate::{ErrorKind, HarvestError, Result};
use async_trait::async_trait;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Per-job orchestration limits
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Chunk width, i.e. the maximum number of in-flight handlers
    pub max_concurrency: usize,
    /// Requeues allowed per item and cycle
    pub max_retries: u32,
    /// Pause between two chunks
    pub chunk_delay: Duration,
    /// Backoff recorded for a rate-limit failure that carries no hint
    pub rate_limit_backoff: Duration,
}

/// Work performed on each item of a job
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    /// Stable key of `item` in the retry ledger and in logs
    fn item_key(&self, item: &Self::Item) -> String;

    /// Rate-limit gate key consulted before every chunk, if the job is gated
    fn credential(&self) -> Option<String> {
        None
    }

    async fn handle(&self, item: Self::Item) -> Result<()>;
}

/// Outcome of one orchestrator run
#[derive(Debug, Default)]
pub struct RunReport {
    /// Keys of items that eventually succeeded
    pub succeeded: Vec<String>,
    /// Items dropped after their last failure
    pub exhausted: Vec<(String, HarvestError)>,
    /// Items never dispatched because the run was cancelled or the gate failed
    pub abandoned: usize,
    pub chunks: usize,
    pub attempts: usize,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.exhausted.len() + self.abandoned
    }

    pub fn is_clean(&self) -> bool {
        self.exhausted.is_empty() && self.abandoned == 0
    }
}

pub struct JobOrchestrator {
    config: OrchestratorConfig,
    ledger: RetryLedger,
    gate: RateLimitGate,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl JobOrchestrator {
    pub fn new(config: OrchestratorConfig, ledger: RetryLedger, gate: RateLimitGate) -> Self {
        Self {
            config,
            ledger,
            gate,
        }
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    /// Runs `items` through `handler` until every item succeeded or was dropped
    ///
    /// `cancel` stops the run between chunks; a started chunk always completes
    /// and every member's result is accounted for. Ledger and gate storage
    /// failures never abort a chunk: they fail the affected item, or leave the
    /// remaining queue undispatched when the gate cannot be read.
    pub async fn run<H: JobHandler>(
        &self,
        items: Vec<H::Item>,
        handler: Arc<H>,
        cancel: &CancellationToken,
    ) -> RunReport {
        let width = self.config.max_concurrency.max(1);
        let mut queue: VecDeque<H::Item> = items.into();
        let mut report = RunReport::default();

        while !queue.is_empty() {
            if cancel.is_cancelled() {
                break;
            }

            if let Some(credential) = handler.credential() {
                tokio::select! {
                    waited = self.gate.check_and_wait(&credential) => {
                        if let Err(e) = waited {
                            tracing::error!(
                                "Rate-limit gate for {} unavailable, stopping dispatch: {}",
                                credential,
                                e
                            );
                            break;
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }

            let take = width.min(queue.len());
            let chunk: Vec<H::Item> = queue.drain(..take).collect();
            report.chunks += 1;
            report.attempts += chunk.len();
            tracing::debug!(
                "Dispatching chunk {} ({} items, {} queued)",
                report.chunks,
                chunk.len(),
                queue.len()
            );

            let workers: Vec<(String, H::Item, JoinHandle<Result<()>>)> = chunk
                .into_iter()
                .map(|item| {
                    let key = handler.item_key(&item);
                    let worker_handler = Arc::clone(&handler);
                    let worker_item = item.clone();
                    let worker = tokio::spawn(async move { worker_handler.handle(worker_item).await });
                    (key, item, worker)
                })
                .collect();

            let mut results = Vec::with_capacity(workers.len());
            for (key, item, worker) in workers {
                let result = match worker.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(HarvestError::WorkerPanic {
                        key: key.clone(),
                        message: panic_message(e.into_panic()),
                    }),
                    Err(e) => Err(HarvestError::WorkerPanic {
                        key: key.clone(),
                        message: e.to_string(),
                    }),
                };
                results.push((key, item, result));
            }

            for (key, item, result) in results {
                match result {
                    Ok(()) => match self.ledger.record_success(&key) {
                        Ok(()) => report.succeeded.push(key),
                        Err(e) => {
                            // The handler's work is done; running it again would repeat it
                            tracing::error!("Could not clear retry entry of {}: {}", key, e);
                            report.exhausted.push((key, e));
                        }
                    },
                    Err(error) => {
                        if self.record_failure(&key, error, &handler, &mut report) {
                            queue.push_back(item);
                        }
                    }
                }
            }

            if !queue.is_empty() && !self.config.chunk_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.chunk_delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        if !queue.is_empty() {
            report.abandoned = queue.len();
            tracing::warn!("Run stopped with {} items not dispatched", report.abandoned);
        }

        report
    }

    /// Counts a failure; returns true when the item should be requeued
    ///
    /// An item whose failure cannot be counted is dropped, since its budget
    /// is unknown.
    fn record_failure<H: JobHandler>(
        &self,
        key: &str,
        error: HarvestError,
        handler: &Arc<H>,
        report: &mut RunReport,
    ) -> bool {
        if let HarvestError::RateLimited {
            credential,
            retry_after,
        } = &error
        {
            let gate_key = handler.credential().unwrap_or_else(|| credential.clone());
            if let Err(e) =
                self.gate
                    .record_backoff(&gate_key, *retry_after, self.config.rate_limit_backoff)
            {
                tracing::error!("Could not record rate limit of {}: {}", gate_key, e);
            }
        }

        let count = match self.ledger.record_failure(key, &error) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    "Could not count failure of {} [{}]: {} ({})",
                    key,
                    error.kind(),
                    error,
                    e
                );
                report.exhausted.push((key.to_string(), error));
                return false;
            }
        };

        if error.is_retryable() && count <= self.config.max_retries {
            tracing::info!(
                "Requeueing {} after failure {} of {}: {}",
                key,
                count,
                self.config.max_retries + 1,
                error
            );
            return true;
        }

        match error.kind() {
            ErrorKind::Cancelled => tracing::warn!("{} cancelled: {}", key, error),
            kind => tracing::error!(
                "Giving up on {} after {} failures [{}]: {}",
                key,
                count,
                kind,
                error
            ),
        }
        report.exhausted.push((key.to_string(), error));
        false
    }
}
