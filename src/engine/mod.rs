//! Incremental synchronization engine
//!
//! This module contains the scheduling, pagination, retry and rate-limit logic
//! around the feed sources and the classifier:
//! - Durable retry ledger and rate-limit gate
//! - Watermark-bounded pagination of one account
//! - Chunked, bounded-concurrency job orchestration
//! - Sync drivers and their cron schedule

mod driver;
mod jobs;
mod orchestrator;
mod pagination;
mod rate_limit;
mod retry;
mod schedule;

pub use driver::{CycleReport, SyncDriver, SyncJob};
pub use jobs::{ClassificationJob, ExtractionJob, JobKind};
pub use orchestrator::{JobHandler, JobOrchestrator, OrchestratorConfig, RunReport};
pub use pagination::{extract, Extraction, StopCondition};
pub use rate_limit::{RateLimitGate, SAFETY_MARGIN};
pub use retry::RetryLedger;
pub use schedule::{start_scheduler, ScheduledDriver};
