//! Sync driver: one scheduled cycle of a job
//!
//! A driver moves through `Idle -> Running -> terminal -> Idle` once per tick.
//! Ticks never overlap; a tick arriving while a cycle runs is skipped. Errors
//! end the cycle and are logged, never returned to the scheduler.

use crate::engine::jobs::{ClassificationJob, ExtractionJob, JobKind};
use crate::engine::orchestrator::{JobOrchestrator, RunReport};
use crate::state::CycleState;
use crate::storage::Storage;
use crate::{ErrorKind, HarvestError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// The job a driver runs each cycle
#[derive(Clone)]
pub enum SyncJob {
    Extraction(ExtractionJob),
    Classification(ClassificationJob),
}

impl SyncJob {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Extraction(_) => JobKind::Extraction,
            Self::Classification(_) => JobKind::Classification,
        }
    }
}

/// Result of one completed cycle
#[derive(Debug)]
pub struct CycleReport {
    pub job: JobKind,
    pub run_id: Option<i64>,
    pub state: CycleState,
    pub report: RunReport,
    /// The setup or storage error that ended the cycle, if any
    pub error: Option<HarvestError>,
}

pub struct SyncDriver {
    job: SyncJob,
    orchestrator: JobOrchestrator,
    storage: Arc<dyn Storage>,
    config_hash: String,
    cycle: Mutex<CycleState>,
    shutdown: CancellationToken,
}

fn transition(state: &mut CycleState, next: CycleState) -> Result<()> {
    if !state.can_transition_to(next) {
        return Err(HarvestError::InvalidTransition {
            from: *state,
            to: next,
        });
    }
    *state = next;
    Ok(())
}

impl SyncDriver {
    pub fn new(
        job: SyncJob,
        orchestrator: JobOrchestrator,
        storage: Arc<dyn Storage>,
        config_hash: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            job,
            orchestrator,
            storage,
            config_hash: config_hash.into(),
            cycle: Mutex::new(CycleState::Idle),
            shutdown,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.job.kind()
    }

    /// Current state; `Running` while a cycle holds the driver
    pub fn state(&self) -> CycleState {
        self.cycle
            .try_lock()
            .map(|state| *state)
            .unwrap_or(CycleState::Running)
    }

    /// Waits for a running cycle, if any, to reach `Idle`
    pub async fn wait_idle(&self) {
        let _idle = self.cycle.lock().await;
    }

    /// Runs one cycle unless one is already running
    ///
    /// Returns `None` when the tick was skipped.
    pub async fn tick(&self) -> Option<CycleReport> {
        let Ok(mut state) = self.cycle.try_lock() else {
            tracing::info!("{} cycle still running, skipping tick", self.kind());
            return None;
        };

        if let Err(e) = transition(&mut state, CycleState::Running) {
            tracing::error!("{} cycle refused to start: {}", self.kind(), e);
            return None;
        }

        let kind = self.kind();
        let cancel = self.shutdown.child_token();
        let run_id = match self.storage.create_run(kind.as_str(), &self.config_hash) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("Could not record {} run start: {}", kind, e);
                None
            }
        };

        tracing::info!("Starting {} cycle", kind);
        let outcome = self.run_cycle(&cancel).await;

        let (terminal, report, error) = match outcome {
            Ok(report) if report.is_clean() => (CycleState::Success, report, None),
            Ok(report) => (CycleState::PartialFailure, report, None),
            Err(e) => (CycleState::Fatal, RunReport::default(), Some(e)),
        };

        match &error {
            Some(e) if e.kind() == ErrorKind::Cancelled => {
                tracing::warn!("{} cycle cancelled before dispatch", kind)
            }
            Some(e) => tracing::error!("{} cycle aborted [{}]: {}", kind, e.kind(), e),
            None => tracing::info!(
                "{} cycle finished {}: {} succeeded, {} failed, {} not dispatched ({} chunks)",
                kind,
                terminal,
                report.succeeded.len(),
                report.exhausted.len(),
                report.abandoned,
                report.chunks
            ),
        }

        if let Some(id) = run_id {
            if let Err(e) =
                self.storage
                    .complete_run(id, terminal, report.total(), report.exhausted.len())
            {
                tracing::warn!("Could not record {} run {} result: {}", kind, id, e);
            }
        }

        if let Err(e) = transition(&mut state, terminal) {
            tracing::error!("{}", e);
        }
        let finished = *state;
        if let Err(e) = transition(&mut state, CycleState::Idle) {
            tracing::error!("{}", e);
        }

        Some(CycleReport {
            job: kind,
            run_id,
            state: finished,
            report,
            error,
        })
    }

    /// Errors only come from setup steps that run before any item is dispatched
    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<RunReport> {
        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }

        self.orchestrator.ledger().begin_cycle()?;

        match &self.job {
            SyncJob::Extraction(job) => {
                job.probe().await?;
                let handler = Arc::new(job.with_cancel(cancel.clone()));
                let accounts = job.accounts().to_vec();
                Ok(self.orchestrator.run(accounts, handler, cancel).await)
            }
            SyncJob::Classification(job) => {
                let pending = job.pending()?;
                tracing::info!("{} posts awaiting classification", pending.len());
                Ok(self
                    .orchestrator
                    .run(pending, Arc::new(job.clone()), cancel)
                    .await)
            }
        }
    }
}
