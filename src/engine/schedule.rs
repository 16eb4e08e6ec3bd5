//! Cron scheduling of sync drivers

use crate::engine::driver::SyncDriver;
use crate::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

/// A driver together with its trigger
pub struct ScheduledDriver {
    pub driver: Arc<SyncDriver>,
    /// Six-field cron expression (seconds first)
    pub schedule: String,
    /// Fire one cycle as soon as the scheduler starts
    pub run_on_start: bool,
}

/// Registers one cron job per driver and starts the scheduler
///
/// Each firing calls [`SyncDriver::tick`], which skips itself while the
/// previous cycle of the same driver is still running.
pub async fn start_scheduler(drivers: &[ScheduledDriver]) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    for entry in drivers {
        let driver = Arc::clone(&entry.driver);
        let job = Job::new_async(entry.schedule.as_str(), move |_uuid, _lock| {
            let driver = Arc::clone(&driver);
            Box::pin(async move {
                driver.tick().await;
            })
        })?;

        scheduler.add(job).await?;
        tracing::info!(
            "Scheduled {} job on '{}'",
            entry.driver.kind(),
            entry.schedule
        );
    }

    scheduler.start().await?;

    for entry in drivers.iter().filter(|entry| entry.run_on_start) {
        let driver = Arc::clone(&entry.driver);
        tokio::spawn(async move {
            driver.tick().await;
        });
    }

    Ok(scheduler)
}
