//! Cron-driven flush of buffered like deltas.

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::{Data, Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::{CronStream, Schedule};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::context::{FlushLikesContext, job_failed};
use crate::application::engagement::EngagementService;

pub const DEFAULT_FLUSH_SCHEDULE: &str = "0 */2 * * * *";
const WORKER_NAME: &str = "flush-likes-worker";

/// Marker struct for the cron-triggered flush.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct FlushLikesJob;

impl From<chrono::DateTime<chrono::Utc>> for FlushLikesJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Debug, Error)]
#[error("invalid cron expression `{expression}`: {message}")]
pub struct InvalidSchedule {
    pub expression: String,
    pub message: String,
}

#[derive(Debug, Error)]
#[error("{failed} like deltas could not be applied and were requeued")]
pub struct FlushIncomplete {
    pub failed: usize,
}

/// Parses a six-field cron expression (seconds first).
pub fn flush_likes_schedule(expression: &str) -> Result<Schedule, InvalidSchedule> {
    Schedule::from_str(expression).map_err(|err| InvalidSchedule {
        expression: expression.to_string(),
        message: err.to_string(),
    })
}

/// Process one tick: fold every buffered delta into the stored counters.
pub async fn process_flush_likes_job(
    _job: FlushLikesJob,
    ctx: Data<FlushLikesContext>,
) -> Result<(), apalis::prelude::Error> {
    let report = ctx.engagement.flush_once().await;
    if report.failed > 0 {
        return Err(job_failed(FlushIncomplete {
            failed: report.failed,
        }));
    }
    Ok(())
}

/// Owned handle for the periodic flush worker.
pub struct FlushScheduler {
    engagement: Arc<EngagementService>,
    schedule: Schedule,
    sweep_on_start: bool,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    pub fn new(engagement: Arc<EngagementService>, schedule: Schedule, sweep_on_start: bool) -> Self {
        Self {
            engagement,
            schedule,
            sweep_on_start,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Re-indexes orphaned deltas when configured, then starts the cron worker.
    pub async fn start(&mut self) {
        if self.is_running() {
            return;
        }
        if self.sweep_on_start
            && let Err(err) = self.engagement.sweep_orphans().await
        {
            warn!(error = %err, "orphan sweep failed; continuing with indexed deltas only");
        }

        let ctx = FlushLikesContext {
            engagement: Arc::clone(&self.engagement),
        };
        let worker = WorkerBuilder::new(WORKER_NAME)
            .data(ctx)
            .backend(CronStream::new(self.schedule.clone()))
            .build_fn(process_flush_likes_job);
        let monitor = Monitor::new().register(worker);

        info!(worker = WORKER_NAME, "starting like flush scheduler");
        self.handle = Some(tokio::spawn(async move {
            if let Err(err) = monitor.run().await {
                error!(error = %err, "flush monitor stopped");
            }
        }));
    }

    /// Stops the worker and drains whatever is still buffered.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        handle.abort();
        let _ = handle.await;

        let report = self.engagement.flush_once().await;
        info!(
            applied = report.applied,
            failed = report.failed,
            "like flush scheduler stopped"
        );
    }
}
