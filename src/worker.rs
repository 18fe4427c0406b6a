//! Drains the job queue: one batch per cycle, on demand or on an interval.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::StorageError;
use crate::orchestrator::{GenerationPlan, Orchestrator};
use crate::queue::{FailOutcome, Job};
use crate::store::{GenerationFilter, GenerationUpdate};
use crate::types::GenerationStatus;

pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Jobs stuck in processing longer than this are handed back to the queue.
pub const STALE_JOB_AFTER: Duration = Duration::from_secs(15 * 60);

pub const INTERRUPTED_MESSAGE: &str = "Generation was interrupted by a server restart";

/// What a startup recovery pass did to unfinished records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Recovery {
    /// Records whose job survived in the queue; left (or put back) at pending.
    pub resumed: usize,
    /// Records with no job left to drive them; marked failed.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobReportStatus {
    Completed,
    Requeued,
    DeadLettered,
    Invalid,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub generation_id: Uuid,
    pub status: JobReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct Worker {
    orchestrator: Orchestrator,
    batch_size: usize,
}

impl Worker {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Claims up to `batch_size` jobs and runs them one after another.
    pub async fn run_batch(&self) -> Vec<JobReport> {
        let queue = self.orchestrator.queue();
        let mut reports = Vec::new();
        for _ in 0..self.batch_size {
            let Some(job) = queue.dequeue().await else {
                break;
            };
            reports.push(self.process(job).await);
        }
        if !reports.is_empty() {
            tracing::info!(processed = reports.len(), "worker batch finished");
        }
        reports
    }

    async fn process(&self, job: Job) -> JobReport {
        let queue = self.orchestrator.queue();
        let records = self.orchestrator.records();

        let plan: GenerationPlan = match job.payload() {
            Ok(plan) => plan,
            Err(err) => {
                let message = format!("Invalid job payload: {err}");
                tracing::error!(job_id = %job.id, error = %message, "dropping unreadable job");
                queue.complete(job.id).await;
                if let Err(err) = records
                    .update(job.generation_id, GenerationUpdate::failed(message.clone()))
                    .await
                {
                    tracing::warn!(generation_id = %job.generation_id, error = %err, "could not mark record failed");
                }
                return report(&job, JobReportStatus::Invalid, Some(message), job.attempts);
            }
        };

        if let Err(err) = records
            .update(job.generation_id, GenerationUpdate::status(GenerationStatus::Processing))
            .await
        {
            tracing::warn!(generation_id = %job.generation_id, error = %err, "could not mark record processing");
        }

        let execution = self.orchestrator.perform(plan).await;
        if execution.succeeded() {
            queue.complete(job.id).await;
            if let Err(err) = records.update(job.generation_id, execution.record_update()).await {
                tracing::error!(generation_id = %job.generation_id, error = %err, "could not finalize record");
            }
            return report(&job, JobReportStatus::Completed, None, job.attempts);
        }

        let message = execution.error_message();
        match queue.fail(job.id, &message).await {
            FailOutcome::Requeued { attempts, retry_at } => {
                tracing::warn!(
                    job_id = %job.id,
                    attempts,
                    retry_at = %retry_at,
                    error = %message,
                    "job failed, requeued"
                );
                let update = GenerationUpdate::status(GenerationStatus::Pending).with_error(message.clone());
                if let Err(err) = records.update(job.generation_id, update).await {
                    tracing::warn!(generation_id = %job.generation_id, error = %err, "could not record retry");
                }
                report(&job, JobReportStatus::Requeued, Some(message), attempts)
            }
            FailOutcome::DeadLettered { attempts } => {
                tracing::error!(job_id = %job.id, attempts, error = %message, "job moved to dead-letter queue");
                if let Err(err) = records.update(job.generation_id, execution.record_update()).await {
                    tracing::error!(generation_id = %job.generation_id, error = %err, "could not finalize record");
                }
                report(&job, JobReportStatus::DeadLettered, Some(message), attempts)
            }
            FailOutcome::Unknown => {
                tracing::warn!(job_id = %job.id, "failed job was no longer claimed");
                report(&job, JobReportStatus::Invalid, Some(message), job.attempts)
            }
        }
    }

    /// Returns stale claims to the queue and puts their records back to pending.
    pub async fn requeue_stale(&self, older_than: Duration) -> usize {
        let requeued = self.orchestrator.queue().requeue_stale(older_than).await;
        for job in &requeued {
            let update = GenerationUpdate::status(GenerationStatus::Pending);
            if let Err(err) = self.orchestrator.records().update(job.generation_id, update).await {
                tracing::warn!(generation_id = %job.generation_id, error = %err, "could not reset stale record");
            }
        }
        if !requeued.is_empty() {
            tracing::warn!(requeued = requeued.len(), "stale jobs returned to the queue");
        }
        requeued.len()
    }

    /// Settles records left pending or processing by a previous process.
    ///
    /// Must run before any generation is submitted in this process.
    pub async fn recover_interrupted(&self) -> Result<Recovery, StorageError> {
        let records = self.orchestrator.records();
        let live = self.orchestrator.queue().live_generations().await;
        let mut recovery = Recovery::default();

        for status in [GenerationStatus::Pending, GenerationStatus::Processing] {
            for record in records.list_recent(&GenerationFilter::unfinished(status)).await? {
                if live.contains(&record.id) {
                    if status == GenerationStatus::Processing {
                        records
                            .update(record.id, GenerationUpdate::status(GenerationStatus::Pending))
                            .await?;
                    }
                    recovery.resumed += 1;
                } else {
                    records.update(record.id, GenerationUpdate::failed(INTERRUPTED_MESSAGE)).await?;
                    recovery.failed += 1;
                }
            }
        }
        if recovery != Recovery::default() {
            tracing::warn!(resumed = recovery.resumed, failed = recovery.failed, "recovered unfinished generations");
        }
        Ok(recovery)
    }

    /// Runs a batch every `every` until `cancel` fires.
    pub async fn run(self, every: Duration, cancel: CancellationToken) {
        tracing::info!(interval_secs = every.as_secs(), batch_size = self.batch_size, "queue worker started");
        let mut interval = tokio::time::interval(every);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("queue worker stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.requeue_stale(STALE_JOB_AFTER).await;
                    self.run_batch().await;
                }
            }
        }
    }
}

fn report(job: &Job, status: JobReportStatus, error: Option<String>, attempts: u32) -> JobReport {
    JobReport {
        job_id: job.id,
        generation_id: job.generation_id,
        status,
        error,
        attempts,
    }
}
