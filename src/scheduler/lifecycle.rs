use std::sync::Arc;

use chrono::Utc;

use crate::config::{ConfigKey, QueueConfig};
use crate::error::Result;
use crate::scheduler::job::{EnqueueRequest, Job, JobState};
use crate::scheduler::queue::{FailOutcome, StatusSummary};
use crate::store::JobStore;

/// The job state machine, bound to a store.
///
/// Each operation reads the clock once and commits one atomic unit through
/// [`JobStore::with_lock`]. Cloning is cheap and every clone shares the
/// same store.
#[derive(Debug, Clone)]
pub struct JobLifecycle {
    store: Arc<JobStore>,
}

impl JobLifecycle {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job> {
        let now = Utc::now();
        let job = self.store.with_lock(|s| s.enqueue(request, now)).await?;
        tracing::info!(
            job_id = %job.id,
            command = %job.command,
            max_retries = job.max_retries,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Claim the oldest eligible job. `Ok(None)` when nothing is claimable.
    pub async fn claim(&self) -> Result<Option<Job>> {
        let now = Utc::now();
        let job = self.store.with_lock(|s| Ok(s.claim(now))).await?;
        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, attempts = job.attempts, "Job claimed");
        }
        Ok(job)
    }

    pub async fn complete(&self, id: &str) -> Result<Job> {
        let now = Utc::now();
        let job = self.store.with_lock(|s| s.complete(id, now)).await?;
        tracing::info!(job_id = %job.id, "Job completed");
        Ok(job)
    }

    pub async fn fail(&self, id: &str, reason: Option<String>) -> Result<FailOutcome> {
        let now = Utc::now();
        let outcome = self.store.with_lock(|s| s.fail(id, reason, now)).await?;
        match &outcome {
            FailOutcome::Retry { job, delay } => tracing::info!(
                job_id = %job.id,
                attempts = job.attempts,
                max_retries = job.max_retries,
                delay_ms = delay.num_milliseconds(),
                "Job failed, retry scheduled"
            ),
            FailOutcome::Dead(job) => tracing::warn!(
                job_id = %job.id,
                attempts = job.attempts,
                "Job exceeded max retries, moved to DLQ"
            ),
        }
        Ok(outcome)
    }

    pub async fn requeue_from_dlq(&self, id: &str) -> Result<Job> {
        let now = Utc::now();
        let job = self.store.with_lock(|s| s.requeue_dead(id, now)).await?;
        tracing::info!(job_id = %job.id, "Job requeued from DLQ");
        Ok(job)
    }

    pub async fn status(&self) -> Result<StatusSummary> {
        self.store.read(|s| s.status()).await
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        self.store.read(|s| s.list_jobs(state)).await
    }

    pub async fn list_dlq(&self) -> Result<Vec<Job>> {
        self.store.read(|s| s.list_dlq()).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.store.read(|s| s.get_job(id).cloned()).await
    }

    pub async fn config(&self) -> Result<QueueConfig> {
        self.store.read(|s| s.config.clone()).await
    }

    pub async fn set_config(&self, key: ConfigKey, value: &str) -> Result<QueueConfig> {
        let config = self
            .store
            .with_lock(|s| {
                s.config.set(key, value)?;
                Ok(s.config.clone())
            })
            .await?;
        tracing::info!(key = %key, value = %config.get(key), "Configuration updated");
        Ok(config)
    }
}
