use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::scheduler::job::{EnqueueRequest, Job, JobState};

/// Upper bound on a single backoff, in milliseconds (roughly 31,000 years).
/// Keeps `now + delay` inside the representable date range.
const MAX_BACKOFF_MS: f64 = 1e15;

/// Delay before the next attempt after the `attempts`-th failure:
/// `backoff_base ^ attempts` seconds, with `attempts` counted after the
/// increment (so the first failure waits `backoff_base` seconds).
pub fn backoff_delay(backoff_base: f64, attempts: u32) -> Duration {
    let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
    let millis = (backoff_base.powi(exponent) * 1000.0).min(MAX_BACKOFF_MS);
    Duration::milliseconds(millis.round() as i64)
}

/// What a failed execution turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Back to pending, eligible again after `delay`.
    Retry { job: Job, delay: Duration },
    /// Retry budget exhausted; the job now lives in the dead letter queue.
    Dead(Job),
}

impl FailOutcome {
    pub fn job(&self) -> &Job {
        match self {
            FailOutcome::Retry { job, .. } => job,
            FailOutcome::Dead(job) => job,
        }
    }
}

/// Job counts per state plus the dead letter queue size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Always zero: dead jobs only live in the DLQ.
    pub dead: usize,
    pub total: usize,
    pub dlq: usize,
}

impl StatusSummary {
    pub fn count(&self, state: JobState) -> usize {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }
}

/// The complete durable record: live jobs, configuration and the DLQ.
///
/// Every transition takes the current time as an argument, so the state
/// machine itself never reads a clock. A job id is unique across `jobs` and
/// `dlq` combined, and `jobs` never holds a dead job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueState {
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub config: QueueConfig,
    #[serde(default)]
    pub dlq: Vec<Job>,
}

impl QueueState {
    pub fn contains_id(&self, id: &str) -> bool {
        self.jobs.iter().chain(self.dlq.iter()).any(|j| j.id == id)
    }

    /// Look a job up in the live collection, then in the DLQ.
    pub fn get_job(&self, id: &str) -> Option<&Job> {
        self.jobs
            .iter()
            .chain(self.dlq.iter())
            .find(|j| j.id == id)
    }

    fn live_index(&self, id: &str) -> Result<usize> {
        self.jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    fn generate_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.contains_id(&id) {
                return id;
            }
        }
    }

    pub fn enqueue(&mut self, request: EnqueueRequest, now: DateTime<Utc>) -> Result<Job> {
        request.validate()?;

        let id = match request.id {
            Some(id) if self.contains_id(&id) => return Err(QueueError::DuplicateId(id)),
            Some(id) => id,
            None => self.generate_id(),
        };
        let max_retries = request.max_retries.unwrap_or(self.config.max_retries);

        let job = Job::new(id, request.command, max_retries, now);
        self.jobs.push(job.clone());
        Ok(job)
    }

    /// Claim the oldest eligible pending job (by `created_at`, then id) and
    /// mark it processing. `None` means nothing is eligible right now.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Option<Job> {
        let job = self
            .jobs
            .iter_mut()
            .filter(|j| j.is_eligible(now))
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })?;

        job.state = JobState::Processing;
        job.next_retry_at = None;
        job.updated_at = now;
        Some(job.clone())
    }

    pub fn complete(&mut self, id: &str, now: DateTime<Utc>) -> Result<Job> {
        let idx = self.live_index(id)?;
        let job = &mut self.jobs[idx];
        if job.state != JobState::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from: job.state,
                event: "complete",
            });
        }

        job.state = JobState::Completed;
        job.updated_at = now;
        Ok(job.clone())
    }

    /// Record a failed execution. The job goes back to pending with a
    /// backoff, or to the DLQ once `attempts` exceeds `max_retries`.
    pub fn fail(
        &mut self,
        id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome> {
        let idx = self.live_index(id)?;
        let job = &mut self.jobs[idx];
        if job.state != JobState::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from: job.state,
                event: "fail",
            });
        }

        job.attempts += 1;
        job.updated_at = now;
        job.last_error = reason;

        if job.attempts > job.max_retries {
            let mut dead = self.jobs.remove(idx);
            dead.state = JobState::Dead;
            dead.next_retry_at = None;
            self.dlq.push(dead.clone());
            return Ok(FailOutcome::Dead(dead));
        }

        let delay = backoff_delay(self.config.backoff_base, job.attempts);
        job.state = JobState::Pending;
        job.next_retry_at = Some(now + delay);
        Ok(FailOutcome::Retry {
            job: job.clone(),
            delay,
        })
    }

    /// Move a dead job back to the live collection with a fresh retry budget.
    pub fn requeue_dead(&mut self, id: &str, now: DateTime<Utc>) -> Result<Job> {
        let idx = self
            .dlq
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if self.jobs.iter().any(|j| j.id == id) {
            return Err(QueueError::DuplicateId(id.to_string()));
        }

        let mut job = self.dlq.remove(idx);
        job.state = JobState::Pending;
        job.attempts = 0;
        job.next_retry_at = None;
        job.last_error = None;
        job.updated_at = now;
        self.jobs.push(job.clone());
        Ok(job)
    }

    pub fn status(&self) -> StatusSummary {
        let mut summary = StatusSummary {
            total: self.jobs.len(),
            dlq: self.dlq.len(),
            ..StatusSummary::default()
        };
        for job in &self.jobs {
            match job.state {
                JobState::Pending => summary.pending += 1,
                JobState::Processing => summary.processing += 1,
                JobState::Completed => summary.completed += 1,
                JobState::Failed => summary.failed += 1,
                JobState::Dead => summary.dead += 1,
            }
        }
        summary
    }

    /// Live jobs in FIFO order, optionally filtered by state. Filtering on
    /// `dead` lists the DLQ, since that is the only place dead jobs exist.
    pub fn list_jobs(&self, state: Option<JobState>) -> Vec<Job> {
        if state == Some(JobState::Dead) {
            return self.list_dlq();
        }

        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| state.map_or(true, |s| j.state == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    /// Dead jobs in the order they were moved to the DLQ.
    pub fn list_dlq(&self) -> Vec<Job> {
        self.dlq.clone()
    }
}
