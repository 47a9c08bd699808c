use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerPoolConfig;
use crate::error::{QueueError, Result};
use crate::scheduler::{Job, JobLifecycle};
use crate::worker::executor::JobExecutor;

/// Lifecycle of a [`WorkerPool`]: `stopped → running → stopping → stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Stopped,
    Running,
    Stopping,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolState::Stopped => write!(f, "stopped"),
            PoolState::Running => write!(f, "running"),
            PoolState::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub id: usize,
    pub current_job: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub state: PoolState,
    pub active_workers: usize,
    pub workers: Vec<WorkerStatus>,
}

/// How a [`WorkerPool::stop`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Every worker exited within the grace period.
    Drained,
    /// The grace period ran out. The pool stays `stopping` until the
    /// remaining workers finish their jobs and exit.
    TimedOut { still_running: usize },
}

type CurrentJobs = Arc<RwLock<BTreeMap<usize, Option<String>>>>;

#[derive(Debug)]
struct PoolInner {
    state: PoolState,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    /// Workers still finishing a job after a stop gave up waiting on them.
    lingering: Vec<JoinHandle<()>>,
}

impl PoolInner {
    /// Settle a timed-out stop once its last worker has exited.
    fn refresh(&mut self) {
        if self.state == PoolState::Stopping
            && !self.lingering.is_empty()
            && self.lingering.iter().all(|h| h.is_finished())
        {
            self.lingering.clear();
            self.state = PoolState::Stopped;
            tracing::info!("Lingering workers exited, pool stopped");
        }
    }

    fn active_workers(&self) -> usize {
        self.handles
            .iter()
            .chain(self.lingering.iter())
            .filter(|h| !h.is_finished())
            .count()
    }
}

/// A fixed set of worker tasks sharing one [`JobLifecycle`].
///
/// Each worker loops: claim, execute, report `complete`/`fail`, repeat.
/// When nothing is claimable it sleeps for `poll_interval`. The stop signal
/// is only observed between jobs, never while a command is running.
#[derive(Debug)]
pub struct WorkerPool {
    lifecycle: JobLifecycle,
    executor: JobExecutor,
    config: WorkerPoolConfig,
    current_jobs: CurrentJobs,
    inner: Mutex<PoolInner>,
}

impl WorkerPool {
    pub fn new(lifecycle: JobLifecycle, executor: JobExecutor, config: WorkerPoolConfig) -> Self {
        Self {
            lifecycle,
            executor,
            config,
            current_jobs: Arc::new(RwLock::new(BTreeMap::new())),
            inner: Mutex::new(PoolInner {
                state: PoolState::Stopped,
                cancel: CancellationToken::new(),
                handles: Vec::new(),
                lingering: Vec::new(),
            }),
        }
    }

    /// Spawn `count` workers.
    ///
    /// # Errors
    ///
    /// [`QueueError::AlreadyRunning`] unless the pool is stopped (including
    /// while workers from a timed-out stop are still finishing), and
    /// [`QueueError::InvalidConfigValue`] for a zero `count`.
    pub async fn start(&self, count: usize) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.refresh();
        if inner.state != PoolState::Stopped {
            return Err(QueueError::AlreadyRunning);
        }
        if count == 0 {
            return Err(QueueError::InvalidConfigValue {
                key: "worker_count".into(),
                reason: "must be a positive integer".into(),
            });
        }

        if let Some(stop_file) = &self.config.stop_file {
            clear_stop_file(stop_file).await?;
        }

        let cancel = CancellationToken::new();
        {
            let mut current = self.current_jobs.write().await;
            current.clear();
            current.extend((1..=count).map(|id| (id, None)));
        }

        let handles = (1..=count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    lifecycle: self.lifecycle.clone(),
                    executor: self.executor.clone(),
                    cancel: cancel.clone(),
                    poll_interval: self.config.poll_interval,
                    stop_file: self.config.stop_file.clone(),
                    current_jobs: Arc::clone(&self.current_jobs),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        inner.cancel = cancel;
        inner.handles = handles;
        inner.state = PoolState::Running;

        tracing::info!(count, "Started workers");
        Ok(())
    }

    /// Signal every worker to stop and wait for them to finish their current
    /// job, for at most the configured grace period.
    ///
    /// Workers still busy when the grace period ends keep running until
    /// their job is done; the pool reports `stopping` until then.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotRunning`] if the pool is not running.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut handles = {
            let mut inner = self.inner.lock().await;
            if inner.state != PoolState::Running {
                return Err(QueueError::NotRunning);
            }
            inner.state = PoolState::Stopping;
            inner.cancel.cancel();
            std::mem::take(&mut inner.handles)
        };

        tracing::info!(
            workers = handles.len(),
            grace_secs = self.config.shutdown_grace.as_secs_f64(),
            "Stopping workers (waiting for current jobs)"
        );

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Worker task panicked");
                }
            }
        })
        .await
        .is_ok();

        let mut inner = self.inner.lock().await;
        if drained {
            tracing::info!("All workers stopped");
            inner.state = PoolState::Stopped;
            return Ok(StopOutcome::Drained);
        }

        let lingering: Vec<_> = handles.into_iter().filter(|h| !h.is_finished()).collect();
        let still_running = lingering.len();
        tracing::warn!(
            still_running,
            "Grace period elapsed, workers still finishing their jobs"
        );
        inner.lingering = lingering;
        inner.state = if still_running == 0 {
            PoolState::Stopped
        } else {
            PoolState::Stopping
        };
        Ok(StopOutcome::TimedOut { still_running })
    }

    pub async fn state(&self) -> PoolState {
        let mut inner = self.inner.lock().await;
        inner.refresh();
        inner.state
    }

    /// Workers whose loop has not exited yet, including ones left over from
    /// a timed-out stop.
    pub async fn active_workers(&self) -> usize {
        self.inner.lock().await.active_workers()
    }

    pub async fn status(&self) -> PoolStatus {
        let (state, active_workers) = {
            let mut inner = self.inner.lock().await;
            inner.refresh();
            (inner.state, inner.active_workers())
        };
        let workers = self
            .current_jobs
            .read()
            .await
            .iter()
            .map(|(id, job)| WorkerStatus {
                id: *id,
                current_job: job.clone(),
            })
            .collect();

        PoolStatus {
            state,
            active_workers,
            workers,
        }
    }
}

struct Worker {
    id: usize,
    lifecycle: JobLifecycle,
    executor: JobExecutor,
    cancel: CancellationToken,
    poll_interval: Duration,
    stop_file: Option<PathBuf>,
    current_jobs: CurrentJobs,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(worker_id = self.id, "Worker starting");

        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(worker_id = self.id, "Worker received stop signal");
                break;
            }
            if self.stop_requested().await {
                tracing::info!(worker_id = self.id, "Worker found stop file");
                break;
            }

            match self.lifecycle.claim().await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    if !self.idle().await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id = self.id, error = %e, "Failed to claim job");
                    if !self.idle().await {
                        break;
                    }
                }
            }
        }

        tracing::debug!(worker_id = self.id, "Worker stopped");
    }

    /// Sleep one poll interval. Returns false if stopped while sleeping.
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }

    async fn stop_requested(&self) -> bool {
        match &self.stop_file {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        }
    }

    async fn process(&self, job: Job) {
        tracing::info!(worker_id = self.id, job_id = %job.id, "Worker processing job");
        self.set_current(Some(job.id.clone())).await;

        let result = self.executor.execute(&job.id, &job.command).await;

        let reported = if result.success {
            self.lifecycle.complete(&job.id).await.map(|_| ())
        } else {
            self.lifecycle
                .fail(&job.id, result.failure_reason())
                .await
                .map(|_| ())
        };
        if let Err(e) = reported {
            tracing::error!(
                worker_id = self.id,
                job_id = %job.id,
                error = %e,
                "Failed to record job outcome"
            );
        }

        self.set_current(None).await;
    }

    async fn set_current(&self, job_id: Option<String>) {
        self.current_jobs.write().await.insert(self.id, job_id);
    }
}

async fn clear_stop_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed stale stop file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create the stop file that running workers watch for.
pub async fn request_stop(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, b"").await?;
    Ok(())
}
