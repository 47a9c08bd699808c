
use std::time::Duration;

use queuectl::config::{ConfigKey, WorkerPoolConfig};
use queuectl::scheduler::JobState;
use queuectl::worker::{request_stop, JobExecutor, PoolState, StopOutcome, WorkerPool};
use queuectl::QueueError;
use test_harness::{assert_eventually, TestQueue};

const GRACE: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_pool_completes_successful_jobs() {
    let queue = TestQueue::new();
    for i in 0..5 {
        queue.enqueue(&format!("ok-{i}"), "true", 0).await;
    }

    let pool = queue.pool(GRACE);
    pool.start(2).await.unwrap();
    assert_eq!(pool.state().await, PoolState::Running);

    assert_eventually(
        || async { queue.lifecycle.status().await.unwrap().completed == 5 },
        Duration::from_secs(10),
        "all jobs should complete",
    )
    .await;

    assert_eq!(pool.stop().await.unwrap(), StopOutcome::Drained);
    assert_eq!(pool.state().await, PoolState::Stopped);
}

#[tokio::test]
async fn test_pool_retries_then_dead_letters_failing_job() {
    let queue = TestQueue::new();
    queue.set_config(ConfigKey::BackoffBase, "0.01").await;
    queue.enqueue("bad", "exit 3", 2).await;
    queue.enqueue("good", "true", 2).await;

    let pool = queue.pool(GRACE);
    pool.start(1).await.unwrap();

    assert_eventually(
        || async { queue.lifecycle.list_dlq().await.unwrap().len() == 1 },
        Duration::from_secs(10),
        "failing job should reach the DLQ",
    )
    .await;
    pool.stop().await.unwrap();

    let dead = &queue.lifecycle.list_dlq().await.unwrap()[0];
    assert_eq!(dead.id, "bad");
    assert_eq!(dead.attempts, 3);
    assert_eq!(dead.last_error.as_deref(), Some("exit code 3"));

    let good = queue.lifecycle.get_job("good").await.unwrap().unwrap();
    assert_eq!(good.state, JobState::Completed);
}

#[tokio::test]
async fn test_unrunnable_command_is_an_ordinary_failure() {
    let queue = TestQueue::new();
    queue.enqueue("missing", "nonexistent_command_12345", 0).await;

    let pool = queue.pool(GRACE);
    pool.start(1).await.unwrap();

    assert_eventually(
        || async { queue.lifecycle.list_dlq().await.unwrap().len() == 1 },
        Duration::from_secs(10),
        "job should be dead-lettered",
    )
    .await;
    pool.stop().await.unwrap();

    let dead = queue.lifecycle.get_job("missing").await.unwrap().unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.last_error.as_deref(), Some("exit code 127"));
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let queue = TestQueue::new();
    let pool = queue.pool(GRACE);

    pool.start(1).await.unwrap();
    assert!(matches!(pool.start(1).await, Err(QueueError::AlreadyRunning)));

    pool.stop().await.unwrap();
    pool.start(1).await.unwrap();
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_when_not_running_is_rejected() {
    let queue = TestQueue::new();
    let pool = queue.pool(GRACE);

    assert!(matches!(pool.stop().await, Err(QueueError::NotRunning)));
}

#[tokio::test]
async fn test_zero_workers_is_rejected() {
    let queue = TestQueue::new();
    let pool = queue.pool(GRACE);

    let result = pool.start(0).await;
    assert!(matches!(result, Err(QueueError::InvalidConfigValue { .. })));
    assert_eq!(pool.state().await, PoolState::Stopped);
}

#[tokio::test]
async fn test_stop_waits_for_running_job() {
    let queue = TestQueue::new();
    queue.enqueue("slow", "sleep 0.5", 0).await;

    let pool = queue.pool(GRACE);
    pool.start(1).await.unwrap();

    assert_eventually(
        || async { pool.status().await.workers[0].current_job.is_some() },
        Duration::from_secs(5),
        "job should be picked up",
    )
    .await;

    let status = pool.status().await;
    assert_eq!(status.workers.len(), 1);
    assert_eq!(status.active_workers, 1);
    assert_eq!(status.workers[0].current_job.as_deref(), Some("slow"));
    assert_eq!(queue.lifecycle.status().await.unwrap().processing, 1);

    assert_eq!(pool.stop().await.unwrap(), StopOutcome::Drained);

    let job = queue.lifecycle.get_job("slow").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn test_stop_gives_up_after_grace_period() {
    let queue = TestQueue::new();
    queue.enqueue("slow", "sleep 0.6", 0).await;

    let pool = queue.pool(Duration::from_millis(100));
    pool.start(1).await.unwrap();

    assert_eventually(
        || async { pool.status().await.workers[0].current_job.is_some() },
        Duration::from_secs(5),
        "job should be picked up",
    )
    .await;

    let started = tokio::time::Instant::now();
    let outcome = pool.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(outcome, StopOutcome::TimedOut { still_running: 1 });

    // The worker is still finishing its job, so the pool is not stopped yet
    assert_eq!(pool.state().await, PoolState::Stopping);
    assert_eq!(pool.active_workers().await, 1);
    let job = queue.lifecycle.get_job("slow").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Processing);

    assert_eventually(
        || async { pool.state().await == PoolState::Stopped },
        Duration::from_secs(5),
        "pool should settle once the worker exits",
    )
    .await;
    assert_eq!(pool.active_workers().await, 0);
    let job = queue.lifecycle.get_job("slow").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn test_restart_waits_for_workers_from_timed_out_stop() {
    let queue = TestQueue::new();
    queue.enqueue("slow", "sleep 0.6", 0).await;

    let pool = queue.pool(Duration::from_millis(100));
    pool.start(1).await.unwrap();
    assert_eventually(
        || async { pool.status().await.workers[0].current_job.is_some() },
        Duration::from_secs(5),
        "job should be picked up",
    )
    .await;

    let outcome = pool.stop().await.unwrap();
    assert!(matches!(outcome, StopOutcome::TimedOut { .. }));

    assert!(matches!(pool.start(1).await, Err(QueueError::AlreadyRunning)));
    assert!(matches!(pool.stop().await, Err(QueueError::NotRunning)));

    assert_eventually(
        || async { pool.state().await == PoolState::Stopped },
        Duration::from_secs(5),
        "old worker should finish",
    )
    .await;

    pool.start(2).await.unwrap();
    let status = pool.status().await;
    assert_eq!(status.state, PoolState::Running);
    assert_eq!(status.active_workers, 2);
    assert!(status.workers.iter().all(|w| w.current_job.is_none()));
    assert_eq!(pool.stop().await.unwrap(), StopOutcome::Drained);
}

#[tokio::test]
async fn test_stop_file_ends_workers() {
    let queue = TestQueue::new();
    let config = WorkerPoolConfig {
        poll_interval: Duration::from_millis(10),
        ..WorkerPoolConfig::default()
    }
    .with_stop_file(queue.stop_file());

    // A stale stop file from an earlier run must not stop a new pool
    request_stop(&queue.stop_file()).await.unwrap();

    let pool = WorkerPool::new(queue.lifecycle.clone(), JobExecutor::new(), config);
    pool.start(2).await.unwrap();
    assert!(!queue.stop_file().exists());

    queue.enqueue("before-stop", "true", 0).await;
    assert_eventually(
        || async { queue.lifecycle.status().await.unwrap().completed == 1 },
        Duration::from_secs(5),
        "job should run before the stop file appears",
    )
    .await;

    request_stop(&queue.stop_file()).await.unwrap();
    assert_eventually(
        || async { pool.active_workers().await == 0 },
        Duration::from_secs(5),
        "workers should exit once the stop file exists",
    )
    .await;

    queue.enqueue("after-stop", "true", 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = queue.lifecycle.get_job("after-stop").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);

    assert_eq!(pool.stop().await.unwrap(), StopOutcome::Drained);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_run_jobs_in_parallel() {
    let queue = TestQueue::new();
    for i in 0..4 {
        queue.enqueue(&format!("sleep-{i}"), "sleep 0.4", 0).await;
    }

    let pool = queue.pool(GRACE);
    let started = tokio::time::Instant::now();
    pool.start(4).await.unwrap();

    assert_eventually(
        || async { queue.lifecycle.status().await.unwrap().completed == 4 },
        Duration::from_secs(10),
        "all sleeps should finish",
    )
    .await;
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "four 0.4s jobs on four workers took {:?}",
        started.elapsed()
    );

    pool.stop().await.unwrap();
}
