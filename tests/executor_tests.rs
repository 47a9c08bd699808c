use queuectl::worker::executor::SPAWN_FAILURE_EXIT_CODE;
use queuectl::worker::JobExecutor;

#[tokio::test]
async fn test_execute_simple_command() {
    let executor = JobExecutor::new();

    let result = executor.execute("job-1", "echo hello").await;

    assert_eq!(result.job_id, "job-1");
    assert!(result.success);
    assert_eq!(result.exit_code, 0);
    assert!(result.error.is_none());
    assert!(result.failure_reason().is_none());
}

#[tokio::test]
async fn test_execute_command_failure() {
    let executor = JobExecutor::new();

    let result = executor.execute("job-1", "exit 1").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.failure_reason().as_deref(), Some("exit code 1"));
}

#[tokio::test]
async fn test_execute_preserves_exit_code() {
    let executor = JobExecutor::new();

    let result = executor.execute("job-1", "exit 42").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, 42);
}

#[tokio::test]
async fn test_execute_invalid_command() {
    let executor = JobExecutor::new();

    // The shell starts fine, the command inside it does not exist
    let result = executor.execute("job-1", "nonexistent_command_12345").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, 127);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_execute_missing_shell_is_plain_failure() {
    let executor = JobExecutor::with_shell("/nonexistent/shell-12345");

    let result = executor.execute("job-1", "true").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, SPAWN_FAILURE_EXIT_CODE);
    assert!(result.error.is_some());
    assert!(result
        .failure_reason()
        .unwrap()
        .starts_with("exit code 127: "));
}

#[tokio::test]
async fn test_execute_shell_syntax() {
    let executor = JobExecutor::new();

    let result = executor
        .execute("job-1", "test \"$(echo 'a b' | wc -w)\" -eq 2 && true")
        .await;

    assert!(result.success);
}

#[tokio::test]
async fn test_execute_does_not_inherit_stdin() {
    let executor = JobExecutor::new();

    // `cat` would block forever if stdin were a terminal
    let result = executor.execute("job-1", "cat").await;

    assert!(result.success);
}

#[tokio::test]
async fn test_execute_signalled_process_fails() {
    let executor = JobExecutor::new();

    let result = executor.execute("job-1", "kill -9 $$").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, -1);
}
