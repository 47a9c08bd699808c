//! Job execution and the worker pool.
//!
//! - [`JobExecutor`]: runs one command through `sh -c` and reports its exit status
//! - [`WorkerPool`]: N concurrent loops that claim jobs, execute them and
//!   report the outcome back to the [`JobLifecycle`](crate::scheduler::JobLifecycle)
//!
//! # Execution Flow
//!
//! 1. A worker calls `claim`; if nothing is eligible it sleeps one poll interval
//! 2. [`JobExecutor::execute`] runs the command to completion
//! 3. Exit status 0 → `complete`, anything else → `fail` (retry or DLQ)
//! 4. The stop signal is checked before the next claim
//!
//! # Limitations
//!
//! No timeout is applied to commands. A process crash leaves claimed jobs in
//! `processing`; nothing reclaims them automatically.

pub mod executor;
pub mod pool;

pub use executor::{ExecutionResult, JobExecutor};
pub use pool::{request_stop, PoolState, PoolStatus, StopOutcome, WorkerPool, WorkerStatus};
