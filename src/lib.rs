//! A durable background job queue for shell commands.
//!
//! Jobs are stored in a single JSON file ([`store`]), moved through their
//! lifecycle by [`scheduler::JobLifecycle`], and executed by a pool of
//! concurrent workers ([`worker::WorkerPool`]). Failures are retried with
//! exponential backoff (`backoff_base ^ attempts` seconds) until the job's
//! retry budget runs out, at which point it is moved to the dead letter queue.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod worker;

pub use error::{QueueError, Result};
