//! Job model and the state machine that moves jobs through their lifecycle.
//!
//! ```text
//!   enqueue ──► pending ──claim──► processing ──complete──► completed
//!                  ▲                   │
//!                  └──── retry ◄───────┤ fail (attempts <= max_retries)
//!                                      │
//!                                      └─ fail (attempts > max_retries) ──► DLQ (dead)
//!   DLQ ──requeue──► pending (attempts = 0)
//! ```
//!
//! [`QueueState`] holds the pure transitions; [`JobLifecycle`] runs them
//! atomically against a [`JobStore`](crate::store::JobStore).

pub mod job;
pub mod lifecycle;
pub mod queue;

pub use job::{EnqueueRequest, Job, JobState};
pub use lifecycle::JobLifecycle;
pub use queue::{backoff_delay, FailOutcome, QueueState, StatusSummary};
