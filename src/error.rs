use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::JobState;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Job already exists: {0}")]
    DuplicateId(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is {from}, cannot {event}")]
    InvalidTransition {
        id: String,
        from: JobState,
        event: &'static str,
    },

    #[error("Store file {} is corrupt: {source}", path.display())]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Worker pool is already running")]
    AlreadyRunning,

    #[error("Worker pool is not running")]
    NotRunning,

    #[error("Unknown configuration key: {0}")]
    UnknownConfigKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidConfigValue { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
