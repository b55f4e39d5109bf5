use std::path::PathBuf;

use thiserror::Error;

use crate::state_machine::JobState;

/// Umbrella error for the binary and for worker loops.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    AlreadyExists(String),

    #[error("revision conflict on job {0}")]
    Conflict(String),

    #[error("timed out waiting for the lock on job {0}")]
    LockTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt job record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed job request: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures surfaced synchronously to the caller of `submit`.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("input reference must not be empty")]
    EmptyInput,

    #[error("failed to persist job: {0}")]
    Store(#[from] StoreError),

    /// The record was written but the request never reached the broker. The
    /// job has been marked FAILURE.
    #[error("failed to enqueue job {job_id}: {source}")]
    Enqueue {
        job_id: String,
        #[source]
        source: BrokerError,
    },
}

/// Why a job body gave up. Both kinds end the job in FAILURE; neither is
/// retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    /// Infrastructure failed (file missing, disk full, permission denied).
    #[error("I/O failure: {0}")]
    Transient(String),
    /// The input as a whole is unusable.
    #[error("invalid input: {0}")]
    Permanent(String),
}

impl From<std::io::Error> for JobFailure {
    fn from(err: std::io::Error) -> Self {
        JobFailure::Transient(err.to_string())
    }
}

/// Request-level errors from the status/result accessor.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("job {job_id} is not completed yet (state: {state})")]
    NotReady { job_id: String, state: JobState },

    #[error("job {job_id} failed: {detail}")]
    Failed { job_id: String, detail: String },

    #[error("result artifact for job {job_id} is missing: {}", .path.display())]
    ArtifactMissing { job_id: String, path: PathBuf },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("illegal {transition} transition for job {job_id} in state {from}")]
pub struct TransitionError {
    pub job_id: String,
    pub from: JobState,
    pub transition: String,
}

/// Rejections from the upload intake.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("no file provided: {}", .0.display())]
    Missing(PathBuf),

    #[error("only CSV files are allowed: {0}")]
    NotCsv(String),

    #[error("file name is empty after sanitizing")]
    EmptyName,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
