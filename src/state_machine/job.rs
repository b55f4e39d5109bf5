use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AccessError;

/// Job identifiers are UUID v4 strings assigned at submission.
pub type JobId = String;

/// Lifecycle state of a job.
///
/// Each job flows through: PENDING → RUNNING → SUCCESS | FAILURE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Failure,
}

impl JobState {
    /// SUCCESS and FAILURE admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    /// Position in the lifecycle order. Terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Success | JobState::Failure => 2,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Success => write!(f, "SUCCESS"),
            JobState::Failure => write!(f, "FAILURE"),
        }
    }
}

/// The persisted record for one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    /// Opaque progress payload, overwritten while RUNNING.
    pub progress_info: Option<String>,
    pub input_reference: PathBuf,
    /// Set only on the transition to SUCCESS.
    pub result_reference: Option<PathBuf>,
    /// Set only on the transition to FAILURE.
    pub error_detail: Option<String>,
    /// Write counter maintained by the state store; the compare-and-set token.
    #[serde(default)]
    pub revision: u64,
    /// Every state this record has left, oldest first.
    #[serde(default)]
    pub history: Vec<JobState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh PENDING job with a newly generated id.
    pub fn new(input_reference: impl Into<PathBuf>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), input_reference)
    }

    pub fn with_id(id: impl Into<JobId>, input_reference: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: JobState::Pending,
            progress_info: None,
            input_reference: input_reference.into(),
            result_reference: None,
            error_detail: None,
            revision: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Resolve the result artifact pointer.
    ///
    /// Only a SUCCESS job has one; asking any other job is an error, never an
    /// empty answer.
    pub fn result_reference(&self) -> Result<&Path, AccessError> {
        match (self.state, &self.result_reference) {
            (JobState::Success, Some(path)) => Ok(path),
            (JobState::Failure, _) => Err(AccessError::Failed {
                job_id: self.id.clone(),
                detail: self
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            }),
            (state, _) => Err(AccessError::NotReady {
                job_id: self.id.clone(),
                state,
            }),
        }
    }
}
