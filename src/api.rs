//! JSON shapes handed to clients, and the mapping of access failures onto
//! HTTP-style status codes.

use serde::{Deserialize, Serialize};

use crate::accessor::StatusReport;
use crate::error::AccessError;
use crate::state_machine::JobState;

/// Body of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub message: String,
    pub job_id: String,
    pub status_url: String,
}

impl SubmitResponse {
    pub fn accepted(job_id: &str, public_base_url: &str) -> Self {
        Self {
            message: "File uploaded successfully".to_string(),
            job_id: job_id.to_string(),
            status_url: format!("{}/status/{job_id}", public_base_url.trim_end_matches('/')),
        }
    }
}

/// Body of a status lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: JobState,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file: Option<String>,
}

impl StatusResponse {
    pub fn from_report(report: &StatusReport, public_base_url: &str) -> Self {
        let status = match report.state {
            JobState::Pending => "Pending...".to_string(),
            JobState::Failure => report
                .detail
                .clone()
                .unwrap_or_else(|| "Job failed".to_string()),
            JobState::Running | JobState::Success => report
                .detail
                .clone()
                .unwrap_or_else(|| "Processing...".to_string()),
        };
        let result_file = (report.state == JobState::Success)
            .then(|| format!("{}/result/{}", public_base_url.trim_end_matches('/'), report.job_id));
        Self {
            state: report.state,
            status,
            result_file,
        }
    }
}

/// Body of any failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An [`AccessError`] paired with the status code it maps to.
#[derive(Debug)]
pub struct ApiError {
    pub status: u16,
    pub body: ErrorResponse,
}

impl From<&AccessError> for ApiError {
    fn from(err: &AccessError) -> Self {
        let status = match err {
            AccessError::UnknownJob(_) | AccessError::ArtifactMissing { .. } => 404,
            AccessError::NotReady { .. } | AccessError::Failed { .. } => 400,
            AccessError::Store(_) | AccessError::Io(_) => 500,
        };
        let error = match err {
            AccessError::UnknownJob(_) => "Job not found".to_string(),
            AccessError::ArtifactMissing { .. } => "Result file not found".to_string(),
            AccessError::NotReady { .. } => "Job is not completed yet".to_string(),
            other => other.to_string(),
        };
        Self {
            status,
            body: ErrorResponse { error },
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        Self::from(&err)
    }
}
