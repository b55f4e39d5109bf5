//! Read side for clients: job status and the finished artifact.
//!
//! Nothing here waits for a job. A client that wants the result polls
//! `get_status` until the state is terminal.

use std::path::PathBuf;
use std::sync::Arc;

use crate::context::JobContext;
use crate::error::AccessError;
use crate::state_machine::{Job, JobId, JobState};
use crate::store::StateStore;

/// A snapshot of one job as a client sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub job_id: JobId,
    pub state: JobState,
    /// `progress_info` while the job is not FAILURE, `error_detail` once it is.
    pub detail: Option<String>,
    pub result_reference: Option<PathBuf>,
}

impl From<Job> for StatusReport {
    fn from(job: Job) -> Self {
        let detail = match job.state {
            JobState::Failure => job.error_detail,
            _ => job.progress_info,
        };
        Self {
            job_id: job.id,
            state: job.state,
            detail,
            result_reference: job.result_reference,
        }
    }
}

/// An opened result artifact.
#[derive(Debug)]
pub struct ResultArtifact {
    pub path: PathBuf,
    pub file: tokio::fs::File,
    pub len: u64,
}

pub struct Accessor<S, B> {
    ctx: Arc<JobContext<S, B>>,
}

impl<S: StateStore, B> Accessor<S, B> {
    pub fn new(ctx: Arc<JobContext<S, B>>) -> Self {
        Self { ctx }
    }

    pub async fn get_status(&self, job_id: &str) -> Result<StatusReport, AccessError> {
        Ok(self.load(job_id).await?.into())
    }

    /// Open the artifact of a SUCCESS job for streaming.
    pub async fn get_result(&self, job_id: &str) -> Result<ResultArtifact, AccessError> {
        let job = self.load(job_id).await?;
        let path = job.result_reference()?.to_path_buf();

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(job_id = %job.id, path = %path.display(), "result artifact missing");
                return Err(AccessError::ArtifactMissing {
                    job_id: job.id,
                    path,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        tracing::debug!(job_id = %job.id, path = %path.display(), len, "serving result artifact");
        Ok(ResultArtifact { path, file, len })
    }

    async fn load(&self, job_id: &str) -> Result<Job, AccessError> {
        self.ctx
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| AccessError::UnknownJob(job_id.to_string()))
    }
}
