//! Client-facing submission: persist PENDING, enqueue, hand back the id.

use std::path::Path;
use std::sync::Arc;

use crate::broker::{Broker, JobRequest};
use crate::context::JobContext;
use crate::error::SubmissionError;
use crate::state_machine::{Job, JobId, StateMachine, Transition};
use crate::store::{CasOutcome, StateStore};

pub struct Dispatcher<S, B> {
    ctx: Arc<JobContext<S, B>>,
}

impl<S: StateStore, B: Broker> Dispatcher<S, B> {
    pub fn new(ctx: Arc<JobContext<S, B>>) -> Self {
        Self { ctx }
    }

    /// Accept a job for `input_reference` and return its id without waiting
    /// for execution.
    ///
    /// The PENDING record is written before the request is enqueued, so a
    /// status lookup right after `submit` returns always finds it. If the
    /// store write fails nothing is enqueued. If the enqueue fails the job
    /// is marked FAILURE with a transport error before the error is
    /// returned.
    pub async fn submit(&self, input_reference: &Path) -> Result<JobId, SubmissionError> {
        if input_reference.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(SubmissionError::EmptyInput);
        }

        let job = Job::new(input_reference);
        let stored = self.ctx.store.insert(&job).await?;
        tracing::debug!(job_id = %stored.id, input = %input_reference.display(), "job persisted");

        let request = JobRequest {
            job_id: stored.id.clone(),
            input_reference: stored.input_reference.clone(),
        };
        if let Err(source) = self.ctx.broker.enqueue(&request).await {
            tracing::error!(job_id = %stored.id, error = %source, "enqueue failed, marking job failed");
            self.fail_unqueued(stored.clone(), &source.to_string()).await;
            return Err(SubmissionError::Enqueue {
                job_id: stored.id,
                source,
            });
        }

        tracing::info!(job_id = %stored.id, input = %input_reference.display(), "job submitted");
        Ok(stored.id)
    }

    async fn fail_unqueued(&self, mut job: Job, cause: &str) {
        let transition = Transition::Fail {
            error_detail: format!("transport error: {cause}"),
        };
        if let Err(e) = StateMachine::apply(&mut job, transition) {
            tracing::error!(job_id = %job.id, error = %e, "could not mark unqueued job failed");
            return;
        }
        match self.ctx.store.compare_and_set(&job).await {
            Ok(CasOutcome::Written(_)) => {}
            Ok(CasOutcome::Conflict(_)) => {
                tracing::error!(job_id = %job.id, "unqueued job changed underneath the dispatcher")
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "could not mark unqueued job failed")
            }
        }
    }
}
