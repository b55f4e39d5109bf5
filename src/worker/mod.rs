//! Pulls job requests off the broker and drives each job from PENDING to a
//! terminal state.
//!
//! Exclusive execution comes from the store, not from the broker: a worker
//! runs a body only after its PENDING → RUNNING compare-and-set lands, so a
//! duplicate delivery of the same id finds the job already claimed and is
//! dropped without side effects.

use std::sync::Arc;

use tokio::sync::watch;

use crate::broker::{Broker, Delivery};
use crate::context::JobContext;
use crate::error::{BrokerError, JobError, StoreError};
use crate::state_machine::{Job, JobState, StateMachine, Transition};
use crate::store::{CasOutcome, StateStore};

mod body;
pub mod csv_sum;
mod pool;

pub use body::{BodyInput, BodyOutput, JobBody, Progress};
pub use csv_sum::CsvSum;
pub use pool::WorkerPool;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// This worker ran the body; the job ended in the given state.
    Completed(JobState),
    /// The job was already claimed or finished; nothing was run.
    Duplicate,
    /// No record exists for the delivered id.
    Unknown,
    /// The body ran but no terminal state could be written; the record is
    /// still RUNNING.
    Stranded,
}

/// Tries per terminal write before giving up on it.
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;

/// One execution slot. Runs one job at a time.
pub struct Worker<S, B, J> {
    ctx: Arc<JobContext<S, B>>,
    body: Arc<J>,
    slot: usize,
}

impl<S: StateStore, B: Broker, J: JobBody> Worker<S, B, J> {
    pub fn new(ctx: Arc<JobContext<S, B>>, body: Arc<J>, slot: usize) -> Self {
        Self { ctx, body, slot }
    }

    /// Consume deliveries until `shutdown` flips to `true` or the broker
    /// closes. A job in hand is always finished before the loop checks
    /// for shutdown again.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), JobError> {
        tracing::info!(slot = self.slot, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as a stop request.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.ctx.broker.dequeue() => next,
            };

            match next {
                Ok(delivery) => self.handle(delivery).await,
                Err(BrokerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(slot = self.slot, error = %e, "dequeue failed");
                    tokio::time::sleep(self.ctx.settings.poll_interval).await;
                }
            }
        }
        tracing::info!(slot = self.slot, "worker stopped");
        Ok(())
    }

    /// Process one delivery. It is acked once the job is claimed or found
    /// not to need running, and handed back to the broker if a store error
    /// stopped processing before the claim landed.
    pub async fn handle(&self, delivery: Delivery) {
        let job_id = delivery.request.job_id.clone();
        match self.process(&delivery).await {
            Ok(processed) => {
                match processed {
                    Processed::Completed(state) => {
                        tracing::info!(slot = self.slot, job_id = %job_id, state = %state, "job finished")
                    }
                    Processed::Duplicate => {
                        tracing::debug!(slot = self.slot, job_id = %job_id, "duplicate delivery ignored")
                    }
                    Processed::Unknown => {
                        tracing::warn!(slot = self.slot, job_id = %job_id, "delivery for unknown job dropped")
                    }
                    Processed::Stranded => {
                        tracing::error!(slot = self.slot, job_id = %job_id, "job outcome could not be recorded")
                    }
                }
                if let Err(e) = self.ctx.broker.ack(&delivery).await {
                    tracing::warn!(slot = self.slot, job_id = %job_id, error = %e, "ack failed");
                }
            }
            Err(e) => {
                tracing::warn!(slot = self.slot, job_id = %job_id, error = %e, "job not claimed, requeueing delivery");
                if let Err(e) = self.ctx.broker.nack(&delivery).await {
                    tracing::error!(slot = self.slot, job_id = %job_id, error = %e, "requeue failed");
                }
                tokio::time::sleep(self.ctx.settings.poll_interval).await;
            }
        }
    }

    /// Claim the job, run the body, record the outcome.
    ///
    /// `Err` means the claim never landed and the job is still PENDING.
    /// Once the job is RUNNING every failure resolves to a [`Processed`].
    pub async fn process(&self, delivery: &Delivery) -> Result<Processed, JobError> {
        let job_id = &delivery.request.job_id;
        let Some(job) = self.ctx.store.get(job_id).await? else {
            return Ok(Processed::Unknown);
        };
        let Some(running) = self.claim(job).await? else {
            return Ok(Processed::Duplicate);
        };
        tracing::info!(
            slot = self.slot,
            job_id = %running.id,
            input = %running.input_reference.display(),
            "job started"
        );

        let (progress, mut updates) = Progress::channel();
        let input_reference = running.input_reference.clone();
        let body_input = BodyInput {
            job_id,
            input: &input_reference,
            output_dir: &self.ctx.settings.output_dir,
        };

        let execute = self.body.run(body_input, progress);
        let track = async {
            let mut latest = running;
            while let Some(info) = updates.recv().await {
                latest = self.record_progress(latest, info).await;
            }
            latest
        };
        let (outcome, latest) = tokio::join!(execute, track);

        let transition = match outcome {
            Ok(output) => Transition::Succeed {
                result_reference: output.artifact,
                summary: output.summary,
            },
            Err(failure) => {
                tracing::warn!(slot = self.slot, job_id = %latest.id, error = %failure, "job body failed");
                Transition::Fail {
                    error_detail: failure.to_string(),
                }
            }
        };

        Ok(self.finish(latest, transition).await)
    }

    /// Record the terminal state. If that keeps failing, record FAILURE
    /// with the storage error instead.
    async fn finish(&self, running: Job, transition: Transition) -> Processed {
        let cause = match self.write_terminal(running.clone(), transition).await {
            Ok(state) => return Processed::Completed(state),
            Err(e) => e,
        };
        tracing::error!(job_id = %running.id, error = %cause, "recording the outcome failed, marking job failed");

        let fallback = Transition::Fail {
            error_detail: format!("storage error: {cause}"),
        };
        match self.write_terminal(running.clone(), fallback).await {
            Ok(state) => Processed::Completed(state),
            Err(e) => {
                tracing::error!(job_id = %running.id, error = %e, "job left RUNNING");
                Processed::Stranded
            }
        }
    }

    /// Up to [`TERMINAL_WRITE_ATTEMPTS`] tries. A lost revision race against
    /// a record that is still RUNNING is retried on top of the fresh copy.
    async fn write_terminal(&self, mut base: Job, transition: Transition) -> Result<JobState, JobError> {
        let mut last_error = None;
        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            let mut next = base.clone();
            StateMachine::apply(&mut next, transition.clone())?;
            match self.ctx.store.compare_and_set(&next).await {
                Ok(CasOutcome::Written(job)) => return Ok(job.state),
                Ok(CasOutcome::Conflict(Some(current))) if current.state == JobState::Running => {
                    base = current;
                }
                Ok(CasOutcome::Conflict(Some(current))) => {
                    tracing::warn!(job_id = %current.id, state = %current.state, "job finished by another writer");
                    return Ok(current.state);
                }
                Ok(CasOutcome::Conflict(None)) => return Err(StoreError::Conflict(base.id).into()),
                Err(e) => {
                    tracing::warn!(job_id = %base.id, attempt, error = %e, "terminal write failed");
                    last_error = Some(e);
                    tokio::time::sleep(self.ctx.settings.poll_interval * attempt).await;
                }
            }
        }
        Err(last_error.unwrap_or_else(|| StoreError::Conflict(base.id)).into())
    }

    /// PENDING → RUNNING. `None` if the job is not PENDING or another slot
    /// claimed it first.
    async fn claim(&self, mut job: Job) -> Result<Option<Job>, JobError> {
        if job.state != JobState::Pending {
            return Ok(None);
        }
        StateMachine::apply(&mut job, Transition::Start)?;
        match self.ctx.store.compare_and_set(&job).await? {
            CasOutcome::Written(running) => Ok(Some(running)),
            CasOutcome::Conflict(_) => Ok(None),
        }
    }

    /// Best effort: a failed progress write is logged and the job carries on.
    async fn record_progress(&self, current: Job, info: String) -> Job {
        let mut next = current.clone();
        if let Err(e) = StateMachine::apply(&mut next, Transition::Progress(info)) {
            tracing::warn!(job_id = %current.id, error = %e, "progress rejected");
            return current;
        }
        match self.ctx.store.compare_and_set(&next).await {
            Ok(CasOutcome::Written(job)) => job,
            Ok(CasOutcome::Conflict(_)) => {
                tracing::warn!(job_id = %current.id, "progress write lost a revision race");
                current
            }
            Err(e) => {
                tracing::warn!(job_id = %current.id, error = %e, "progress write failed");
                current
            }
        }
    }
}
