use std::fmt;
use std::path::PathBuf;

use chrono::Utc;

use super::job::{Job, JobState};
use crate::error::TransitionError;

/// A requested change to a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// PENDING → RUNNING, taken by the worker that owns the delivery.
    Start,
    /// Overwrite `progress_info`; RUNNING only.
    Progress(String),
    /// RUNNING → SUCCESS, recording the produced artifact.
    Succeed {
        result_reference: PathBuf,
        summary: Option<String>,
    },
    /// PENDING | RUNNING → FAILURE.
    Fail { error_detail: String },
}

impl Transition {
    /// The state this transition lands in.
    pub fn target(&self) -> JobState {
        match self {
            Transition::Start | Transition::Progress(_) => JobState::Running,
            Transition::Succeed { .. } => JobState::Success,
            Transition::Fail { .. } => JobState::Failure,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Start => write!(f, "start"),
            Transition::Progress(_) => write!(f, "progress"),
            Transition::Succeed { .. } => write!(f, "succeed"),
            Transition::Fail { .. } => write!(f, "fail"),
        }
    }
}

/// Guards every mutation of a `Job` so states only ever move forward.
pub struct StateMachine;

impl StateMachine {
    /// Apply `transition` to `job` in place.
    ///
    /// - `Start` is legal only from PENDING.
    /// - `Progress` is legal only while RUNNING.
    /// - `Succeed` is legal only from RUNNING and sets `result_reference`.
    /// - `Fail` is legal from PENDING (enqueue failure) or RUNNING.
    /// - Terminal states reject everything.
    ///
    /// On error the job is left untouched.
    pub fn apply(job: &mut Job, transition: Transition) -> Result<(), TransitionError> {
        let legal = matches!(
            (job.state, &transition),
            (JobState::Pending, Transition::Start)
                | (JobState::Running, Transition::Progress(_))
                | (JobState::Running, Transition::Succeed { .. })
                | (JobState::Pending | JobState::Running, Transition::Fail { .. })
        );
        if !legal {
            return Err(TransitionError {
                job_id: job.id.clone(),
                from: job.state,
                transition: transition.to_string(),
            });
        }

        let now = Utc::now();
        let target = transition.target();
        if target != job.state {
            job.history.push(job.state);
            job.state = target;
        }

        match transition {
            Transition::Start => {
                job.started_at = Some(now);
                job.progress_info = None;
            }
            Transition::Progress(info) => {
                job.progress_info = Some(info);
            }
            Transition::Succeed {
                result_reference,
                summary,
            } => {
                job.result_reference = Some(result_reference);
                if summary.is_some() {
                    job.progress_info = summary;
                }
                job.finished_at = Some(now);
            }
            Transition::Fail { error_detail } => {
                job.error_detail = Some(error_detail);
                job.finished_at = Some(now);
            }
        }
        job.updated_at = now;

        Ok(())
    }
}
