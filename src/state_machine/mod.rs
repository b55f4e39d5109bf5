mod job;
mod state;

pub use job::{Job, JobId, JobState};
pub use state::{StateMachine, Transition};
