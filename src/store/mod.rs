//! Shared key-value store of job records, the single source of truth for
//! job state.
//!
//! Writers never overwrite blindly: every update goes through
//! [`StateStore::compare_and_set`], which only lands if the caller read the
//! latest revision.

use std::future::Future;

use crate::error::StoreError;
use crate::state_machine::Job;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Result of a compare-and-set write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The write landed; carries the record as stored (new revision).
    Written(Job),
    /// Someone else wrote first. Carries the current record, if any.
    Conflict(Option<Job>),
}

pub trait StateStore: Send + Sync + 'static {
    /// Create a record. Fails with [`StoreError::AlreadyExists`] if the id is
    /// taken. Returns the stored record (revision 1).
    fn insert(&self, job: &Job) -> impl Future<Output = Result<Job, StoreError>> + Send;

    fn get(&self, id: &str) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// Replace the record for `job.id` if its stored revision still equals
    /// `job.revision`. The stored copy gets `job.revision + 1`.
    fn compare_and_set(&self, job: &Job)
    -> impl Future<Output = Result<CasOutcome, StoreError>> + Send;
}

/// `job` as a successful write stores it.
pub(crate) fn next_revision(job: &Job) -> Job {
    let mut next = job.clone();
    next.revision = job.revision + 1;
    next
}
