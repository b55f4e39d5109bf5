use std::collections::HashMap;
use std::sync::Mutex;

use super::{CasOutcome, StateStore, next_revision};
use crate::error::StoreError;
use crate::state_machine::Job;

/// In-process store. Visible to every task holding the same instance but not
/// to other processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        // A panic while holding the lock cannot leave a half-written record:
        // every write is a single insert.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStore {
    async fn insert(&self, job: &Job) -> Result<Job, StoreError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.clone()));
        }
        let mut stored = job.clone();
        stored.revision = 1;
        jobs.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn compare_and_set(&self, job: &Job) -> Result<CasOutcome, StoreError> {
        let mut jobs = self.lock();
        match jobs.get(&job.id) {
            Some(current) if current.revision == job.revision => {
                let stored = next_revision(job);
                jobs.insert(stored.id.clone(), stored.clone());
                Ok(CasOutcome::Written(stored))
            }
            current => Ok(CasOutcome::Conflict(current.cloned())),
        }
    }
}
