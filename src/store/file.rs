use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use uuid::Uuid;

use super::{CasOutcome, StateStore, next_revision};
use crate::error::StoreError;
use crate::state_machine::Job;

const LOCK_RETRY: Duration = Duration::from_millis(5);

/// Directory-backed store shared by every process that opens the same path.
///
/// Each job lives in `<dir>/<id>.json`. Writes go to a temp file that is
/// renamed over the record, so a reader sees either the old or the new
/// record and never a torn one. Writers to the same id serialize on
/// `<dir>/<id>.lock`, created with `create_new`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FileStore {
    pub async fn open(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, lock_timeout })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids are used as file names, so only UUID-shaped ids are addressable.
    fn record_path(&self, id: &str) -> Option<PathBuf> {
        let valid = !id.is_empty()
            && id.len() <= 64
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        valid.then(|| self.dir.join(format!("{id}.json")))
    }

    async fn lock(&self, id: &str) -> Result<LockGuard, StoreError> {
        let path = self.dir.join(format!("{id}.lock"));
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(LockGuard { path: Some(path) }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::LockTimeout(id.to_string()));
                    }
                    sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn read(path: &Path) -> Result<Option<Job>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &Path, job: &Job) -> Result<(), StoreError> {
        let tmp = self.dir.join(format!(".{}.{}.tmp", job.id, Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn invalid_id(id: &str) -> StoreError {
        StoreError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("invalid job id: {id:?}"),
        ))
    }
}

/// Held lock file for one job id. Call [`LockGuard::release`] once the write
/// is done.
struct LockGuard {
    path: Option<PathBuf>,
}

impl LockGuard {
    async fn release(mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to release job lock");
            }
        }
    }
}

impl Drop for LockGuard {
    // Only reached when the holding future is dropped before `release`.
    // The removal is a single blocking unlink on the runtime thread.
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to release job lock");
            }
        }
    }
}

impl StateStore for FileStore {
    async fn insert(&self, job: &Job) -> Result<Job, StoreError> {
        let path = self.record_path(&job.id).ok_or_else(|| Self::invalid_id(&job.id))?;
        let guard = self.lock(&job.id).await?;

        let outcome = async {
            if tokio::fs::try_exists(&path).await? {
                return Err(StoreError::AlreadyExists(job.id.clone()));
            }
            let mut stored = job.clone();
            stored.revision = 1;
            self.write(&path, &stored).await?;
            Ok(stored)
        }
        .await;
        guard.release().await;
        outcome
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        match self.record_path(id) {
            Some(path) => Self::read(&path).await,
            None => Ok(None),
        }
    }

    async fn compare_and_set(&self, job: &Job) -> Result<CasOutcome, StoreError> {
        let path = self.record_path(&job.id).ok_or_else(|| Self::invalid_id(&job.id))?;
        let guard = self.lock(&job.id).await?;

        let outcome = async {
            match Self::read(&path).await? {
                Some(current) if current.revision == job.revision => {
                    let stored = next_revision(job);
                    self.write(&path, &stored).await?;
                    Ok(CasOutcome::Written(stored))
                }
                current => Ok(CasOutcome::Conflict(current)),
            }
        }
        .await;
        guard.release().await;
        outcome
    }
}
