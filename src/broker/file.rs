use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use uuid::Uuid;

use super::{Broker, Delivery, JobRequest};
use crate::error::BrokerError;

/// Durable directory-backed queue, shared by every process that opens the
/// same path.
///
/// Layout:
/// - `ready/`   messages waiting for a worker
/// - `claimed/` messages handed to a worker and not yet acked
/// - `tmp/`     messages being written
///
/// A consumer claims a message by renaming it from `ready/` into `claimed/`;
/// the rename succeeds for exactly one consumer. Message names start with
/// the enqueue timestamp, so scans hand out older messages first.
#[derive(Debug, Clone)]
pub struct FileBroker {
    root: PathBuf,
    poll_interval: Duration,
    // Breaks timestamp ties between messages enqueued through this handle.
    seq: Arc<AtomicU64>,
}

impl FileBroker {
    pub async fn open(root: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, BrokerError> {
        let root = root.into();
        for sub in ["ready", "claimed", "tmp"] {
            tokio::fs::create_dir_all(root.join(sub)).await?;
        }
        Ok(Self {
            root,
            poll_interval,
            seq: Arc::new(AtomicU64::new(0)),
        })
    }

    fn ready(&self) -> PathBuf {
        self.root.join("ready")
    }

    fn claimed(&self) -> PathBuf {
        self.root.join("claimed")
    }

    /// Move every claimed-but-unacked message back to `ready/`, e.g. after a
    /// worker crash. Redelivery is a no-op for any job the crashed worker had
    /// already claimed in the store. Returns how many were moved.
    pub async fn requeue_claimed(&self) -> Result<usize, BrokerError> {
        let mut moved = 0;
        for name in Self::message_names(&self.claimed()).await? {
            match tokio::fs::rename(self.claimed().join(&name), self.ready().join(&name)).await {
                Ok(()) => moved += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(moved)
    }

    /// Messages currently waiting in `ready/`.
    pub async fn pending(&self) -> Result<usize, BrokerError> {
        Ok(Self::message_names(&self.ready()).await?.len())
    }

    async fn message_names(dir: &Path) -> Result<Vec<String>, BrokerError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// One pass over `ready/`. `None` when nothing could be claimed.
    async fn try_claim(&self) -> Result<Option<Delivery>, BrokerError> {
        for name in Self::message_names(&self.ready()).await? {
            let claimed = self.claimed().join(&name);
            match tokio::fs::rename(self.ready().join(&name), &claimed).await {
                Ok(()) => {}
                // Another consumer won this one.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            let bytes = tokio::fs::read(&claimed).await?;
            match serde_json::from_slice::<JobRequest>(&bytes) {
                Ok(request) => {
                    return Ok(Some(Delivery {
                        request,
                        receipt: name,
                    }));
                }
                Err(e) => {
                    tracing::warn!(message = %name, error = %e, "dropping malformed queue message");
                    let _ = tokio::fs::remove_file(&claimed).await;
                }
            }
        }
        Ok(None)
    }
}

impl Broker for FileBroker {
    async fn enqueue(&self, request: &JobRequest) -> Result<(), BrokerError> {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{stamp:020}-{seq:010}-{}.json", Uuid::new_v4());
        let tmp = self.root.join("tmp").join(&name);

        tokio::fs::write(&tmp, serde_json::to_vec(request)?).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.ready().join(&name)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, BrokerError> {
        loop {
            if let Some(delivery) = self.try_claim().await? {
                return Ok(delivery);
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        match tokio::fs::remove_file(self.claimed().join(&delivery.receipt)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves the message back to `ready/` under its original name, so it
    /// keeps its place in the order.
    async fn nack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let claimed = self.claimed().join(&delivery.receipt);
        match tokio::fs::rename(&claimed, self.ready().join(&delivery.receipt)).await {
            Ok(()) => Ok(()),
            // Already requeued or acked elsewhere.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
