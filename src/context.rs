//! The handles every component works through, built once and passed down.

use std::sync::Arc;

use crate::broker::{Broker, FileBroker, MemoryBroker};
use crate::config::Settings;
use crate::error::JobError;
use crate::store::{FileStore, MemoryStore, StateStore};

/// Bundles the state store, the broker and the resolved settings.
#[derive(Debug)]
pub struct JobContext<S, B> {
    pub store: S,
    pub broker: B,
    pub settings: Settings,
}

impl<S: StateStore, B: Broker> JobContext<S, B> {
    pub fn new(store: S, broker: B, settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            store,
            broker,
            settings,
        })
    }
}

/// Context shared across processes through the directories in `settings`.
pub type FileContext = JobContext<FileStore, FileBroker>;

/// Context confined to one process.
pub type MemoryContext = JobContext<MemoryStore, MemoryBroker>;

impl FileContext {
    pub async fn open(settings: Settings) -> Result<Arc<Self>, JobError> {
        let store = FileStore::open(&settings.state_dir, settings.lock_timeout).await?;
        let broker = FileBroker::open(&settings.broker_dir, settings.poll_interval).await?;
        tracing::debug!(
            state_dir = %settings.state_dir.display(),
            broker_dir = %settings.broker_dir.display(),
            "opened file-backed job context"
        );
        Ok(Self::new(store, broker, settings))
    }
}

impl MemoryContext {
    pub fn in_memory(settings: Settings) -> Arc<Self> {
        Self::new(MemoryStore::new(), MemoryBroker::new(), settings)
    }
}
