use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;

use super::{JobBody, Worker};
use crate::broker::Broker;
use crate::context::JobContext;
use crate::error::JobError;
use crate::store::StateStore;

/// A fixed number of worker slots sharing one context and one body.
pub struct WorkerPool<S, B, J> {
    ctx: Arc<JobContext<S, B>>,
    body: Arc<J>,
    slots: usize,
}

impl<S: StateStore, B: Broker, J: JobBody> WorkerPool<S, B, J> {
    pub fn new(ctx: Arc<JobContext<S, B>>, body: J) -> Self {
        let slots = ctx.settings.workers.max(1);
        Self {
            ctx,
            body: Arc::new(body),
            slots,
        }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots.max(1);
        self
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Run every slot until `shutdown` fires or the broker closes, then wait
    /// for in-flight jobs to finish.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), JobError> {
        let mut join = JoinSet::new();
        for slot in 0..self.slots {
            let worker = Worker::new(Arc::clone(&self.ctx), Arc::clone(&self.body), slot);
            let shutdown = shutdown.clone();
            join.spawn(async move { worker.run(shutdown).await });
        }
        tracing::info!(slots = self.slots, "worker pool running");

        let mut first_error = None;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "worker slot exited with an error");
                    first_error.get_or_insert(e);
                }
                Err(e) => tracing::error!(error = %e, "worker slot panicked"),
            }
        }
        tracing::info!("worker pool drained");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
