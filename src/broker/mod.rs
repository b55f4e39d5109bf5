//! Message channel carrying job requests from the dispatcher to workers.
//!
//! Delivery is at-least-once: a request may be handed out more than once,
//! and workers guard against that by checking the stored job state before
//! running anything. There is no ordering guarantee across job ids.

use std::future::Future;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::state_machine::JobId;

mod file;
mod memory;

pub use file::FileBroker;
pub use memory::MemoryBroker;

/// The wire message: which job to run and where its input lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: JobId,
    pub input_reference: PathBuf,
}

/// A dequeued request plus the receipt needed to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub request: JobRequest,
    pub receipt: String,
}

pub trait Broker: Send + Sync + 'static {
    fn enqueue(&self, request: &JobRequest) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Wait for the next request. Returns [`BrokerError::Closed`] once the
    /// broker is shut and drained.
    fn dequeue(&self) -> impl Future<Output = Result<Delivery, BrokerError>> + Send;

    /// Mark a delivery as processed so it is not handed out again.
    fn ack(&self, delivery: &Delivery) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Hand an unprocessed delivery back so it is redelivered.
    fn nack(&self, delivery: &Delivery) -> impl Future<Output = Result<(), BrokerError>> + Send;
}
