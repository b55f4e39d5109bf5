use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::error::JobFailure;

/// What a job body gets to work with.
#[derive(Debug, Clone, Copy)]
pub struct BodyInput<'a> {
    pub job_id: &'a str,
    pub input: &'a Path,
    pub output_dir: &'a Path,
}

/// A finished body: the artifact it produced and an optional one-line summary
/// that becomes the job's final `progress_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyOutput {
    pub artifact: PathBuf,
    pub summary: Option<String>,
}

/// Sends progress strings to the worker, which writes them into the job
/// record while it is RUNNING. Dropping it ends the stream.
#[derive(Debug, Clone)]
pub struct Progress {
    tx: mpsc::UnboundedSender<String>,
}

impl Progress {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sink that discards everything.
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn report(&self, info: impl Into<String>) {
        // The worker may have stopped listening; progress is best-effort.
        let _ = self.tx.send(info.into());
    }
}

/// The domain logic executed for each job.
///
/// Implementations recover from bad individual records themselves and
/// return `Err` only when the job as a whole cannot produce an artifact.
pub trait JobBody: Send + Sync + 'static {
    fn run(
        &self,
        input: BodyInput<'_>,
        progress: Progress,
    ) -> impl Future<Output = Result<BodyOutput, JobFailure>> + Send;
}
