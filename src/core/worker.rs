use tokio::task::{self, JoinHandle};
use tracing::error;

use crate::core::error::AgentError;

/// One blocking collaborator call isolated on the blocking thread pool.
/// The join handle doubles as the write-once result slot: the worker is
/// the only writer, the bridge the only reader. Dropping the cell abandons
/// the worker; the call runs to completion and its result is discarded.
pub struct WorkerCell {
    handle: JoinHandle<Result<String, AgentError>>,
}

impl WorkerCell {
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<String, AgentError> + Send + 'static,
    {
        Self {
            handle: task::spawn_blocking(work),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Consumes the cell and reads the result slot. Call only after
    /// `is_finished` turned true; a worker panic is converted into an
    /// execution failure here instead of crossing into the driving loop.
    pub async fn take_result(self) -> Result<String, AgentError> {
        match self.handle.await {
            Ok(result) => result,
            Err(join_err) => {
                error!("[WORKER] collaborator aborted: {}", join_err);
                let reason = if join_err.is_panic() {
                    "worker panicked during execution"
                } else {
                    "worker was cancelled before completing"
                };
                Err(AgentError::Execution(reason.to_string()))
            }
        }
    }
}
