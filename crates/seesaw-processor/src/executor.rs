//! Invocation: reconstitutes a job's invocation descriptor and runs it.
//!
//! The "target type identifier + method identifier + argument list" shape
//! is exactly `seesaw_core::job::{ClaimedJob, CommandRegistry}`: a
//! job-type string key, a JSON payload, and a schema version, deserialized
//! through a registry of constructors. "Materializing the target" and "invoking"
//! collapse into dispatching the reconstructed command to its registered
//! [`seesaw_core::Effect`] — the host application's `Dispatcher` already owns
//! that wiring, so the job worker only needs to run it inline.

use std::sync::Arc;

use seesaw_core::job::{ClaimedJob, CommandRegistry};
use seesaw_core::{AnyCommand, Dispatcher};

use crate::error::JobExecutionError;
use crate::model::Job;

/// Runs a reconstituted command. Implemented by [`DispatcherExecutor`]; kept as
/// a trait so workers don't need to be generic over the host's dependency type.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError>;
}

/// Adapts a `CommandRegistry` + `Dispatcher<D>` pair into a [`JobExecutor`].
pub struct DispatcherExecutor<D> {
    registry: Arc<CommandRegistry>,
    dispatcher: Arc<Dispatcher<D>>,
}

impl<D> DispatcherExecutor<D> {
    pub fn new(registry: Arc<CommandRegistry>, dispatcher: Arc<Dispatcher<D>>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }
}

#[async_trait::async_trait]
impl<D: Send + Sync + 'static> JobExecutor for DispatcherExecutor<D> {
    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        let claimed = ClaimedJob {
            id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            version: job.payload_version,
            attempt: (job.retries + 1) as i32,
        };

        let command: Box<dyn AnyCommand> = self.registry.deserialize(&claimed)?;

        // `dispatch`, not `dispatch_one`: a job worker runs the command's
        // registered effect inline regardless of its declared execution mode.
        // `dispatch_one` would instead re-enqueue Background/Scheduled commands,
        // which is only correct for the original caller, not for the worker
        // that already pulled the command off the durable queue.
        self.dispatcher
            .dispatch(vec![command])
            .await
            .map_err(JobExecutionError::Failed)
    }
}
