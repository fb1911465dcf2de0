//! Enqueue API: client-facing operations that persist new jobs and pulse
//! the processing server.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::model::{CronJob, JobId};
use crate::storage::Storage;
use crate::supervisor::ProcessingServer;

/// Client-facing surface: enqueue, schedule, and manage recurring jobs.
///
/// Every write goes through `Storage` in one transaction so readers never
/// observe a job without its queue entry, then pulses the supervisor.
pub struct EnqueueApi {
    storage: Arc<dyn Storage>,
    server: Arc<ProcessingServer>,
}

impl EnqueueApi {
    pub fn new(storage: Arc<dyn Storage>, server: Arc<ProcessingServer>) -> Self {
        Self { storage, server }
    }

    /// Persists a new job, eligible at `now + delay` (or immediately if `delay`
    /// is `None`), then wakes an idle worker.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        payload_version: i32,
        delay: Option<chrono::Duration>,
    ) -> Result<JobId, crate::error::StorageError> {
        let now = Utc::now();
        let due = delay.map(|d| now + d);
        let id = self
            .storage
            .enqueue(job_type, payload, payload_version, due, now)
            .await?;
        self.server.pulse();
        Ok(id)
    }

    /// Upserts a recurring job by its unique `name`, then wakes the cron
    /// worker immediately. Without this, a newly registered schedule that
    /// fires sooner than whatever the cron worker is currently sleeping
    /// toward would sit unpromoted until that earlier sleep elapses.
    pub async fn add_or_update(
        &self,
        name: impl Into<String>,
        cron_expr: impl Into<String>,
        job_type: impl Into<String>,
        payload: Value,
    ) -> Result<(), crate::error::StorageError> {
        self.storage
            .upsert_cron(CronJob {
                name: name.into(),
                cron_expr: cron_expr.into(),
                last_run: None,
                job_type: job_type.into(),
                payload,
            })
            .await?;
        self.server.pulse_cron();
        Ok(())
    }

    /// Deletes a recurring job by name.
    pub async fn remove(&self, name: &str) -> Result<(), crate::error::StorageError> {
        self.storage.remove_cron(name).await
    }
}

/// Plugs the processing server into `Dispatcher::dispatch_one`: any command
/// using `ExecutionMode::Background`/`Scheduled` elsewhere in the host
/// application lands here instead of a bespoke queue.
#[async_trait::async_trait]
impl seesaw_core::JobQueue for EnqueueApi {
    async fn enqueue(
        &self,
        payload: Value,
        spec: seesaw_core::JobSpec,
    ) -> anyhow::Result<uuid::Uuid> {
        Ok(self
            .enqueue(spec.job_type, payload, spec.version, None)
            .await?)
    }

    async fn schedule(
        &self,
        payload: Value,
        spec: seesaw_core::JobSpec,
        run_at: chrono::DateTime<Utc>,
    ) -> anyhow::Result<uuid::Uuid> {
        let delay = run_at - Utc::now();
        Ok(self
            .enqueue(spec.job_type, payload, spec.version, Some(delay))
            .await?)
    }
}
