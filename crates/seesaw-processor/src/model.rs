//! Durable job records and the state names they move through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, totally-ordered job identifier.
pub type JobId = Uuid;

/// Lifecycle stage of a job. Transitions are journaled in [`StateRow`].
///
/// ```text
/// Scheduled -> Processing -> Succeeded   (terminal)
/// Scheduled -> Processing -> Failed      (terminal)
/// Scheduled -> Processing -> Scheduled   (retry; due advanced)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateName {
    Scheduled,
    Processing,
    Succeeded,
    Failed,
}

impl StateName {
    pub fn is_terminal(self) -> bool {
        matches!(self, StateName::Succeeded | StateName::Failed)
    }
}

impl std::fmt::Display for StateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StateName::Scheduled => "Scheduled",
            StateName::Processing => "Processing",
            StateName::Succeeded => "Succeeded",
            StateName::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// A persisted unit of work with retry and state metadata.
///
/// `data` is the opaque invocation descriptor: the job-type string plus its
/// serialized payload, interpreted only by the registered command deserializer
/// (see `seesaw_core::job::CommandRegistry`). The processor never inspects it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub payload_version: i32,
    pub added: DateTime<Utc>,
    pub due: Option<DateTime<Utc>>,
    pub retries: i64,
    pub state: StateName,
    pub expires_at: Option<DateTime<Utc>>,
    /// When a worker claimed this job (moved it to `Processing`). `None` once
    /// it returns to `Scheduled` or reaches a terminal state. A reaper uses
    /// this to requeue jobs whose claiming worker never came back.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A job's due time as seen by the retry formula: relative to its original
    /// `added` timestamp, not the current attempt's clock.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == StateName::Scheduled && self.due.map(|due| due <= now).unwrap_or(true)
    }
}

/// Append-only audit row recorded on every state transition.
#[derive(Debug, Clone)]
pub struct StateRow {
    pub job_id: JobId,
    pub state: StateName,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A job that exhausted its retry budget (or opted out of retries), recorded
/// for operator inspection. Optional, never consulted by the runtime itself;
/// writing one never alters the job's own `Failed` state transition.
#[derive(Debug, Clone)]
pub struct DeadJobRow {
    pub job_id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub reason: String,
    pub retries: i64,
    pub failed_at: DateTime<Utc>,
}

/// A recurring template that emits new [`Job`]s on its schedule.
///
/// `name` is the process-wide unique key used by `AddOrUpdate`/`Remove`.
#[derive(Debug, Clone)]
pub struct CronJob {
    pub name: String,
    pub cron_expr: String,
    pub last_run: Option<DateTime<Utc>>,
    pub job_type: String,
    pub payload: serde_json::Value,
}
