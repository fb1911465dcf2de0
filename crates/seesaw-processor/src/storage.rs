//! Storage contract: durable queue + job record CRUD with transactional semantics.
//!
//! A `Connection` / `Transaction` / `FetchedJob` object graph is collapsed into
//! a single async trait whose methods each carry their own transactional
//! boundary. A `self: Box<Self>`-consuming handle buys no extra safety here that an
//! owned [`Job`] struct plus a method call enforcing exactly-one-release doesn't
//! already provide, and it avoids object-safety ceremony that doesn't pay for itself
//! in Rust. Each method below is implemented as one backing transaction, and
//! `fetch_next` commits the `Processing` transition before the caller runs the
//! job — the claim is not held open for the duration of execution. A job whose
//! worker dies between that commit and its matching `complete`/`retry`/`fail`
//! call is stranded in `Processing` with no queue entry until [`Storage::reap_stale`]
//! requeues it; nothing implicitly requeues it on its own.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StorageError;
use crate::model::{CronJob, DeadJobRow, Job, JobId};

/// Durable queue and job-record storage. Implementations must guarantee that
/// `fetch_next` hands any given eligible job to at most one caller at a time
/// (`FOR UPDATE SKIP LOCKED`, a destructive `DELETE ... RETURNING`, or equivalent).
#[async_trait::async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Transactionally claims one job whose `due` is null or past and whose
    /// state is `Scheduled`, transitioning it to `Processing` and writing the
    /// audit row in the same transaction. Returns `None` if no eligible row exists.
    async fn fetch_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>, StorageError>;

    /// Hydrates a job by id, for diagnostics and tests.
    async fn get_job(&self, id: JobId) -> Result<Job, StorageError>;

    /// Records a terminal success: transitions to `Succeeded`, sets `expires_at`,
    /// and removes the queue entry, in one transaction.
    async fn complete(&self, id: JobId, now: DateTime<Utc>) -> Result<(), StorageError>;

    /// Records a retriable failure: persists the advanced `retries`/`due`, writes
    /// the `Scheduled` audit row with `reason`, and reinserts the queue entry.
    async fn retry(
        &self,
        id: JobId,
        retries: i64,
        due: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), StorageError>;

    /// Records a terminal give-up: transitions to `Failed`, sets `expires_at`,
    /// removes the queue entry, in one transaction.
    async fn fail(&self, id: JobId, reason: &str, now: DateTime<Utc>) -> Result<(), StorageError>;

    /// Creates a new `Scheduled` job and its queue entry in one transaction.
    /// `due = None` means immediately eligible.
    async fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        payload_version: i32,
        due: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<JobId, StorageError>;

    /// Promotes a due cron entry into an ordinary `Scheduled` job with
    /// `due = None`, and updates `last_run = now`, in one transaction.
    async fn promote_cron(&self, name: &str, now: DateTime<Utc>) -> Result<JobId, StorageError>;

    /// Upserts a `CronJob` row by its unique `name`.
    async fn upsert_cron(&self, cron: CronJob) -> Result<(), StorageError>;

    /// Deletes a `CronJob` row by name. A no-op if the name doesn't exist.
    async fn remove_cron(&self, name: &str) -> Result<(), StorageError>;

    /// All currently registered cron jobs, for computing the cron worker's next wake.
    async fn all_cron_jobs(&self) -> Result<Vec<CronJob>, StorageError>;

    /// Requeues every `Processing` job whose `claimed_at` is older than
    /// `older_than`, reinserting its queue entry and writing a `Scheduled`
    /// audit row, in one transaction per job. Returns the number reaped.
    ///
    /// This is what prevents a worker killed between `fetch_next` and its
    /// matching `complete`/`retry`/`fail` call from stranding the job
    /// forever: `fetch_next` has already committed the `Processing`
    /// transition, so nothing else will pick the row back up on its own.
    async fn reap_stale(&self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, StorageError>;

    /// Appends a row to the dead-job sink, called on give-up when the host
    /// opts in via `ProcessorConfig::with_dead_letter_after_give_up`. Never
    /// consulted by the runtime; purely an operator-facing record. The
    /// default no-op lets a `Storage` implementation skip it entirely, since
    /// the dead-job queue's existence is left open to the implementer.
    async fn record_dead_letter(&self, _row: DeadJobRow) -> Result<(), StorageError> {
        Ok(())
    }
}
