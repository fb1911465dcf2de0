//! PostgreSQL `Storage` backend for `seesaw-processor`.
//!
//! Implements the literal relational reference schema: `jobs`, `job_queue`,
//! `cron_jobs`, `job_states`. Fetch uses the locking pattern (`SELECT ... FOR
//! UPDATE SKIP LOCKED`), but the claiming transaction commits the `Processing`
//! transition and the `job_queue` delete right away rather than staying open
//! for the duration of job execution — holding a pool connection per in-flight
//! job for an arbitrarily long user-code call isn't a trade worth making. That
//! means a worker killed after this commit but before its matching
//! `complete`/`retry`/`fail` call leaves the row claimed with nothing to pick
//! it back up; `claimed_at` plus [`PgStorage::reap_stale`] (wired into
//! `ProcessorConfig`'s lease duration) is what reclaims it.
//!
//! # Schema
//!
//! ```sql
//! CREATE TYPE job_state AS ENUM ('scheduled', 'processing', 'succeeded', 'failed');
//!
//! CREATE TABLE jobs (
//!     id UUID PRIMARY KEY,
//!     job_type TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     payload_version INTEGER NOT NULL DEFAULT 1,
//!     added TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     due TIMESTAMPTZ,
//!     retries BIGINT NOT NULL DEFAULT 0,
//!     state job_state NOT NULL DEFAULT 'scheduled',
//!     expires_at TIMESTAMPTZ,
//!     claimed_at TIMESTAMPTZ
//! );
//!
//! CREATE TABLE job_queue (
//!     id BIGSERIAL PRIMARY KEY,
//!     job_id UUID NOT NULL REFERENCES jobs(id)
//! );
//!
//! CREATE TABLE cron_jobs (
//!     id BIGSERIAL PRIMARY KEY,
//!     name TEXT UNIQUE NOT NULL,
//!     cron_expr TEXT NOT NULL,
//!     last_run TIMESTAMPTZ,
//!     job_type TEXT NOT NULL,
//!     payload JSONB NOT NULL
//! );
//!
//! CREATE TABLE job_states (
//!     id BIGSERIAL PRIMARY KEY,
//!     job_id UUID NOT NULL REFERENCES jobs(id),
//!     state job_state NOT NULL,
//!     reason TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE INDEX idx_job_queue_ready ON job_queue (job_id);
//!
//! -- Optional: only written to when the host opts in via
//! -- `ProcessorConfig::with_dead_letter_after_give_up`.
//! CREATE TABLE dead_jobs (
//!     id BIGSERIAL PRIMARY KEY,
//!     job_id UUID NOT NULL,
//!     job_type TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     reason TEXT NOT NULL,
//!     retries BIGINT NOT NULL,
//!     failed_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use seesaw_job_postgres::PgStorage;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/mydb").await?;
//! let storage = std::sync::Arc::new(PgStorage::new(pool));
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seesaw_processor::error::StorageError;
use seesaw_processor::model::{CronJob, DeadJobRow, Job, JobId, StateName};
use seesaw_processor::storage::Storage;
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// PostgreSQL-backed [`Storage`].
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool, for host-application migrations/health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps a `sqlx::Error` onto the two-way `StorageError` split: connection and
/// statement-timeout failures are transient; anything sqlx considers a database
/// error (missing table/column, type mismatch) is permanent, since it will not
/// clear up without an operator fixing the schema.
fn classify(error: sqlx::Error) -> StorageError {
    match &error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Transient(error.into())
        }
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StorageError::Transient(error.into())
        }
        _ => StorageError::Permanent(error.into()),
    }
}

fn state_to_sql(state: StateName) -> &'static str {
    match state {
        StateName::Scheduled => "scheduled",
        StateName::Processing => "processing",
        StateName::Succeeded => "succeeded",
        StateName::Failed => "failed",
    }
}

fn state_from_sql(raw: &str) -> Result<StateName, StorageError> {
    match raw {
        "scheduled" => Ok(StateName::Scheduled),
        "processing" => Ok(StateName::Processing),
        "succeeded" => Ok(StateName::Succeeded),
        "failed" => Ok(StateName::Failed),
        other => Err(StorageError::Permanent(anyhow::anyhow!(
            "unrecognized job_state value in database: {other}"
        ))),
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, StorageError> {
    Ok(Job {
        id: row.try_get("id").map_err(classify)?,
        job_type: row.try_get("job_type").map_err(classify)?,
        payload: row.try_get("payload").map_err(classify)?,
        payload_version: row.try_get("payload_version").map_err(classify)?,
        added: row.try_get("added").map_err(classify)?,
        due: row.try_get("due").map_err(classify)?,
        retries: row.try_get("retries").map_err(classify)?,
        state: state_from_sql(row.try_get::<String, _>("state").map_err(classify)?.as_str())?,
        expires_at: row.try_get("expires_at").map_err(classify)?,
        claimed_at: row.try_get("claimed_at").map_err(classify)?,
    })
}

#[async_trait]
impl Storage for PgStorage {
    async fn fetch_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let claimed = sqlx::query(
            r#"
            SELECT j.id, j.job_type, j.payload, j.payload_version, j.added,
                   j.due, j.retries, j.state::TEXT AS state, j.expires_at, j.claimed_at
            FROM jobs j
            JOIN job_queue q ON q.job_id = j.id
            WHERE j.state = 'scheduled'
              AND (j.due IS NULL OR j.due <= $1)
            ORDER BY q.id ASC
            LIMIT 1
            FOR UPDATE OF j SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;

        let Some(row) = claimed else {
            tx.commit().await.map_err(classify)?;
            return Ok(None);
        };

        let job = row_to_job(&row)?;

        sqlx::query("UPDATE jobs SET state = 'processing', claimed_at = $2 WHERE id = $1")
            .bind(job.id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        sqlx::query("DELETE FROM job_queue WHERE job_id = $1")
            .bind(job.id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        sqlx::query("INSERT INTO job_states (job_id, state, reason, created_at) VALUES ($1, 'processing', NULL, $2)")
            .bind(job.id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;

        tracing::debug!(job_id = %job.id, worker_id, "claimed job");
        Ok(Some(Job {
            state: StateName::Processing,
            claimed_at: Some(now),
            ..job
        }))
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, job_type, payload, payload_version, added, due, retries,
                   state::TEXT AS state, expires_at, claimed_at
            FROM jobs WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or(StorageError::NotFound(id))?;

        row_to_job(&row)
    }

    async fn complete(&self, id: JobId, now: DateTime<Utc>) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query("UPDATE jobs SET state = 'succeeded', expires_at = $2, claimed_at = NULL WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        sqlx::query("INSERT INTO job_states (job_id, state, reason, created_at) VALUES ($1, 'succeeded', NULL, $2)")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)
    }

    async fn retry(
        &self,
        id: JobId,
        retries: i64,
        due: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query("UPDATE jobs SET state = 'scheduled', retries = $2, due = $3, claimed_at = NULL WHERE id = $1")
            .bind(id)
            .bind(retries)
            .bind(due)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        sqlx::query("INSERT INTO job_queue (job_id) VALUES ($1)")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        sqlx::query("INSERT INTO job_states (job_id, state, reason, created_at) VALUES ($1, 'scheduled', $2, $3)")
            .bind(id)
            .bind(reason)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)
    }

    async fn fail(&self, id: JobId, reason: &str, now: DateTime<Utc>) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query("UPDATE jobs SET state = 'failed', expires_at = $2, claimed_at = NULL WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        sqlx::query("INSERT INTO job_states (job_id, state, reason, created_at) VALUES ($1, 'failed', $2, $3)")
            .bind(id)
            .bind(reason)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)
    }

    async fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        payload_version: i32,
        due: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<JobId, StorageError> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await.map_err(classify)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, payload, payload_version, added, due, retries, state)
            VALUES ($1, $2, $3, $4, $5, $6, 0, 'scheduled')
            "#,
        )
        .bind(id)
        .bind(job_type)
        .bind(&payload)
        .bind(payload_version)
        .bind(now)
        .bind(due)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query("INSERT INTO job_queue (job_id) VALUES ($1)")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        sqlx::query("INSERT INTO job_states (job_id, state, reason, created_at) VALUES ($1, 'scheduled', NULL, $2)")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(id)
    }

    async fn promote_cron(&self, name: &str, now: DateTime<Utc>) -> Result<JobId, StorageError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let cron = sqlx::query("SELECT job_type, payload FROM cron_jobs WHERE name = $1 FOR UPDATE")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?
            .ok_or_else(|| StorageError::Permanent(anyhow::anyhow!("no cron job named {name}")))?;

        let job_type: String = cron.try_get("job_type").map_err(classify)?;
        let payload: Value = cron.try_get("payload").map_err(classify)?;
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, payload, payload_version, added, due, retries, state)
            VALUES ($1, $2, $3, 1, $4, NULL, 0, 'scheduled')
            "#,
        )
        .bind(id)
        .bind(&job_type)
        .bind(&payload)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query("INSERT INTO job_queue (job_id) VALUES ($1)")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        sqlx::query("UPDATE cron_jobs SET last_run = $2 WHERE name = $1")
            .bind(name)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        sqlx::query("INSERT INTO job_states (job_id, state, reason, created_at) VALUES ($1, 'scheduled', NULL, $2)")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(id)
    }

    async fn upsert_cron(&self, cron: CronJob) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO cron_jobs (name, cron_expr, last_run, job_type, payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
            SET cron_expr = EXCLUDED.cron_expr,
                job_type = EXCLUDED.job_type,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(&cron.name)
        .bind(&cron.cron_expr)
        .bind(cron.last_run)
        .bind(&cron.job_type)
        .bind(&cron.payload)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn remove_cron(&self, name: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM cron_jobs WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn all_cron_jobs(&self) -> Result<Vec<CronJob>, StorageError> {
        let rows = sqlx::query("SELECT name, cron_expr, last_run, job_type, payload FROM cron_jobs")
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.into_iter()
            .map(|row| {
                Ok(CronJob {
                    name: row.try_get("name").map_err(classify)?,
                    cron_expr: row.try_get("cron_expr").map_err(classify)?,
                    last_run: row.try_get("last_run").map_err(classify)?,
                    job_type: row.try_get("job_type").map_err(classify)?,
                    payload: row.try_get("payload").map_err(classify)?,
                })
            })
            .collect()
    }

    async fn reap_stale(&self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let stale_ids: Vec<JobId> = sqlx::query(
            "SELECT id FROM jobs WHERE state = 'processing' AND claimed_at < $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(older_than)
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?
        .into_iter()
        .map(|row| row.try_get::<JobId, _>("id").map_err(classify))
        .collect::<Result<_, _>>()?;

        for id in &stale_ids {
            sqlx::query("UPDATE jobs SET state = 'scheduled', claimed_at = NULL WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
            sqlx::query("INSERT INTO job_queue (job_id) VALUES ($1)")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
            sqlx::query(
                "INSERT INTO job_states (job_id, state, reason, created_at) VALUES ($1, 'scheduled', $2, $3)",
            )
            .bind(id)
            .bind("reaped: worker lease expired")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(stale_ids.len() as u64)
    }

    async fn record_dead_letter(&self, row: DeadJobRow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO dead_jobs (job_id, job_type, payload, reason, retries, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(row.job_id)
        .bind(&row.job_type)
        .bind(&row.payload)
        .bind(&row.reason)
        .bind(row.retries)
        .bind(row.failed_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }
}

/// Maintenance helpers that sit outside the `Storage` contract: operational
/// queries an operator or a periodic maintenance task runs directly against
/// the pool, not part of the worker hot path.
impl PgStorage {
    /// Deletes terminal-state rows whose `expires_at` has passed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE state IN ('succeeded', 'failed')
              AND expires_at IS NOT NULL
              AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(result.rows_affected())
    }

    /// Counts jobs by state, for operational dashboards.
    pub async fn stats(&self) -> Result<QueueStats, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'scheduled') as scheduled,
                COUNT(*) FILTER (WHERE state = 'processing') as processing,
                COUNT(*) FILTER (WHERE state = 'succeeded') as succeeded,
                COUNT(*) FILTER (WHERE state = 'failed') as failed
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        Ok(QueueStats {
            scheduled: row.try_get("scheduled").map_err(classify)?,
            processing: row.try_get("processing").map_err(classify)?,
            succeeded: row.try_get("succeeded").map_err(classify)?,
            failed: row.try_get("failed").map_err(classify)?,
        })
    }
}

/// Snapshot of job counts by state.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub scheduled: i64,
    pub processing: i64,
    pub succeeded: i64,
    pub failed: i64,
}
