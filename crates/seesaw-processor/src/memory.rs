//! In-memory [`Storage`] double for unit and scenario tests.
//!
//! Grounded on the host crate's `MockJobStore`: a `Mutex`-guarded in-memory
//! table plus a handful of query helpers, so the scenario tests don't need a
//! live database to assert on job lifecycle transitions.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StorageError;
use crate::model::{CronJob, DeadJobRow, Job, JobId, StateName, StateRow};
use crate::storage::Storage;

struct Inner {
    jobs: HashMap<JobId, Job>,
    queue: Vec<JobId>,
    cron: HashMap<String, CronJob>,
    history: Vec<StateRow>,
    dead_letters: Vec<DeadJobRow>,
}

/// An in-memory [`Storage`] implementation. Not for production use: state is
/// lost on process exit and there is no cross-process coordination.
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                queue: Vec::new(),
                cron: HashMap::new(),
                history: Vec::new(),
                dead_letters: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seeds a job directly, bypassing `enqueue`, for tests that need to
    /// control `id`/`added`/`due` precisely.
    pub fn seed(&self, job: Job) {
        let mut inner = self.lock();
        if job.state == StateName::Scheduled {
            inner.queue.push(job.id);
        }
        inner.jobs.insert(job.id, job);
    }

    /// Current state of a job, for test assertions.
    pub fn state_of(&self, id: JobId) -> Option<StateName> {
        self.lock().jobs.get(&id).map(|j| j.state)
    }

    /// Full audit trail in emission order, for test assertions.
    pub fn history(&self) -> Vec<StateRow> {
        self.lock().history.clone()
    }

    /// Number of jobs currently sitting in the queue, for test assertions.
    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Dead-job sink contents, for test assertions.
    pub fn dead_letters(&self) -> Vec<DeadJobRow> {
        self.lock().dead_letters.clone()
    }

    fn push_state(inner: &mut Inner, job_id: JobId, state: StateName, reason: Option<String>, now: DateTime<Utc>) {
        inner.history.push(StateRow {
            job_id,
            state,
            reason,
            created_at: now,
        });
    }
}

#[async_trait::async_trait]
impl Storage for InMemoryStorage {
    async fn fetch_next(&self, _worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>, StorageError> {
        let mut inner = self.lock();
        let position = inner.queue.iter().position(|id| {
            inner
                .jobs
                .get(id)
                .map(|job| job.is_eligible(now))
                .unwrap_or(false)
        });

        let Some(position) = position else {
            return Ok(None);
        };

        let job_id = inner.queue.remove(position);
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(StorageError::NotFound(job_id))?;
        job.state = StateName::Processing;
        job.claimed_at = Some(now);
        let snapshot = job.clone();
        Self::push_state(&mut inner, job_id, StateName::Processing, None, now);
        Ok(Some(snapshot))
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StorageError> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn complete(&self, id: JobId, now: DateTime<Utc>) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        job.state = StateName::Succeeded;
        job.expires_at = Some(now);
        job.claimed_at = None;
        Self::push_state(&mut inner, id, StateName::Succeeded, None, now);
        Ok(())
    }

    async fn retry(&self, id: JobId, retries: i64, due: DateTime<Utc>, reason: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        job.retries = retries;
        job.due = Some(due);
        job.state = StateName::Scheduled;
        job.claimed_at = None;
        let now = Utc::now();
        Self::push_state(&mut inner, id, StateName::Scheduled, Some(reason.to_string()), now);
        inner.queue.push(id);
        Ok(())
    }

    async fn fail(&self, id: JobId, reason: &str, now: DateTime<Utc>) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        job.state = StateName::Failed;
        job.expires_at = Some(now);
        job.claimed_at = None;
        Self::push_state(&mut inner, id, StateName::Failed, Some(reason.to_string()), now);
        Ok(())
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
        let job = Job {
            id,
            job_type: job_type.to_string(),
            payload,
            payload_version,
            added: now,
            due,
            retries: 0,
            state: StateName::Scheduled,
            expires_at: None,
            claimed_at: None,
        };

        let mut inner = self.lock();
        inner.queue.push(id);
        inner.jobs.insert(id, job);
        Self::push_state(&mut inner, id, StateName::Scheduled, None, now);
        Ok(id)
    }

    async fn promote_cron(&self, name: &str, now: DateTime<Utc>) -> Result<JobId, StorageError> {
        let mut inner = self.lock();
        let cron = inner
            .cron
            .get_mut(name)
            .ok_or_else(|| StorageError::Permanent(anyhow::anyhow!("no cron job named {name}")))?;
        cron.last_run = Some(now);
        let job_type = cron.job_type.clone();
        let payload = cron.payload.clone();

        let id = Uuid::new_v4();
        let job = Job {
            id,
            job_type,
            payload,
            payload_version: 1,
            added: now,
            due: None,
            retries: 0,
            state: StateName::Scheduled,
            expires_at: None,
            claimed_at: None,
        };
        inner.queue.push(id);
        inner.jobs.insert(id, job);
        Self::push_state(&mut inner, id, StateName::Scheduled, None, now);
        Ok(id)
    }

    async fn upsert_cron(&self, cron: CronJob) -> Result<(), StorageError> {
        self.lock().cron.insert(cron.name.clone(), cron);
        Ok(())
    }

    async fn remove_cron(&self, name: &str) -> Result<(), StorageError> {
        self.lock().cron.remove(name);
        Ok(())
    }

    async fn all_cron_jobs(&self) -> Result<Vec<CronJob>, StorageError> {
        Ok(self.lock().cron.values().cloned().collect())
    }

    async fn reap_stale(&self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut inner = self.lock();
        let stale: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|job| {
                job.state == StateName::Processing
                    && job.claimed_at.map(|claimed| claimed < older_than).unwrap_or(false)
            })
            .map(|job| job.id)
            .collect();

        for id in &stale {
            let job = inner.jobs.get_mut(id).expect("id came from the same map");
            job.state = StateName::Scheduled;
            job.claimed_at = None;
            inner.queue.push(*id);
            Self::push_state(
                &mut inner,
                *id,
                StateName::Scheduled,
                Some("reaped: worker lease expired".to_string()),
                now,
            );
        }

        Ok(stale.len() as u64)
    }

    async fn record_dead_letter(&self, row: DeadJobRow) -> Result<(), StorageError> {
        self.lock().dead_letters.push(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn enqueue_then_fetch_claims_the_job() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        let id = storage
            .enqueue("test:echo", serde_json::json!({"msg": "hi"}), 1, None, now)
            .await
            .unwrap();

        let fetched = storage.fetch_next("worker-0", now).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.state, StateName::Processing);
        assert_eq!(storage.queue_len(), 0);
    }

    #[tokio::test]
    async fn fetch_respects_due_time() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        storage
            .enqueue("test:echo", serde_json::json!({}), 1, Some(now + Duration::seconds(30)), now)
            .await
            .unwrap();

        assert!(storage.fetch_next("worker-0", now).await.unwrap().is_none());
        let later = now + Duration::seconds(31);
        assert!(storage.fetch_next("worker-0", later).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn exclusive_claim_removes_from_queue_before_any_second_fetch() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        storage
            .enqueue("test:echo", serde_json::json!({}), 1, None, now)
            .await
            .unwrap();

        let first = storage.fetch_next("worker-0", now).await.unwrap();
        let second = storage.fetch_next("worker-1", now).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn retry_requeues_with_advanced_due() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        let id = storage
            .enqueue("test:echo", serde_json::json!({}), 1, None, now)
            .await
            .unwrap();
        storage.fetch_next("worker-0", now).await.unwrap();

        let due = now + Duration::seconds(45);
        storage.retry(id, 1, due, "boom").await.unwrap();

        assert_eq!(storage.state_of(id), Some(StateName::Scheduled));
        assert_eq!(storage.queue_len(), 1);
        assert!(storage.fetch_next("worker-0", now).await.unwrap().is_none());
        assert!(storage.fetch_next("worker-0", due + Duration::seconds(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reap_stale_requeues_a_claim_whose_worker_never_came_back() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        let id = storage
            .enqueue("test:echo", serde_json::json!({}), 1, None, now)
            .await
            .unwrap();
        storage.fetch_next("worker-0", now).await.unwrap();
        assert_eq!(storage.state_of(id), Some(StateName::Processing));

        let lease_cutoff = now + Duration::minutes(5);
        let reaped = storage
            .reap_stale(lease_cutoff, now + Duration::minutes(6))
            .await
            .unwrap();

        assert_eq!(reaped, 1);
        assert_eq!(storage.state_of(id), Some(StateName::Scheduled));
        assert_eq!(storage.queue_len(), 1);
        assert!(storage
            .fetch_next("worker-1", now + Duration::minutes(6))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn reap_stale_leaves_fresh_claims_alone() {
        let storage = InMemoryStorage::new();
        let now = Utc::now();
        storage
            .enqueue("test:echo", serde_json::json!({}), 1, None, now)
            .await
            .unwrap();
        storage.fetch_next("worker-0", now).await.unwrap();

        let reaped = storage
            .reap_stale(now - Duration::minutes(5), now)
            .await
            .unwrap();
        assert_eq!(reaped, 0);
    }

    #[tokio::test]
    async fn cron_round_trip_promotes_a_job() {
        let storage = InMemoryStorage::new();
        storage
            .upsert_cron(CronJob {
                name: "nightly".into(),
                cron_expr: "0 0 0 * * *".into(),
                last_run: None,
                job_type: "test:echo".into(),
                payload: serde_json::json!({}),
            })
            .await
            .unwrap();

        let now = Utc::now();
        let job_id = storage.promote_cron("nightly", now).await.unwrap();
        assert_eq!(storage.state_of(job_id), Some(StateName::Scheduled));

        let crons = storage.all_cron_jobs().await.unwrap();
        assert_eq!(crons[0].last_run, Some(now));
    }
}
