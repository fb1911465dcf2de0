//! Delayed job worker: one of N parallel workers.
//!
//! Each iteration drains the queue to empty, then marks itself `Waiting` and
//! blocks on `{pulse, cancellation, polling timeout}`. The supervisor
//! (`InfiniteRetryProcessor`, see `supervisor.rs`) re-invokes the iteration in
//! a loop, so this type only needs to implement one pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{JobExecutionError, StorageError};
use crate::executor::JobExecutor;
use crate::model::Job;
use crate::pulse::Pulse;
use crate::retry::{self, RetryBehavior, RetryRegistry};
use crate::storage::Storage;

/// One delayed job worker. Stateless between iterations except for the
/// `watch::Receiver` it holds to observe supervisor-wide cancellation.
pub struct DelayedWorker {
    index: usize,
    worker_id: String,
    storage: Arc<dyn Storage>,
    executor: Arc<dyn JobExecutor>,
    retry_registry: Arc<RetryRegistry>,
    default_retry: RetryBehavior,
    pulse: Arc<Pulse>,
    polling_delay: Duration,
    dead_letter_after_give_up: bool,
    stopping: watch::Receiver<bool>,
}

impl DelayedWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        storage: Arc<dyn Storage>,
        executor: Arc<dyn JobExecutor>,
        retry_registry: Arc<RetryRegistry>,
        default_retry: RetryBehavior,
        pulse: Arc<Pulse>,
        polling_delay: Duration,
        dead_letter_after_give_up: bool,
        stopping: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id: format!("worker-{index}"),
            index,
            storage,
            executor,
            retry_registry,
            default_retry,
            pulse,
            polling_delay,
            dead_letter_after_give_up,
            stopping,
        }
    }

    /// One supervised pass: drain to empty, then wait once. Propagates
    /// `StorageError` to the caller, which is expected to be the
    /// `InfiniteRetryProcessor` wrapper (it logs, backs off, and re-invokes).
    pub async fn run_once(&mut self) -> Result<(), StorageError> {
        self.drain().await?;

        if *self.stopping.borrow() {
            return Ok(());
        }

        self.pulse.mark_waiting(self.index);
        tokio::select! {
            _ = self.pulse.wait(self.polling_delay) => {}
            _ = self.stopping.changed() => {}
        }
        self.pulse.mark_active(self.index);
        Ok(())
    }

    async fn drain(&self) -> Result<(), StorageError> {
        loop {
            if *self.stopping.borrow() {
                return Ok(());
            }

            let now = Utc::now();
            let job = match self.storage.fetch_next(&self.worker_id, now).await? {
                Some(job) => job,
                None => return Ok(()),
            };

            self.process(job).await?;
        }
    }

    /// Runs one job to completion and persists the outcome. A storage error
    /// here — on `complete`, `retry`, or `fail` — is propagated rather than
    /// swallowed: the job's claim stays in `Processing` with nothing else
    /// watching it, so the caller must back off and retry the whole pass
    /// rather than move on as if the transition had landed. `reap_stale`
    /// is what eventually reclaims the claim if the process dies here.
    async fn process(&self, job: Job) -> Result<(), StorageError> {
        let started = std::time::Instant::now();

        match self.executor.execute(&job).await {
            Ok(()) => {
                self.storage.complete(job.id, Utc::now()).await?;
                info!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job succeeded"
                );
                Ok(())
            }
            Err(JobExecutionError::Deserialization(e)) => {
                warn!(job_id = %job.id, error = %e, "invocation could not be deserialized; failing without retry");
                self.storage.fail(job.id, &e.to_string(), Utc::now()).await
            }
            Err(JobExecutionError::Failed(e)) => self.handle_user_failure(&job, &e).await,
        }
    }

    async fn handle_user_failure(&self, job: &Job, error: &anyhow::Error) -> Result<(), StorageError> {
        let behavior = self
            .retry_registry
            .behavior_for(&job.job_type, self.default_retry);

        match retry::decide(&behavior, job.added, job.retries) {
            retry::RetryDecision::Retry { retries, due } => {
                warn!(job_id = %job.id, attempt = retries, due = %due, error = %error, "job failed; scheduled retry");
                self.storage.retry(job.id, retries, due, &error.to_string()).await
            }
            retry::RetryDecision::GiveUp => {
                error!(job_id = %job.id, error = %error, "job exhausted its retry budget");
                let now = Utc::now();
                self.storage.fail(job.id, &error.to_string(), now).await?;
                if self.dead_letter_after_give_up {
                    let row = crate::model::DeadJobRow {
                        job_id: job.id,
                        job_type: job.job_type.clone(),
                        payload: job.payload.clone(),
                        reason: error.to_string(),
                        retries: job.retries,
                        failed_at: now,
                    };
                    if let Err(store_err) = self.storage.record_dead_letter(row).await {
                        error!(job_id = %job.id, error = %store_err, "failed to record dead-job entry");
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use crate::model::StateName;
    use seesaw_core::job::DeserializationError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executes according to a fixed, per-call-site outcome; every call is
    /// counted so tests can assert on attempt counts.
    struct FakeExecutor {
        calls: AtomicUsize,
        outcome: fn(attempt: usize) -> Result<(), JobExecutionError>,
    }

    impl FakeExecutor {
        fn new(outcome: fn(attempt: usize) -> Result<(), JobExecutionError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl JobExecutor for FakeExecutor {
        async fn execute(&self, _job: &Job) -> Result<(), JobExecutionError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.outcome)(attempt)
        }
    }

    fn make_worker(
        storage: Arc<dyn Storage>,
        executor: Arc<dyn JobExecutor>,
        default_retry: RetryBehavior,
    ) -> DelayedWorker {
        let (_stop_tx, stop_rx) = watch::channel(false);
        DelayedWorker::new(
            0,
            storage,
            executor,
            Arc::new(RetryRegistry::new()),
            default_retry,
            Arc::new(Pulse::new(1)),
            Duration::from_millis(10),
            false,
            stop_rx,
        )
    }

    /// Drives `fetch_next`/`process` directly with a synthetic, ever-advancing
    /// clock so the test never waits on real wall-clock `due` backoff.
    async fn drain_with_synthetic_clock(worker: &DelayedWorker, storage: &InMemoryStorage) {
        let mut now = Utc::now();
        loop {
            now += chrono::Duration::days(1);
            match storage.fetch_next("worker-0", now).await.unwrap() {
                Some(job) => worker.process(job).await.unwrap(),
                None => return,
            }
        }
    }

    #[tokio::test]
    async fn always_failing_job_exhausts_retry_budget_then_fails() {
        let storage = Arc::new(InMemoryStorage::new());
        let executor: Arc<dyn JobExecutor> = Arc::new(FakeExecutor::new(|_| {
            Err(JobExecutionError::Failed(anyhow::anyhow!("boom")))
        }));
        let worker = make_worker(storage.clone(), executor.clone(), RetryBehavior::new(true, 3));

        let id = storage
            .enqueue("test:always_fails", serde_json::json!({}), 1, None, Utc::now())
            .await
            .unwrap();

        drain_with_synthetic_clock(&worker, &storage).await;

        assert_eq!(storage.state_of(id), Some(StateName::Failed));
        // retry_count = 3: attempts 1 and 2 retry, attempt 3 gives up.
        let history = storage.history();
        let scheduled_retries = history
            .iter()
            .filter(|row| row.job_id == id && row.state == StateName::Scheduled && row.reason.is_some())
            .count();
        assert_eq!(scheduled_retries, 2);
    }

    #[tokio::test]
    async fn give_up_records_dead_letter_when_enabled() {
        let storage = Arc::new(InMemoryStorage::new());
        let executor: Arc<dyn JobExecutor> = Arc::new(FakeExecutor::new(|_| {
            Err(JobExecutionError::Failed(anyhow::anyhow!("boom")))
        }));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let worker = DelayedWorker::new(
            0,
            storage.clone(),
            executor,
            Arc::new(RetryRegistry::new()),
            RetryBehavior::new(true, 1),
            Arc::new(Pulse::new(1)),
            Duration::from_millis(10),
            true,
            stop_rx,
        );

        let id = storage
            .enqueue("test:always_fails", serde_json::json!({}), 1, None, Utc::now())
            .await
            .unwrap();

        drain_with_synthetic_clock(&worker, &storage).await;

        assert_eq!(storage.state_of(id), Some(StateName::Failed));
        let dead_letters = storage.dead_letters();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].job_id, id);
        assert_eq!(dead_letters[0].job_type, "test:always_fails");
    }

    #[tokio::test]
    async fn successful_job_completes_without_retry() {
        let storage = Arc::new(InMemoryStorage::new());
        let executor: Arc<dyn JobExecutor> = Arc::new(FakeExecutor::new(|_| Ok(())));
        let worker = make_worker(storage.clone(), executor, RetryBehavior::default());

        let id = storage
            .enqueue("test:ok", serde_json::json!({}), 1, None, Utc::now())
            .await
            .unwrap();

        drain_with_synthetic_clock(&worker, &storage).await;

        assert_eq!(storage.state_of(id), Some(StateName::Succeeded));
        assert_eq!(storage.queue_len(), 0);
    }

    #[tokio::test]
    async fn deserialization_failure_fails_without_retry() {
        let storage = Arc::new(InMemoryStorage::new());
        let executor: Arc<dyn JobExecutor> = Arc::new(FakeExecutor::new(|_| {
            Err(JobExecutionError::Deserialization(
                DeserializationError::UnknownCommandType("bogus:type".into()),
            ))
        }));
        let worker = make_worker(storage.clone(), executor, RetryBehavior::default());

        let id = storage
            .enqueue("bogus:type", serde_json::json!({}), 1, None, Utc::now())
            .await
            .unwrap();

        drain_with_synthetic_clock(&worker, &storage).await;

        // A single attempt: deserialization failure is terminal, never retried.
        assert_eq!(storage.state_of(id), Some(StateName::Failed));
        assert_eq!(storage.history().len(), 3); // Scheduled, Processing, Failed
    }
}
