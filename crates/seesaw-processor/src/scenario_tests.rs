//! End-to-end scenarios driven entirely through the public surface: the
//! enqueue API, the processing server, and a fake `JobExecutor` — no access
//! to worker/supervisor internals. Covers the store-level, multi-worker, and
//! cron-promotion scenarios that don't require mocking wall-clock `due`
//! backoff (see `worker::tests` for the retry-exhaustion scenario, which
//! needs direct access to drive a synthetic clock).

#[cfg(test)]
mod scenario_tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::Utc;

    use crate::config::ProcessorConfig;
    use crate::cron::CronWorker;
    use crate::enqueue::EnqueueApi;
    use crate::error::JobExecutionError;
    use crate::executor::JobExecutor;
    use crate::memory::InMemoryStorage;
    use crate::model::{CronJob, Job, JobId, StateName};
    use crate::retry::RetryRegistry;
    use crate::supervisor::ProcessingServer;

    struct RecordingExecutor {
        calls: AtomicUsize,
        seen: Mutex<HashSet<JobId>>,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(HashSet::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl JobExecutor for RecordingExecutor {
        async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut seen = self.seen.lock().unwrap();
            // Exclusive-claim invariant: no job id is ever handed to `execute`
            // twice concurrently with another in-flight call — `fetch_next`'s
            // atomic pop already guarantees this, but asserting here turns a
            // regression into a test failure instead of a silent double-run.
            assert!(seen.insert(job.id), "job {} executed more than once", job.id);
            Ok(())
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not met within {:?}",
                timeout
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// A single immediate job with one worker reaches `Succeeded` with
    /// exactly one invocation and an empty queue.
    #[tokio::test]
    async fn single_job_one_worker_succeeds_exactly_once() {
        let storage = Arc::new(InMemoryStorage::new());
        let executor = Arc::new(RecordingExecutor::new());
        let config = ProcessorConfig::default()
            .with_worker_count(1)
            .with_polling_delay(Duration::from_millis(20));

        let server = Arc::new(ProcessingServer::start(
            config,
            storage.clone(),
            executor.clone(),
            Arc::new(RetryRegistry::new()),
        ));
        let api = EnqueueApi::new(storage.clone(), server.clone());

        let id = api
            .enqueue("test:echo", serde_json::json!({"msg": "hi"}), 1, None)
            .await
            .unwrap();

        wait_until(
            || storage.state_of(id) == Some(StateName::Succeeded),
            Duration::from_secs(2),
        )
        .await;

        assert_eq!(executor.calls(), 1);
        assert_eq!(storage.queue_len(), 0);

        drop(api);
        Arc::try_unwrap(server)
            .unwrap_or_else(|_| panic!("server still referenced"))
            .stop()
            .await;
    }

    /// 100 jobs across 4 workers all reach `Succeeded`, each executed
    /// exactly once, with no job ever observed by two workers at once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn hundred_jobs_four_workers_all_succeed_exactly_once() {
        let storage = Arc::new(InMemoryStorage::new());
        let executor = Arc::new(RecordingExecutor::new());
        let config = ProcessorConfig::default()
            .with_worker_count(4)
            .with_polling_delay(Duration::from_millis(20));

        let server = Arc::new(ProcessingServer::start(
            config,
            storage.clone(),
            executor.clone(),
            Arc::new(RetryRegistry::new()),
        ));
        let api = EnqueueApi::new(storage.clone(), server.clone());

        let mut ids = Vec::with_capacity(100);
        for i in 0..100 {
            let id = api
                .enqueue("test:echo", serde_json::json!({"i": i}), 1, None)
                .await
                .unwrap();
            ids.push(id);
        }

        wait_until(
            || ids.iter().all(|id| storage.state_of(*id) == Some(StateName::Succeeded)),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(executor.calls(), 100);
        assert_eq!(storage.queue_len(), 0);

        drop(api);
        Arc::try_unwrap(server)
            .unwrap_or_else(|_| panic!("server still referenced"))
            .stop()
            .await;
    }

    /// `AddOrUpdate` followed by a due cron promotion creates a new job and
    /// advances `last_run`.
    #[tokio::test]
    async fn due_cron_job_is_promoted_and_last_run_advances() {
        let storage: Arc<InMemoryStorage> = Arc::new(InMemoryStorage::new());
        storage
            .upsert_cron(CronJob {
                name: "nightly".into(),
                cron_expr: "* * * * * *".into(), // fires every second: always due
                last_run: None,
                job_type: "test:echo".into(),
                payload: serde_json::json!({"job": "nightly"}),
            })
            .await
            .unwrap();

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let wake = Arc::new(tokio::sync::Notify::new());
        let mut cron_worker = CronWorker::new(storage.clone(), stop_rx, Duration::from_secs(5), wake);

        let handle = tokio::spawn(async move {
            cron_worker.run_once().await.unwrap();
        });

        // The promotion itself happens synchronously at the top of
        // `run_once`; give it a moment to land, then cut the worker's
        // until-next-fire sleep short rather than waiting out a real second.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let crons = storage.all_cron_jobs().await.unwrap();
        assert_eq!(crons.len(), 1);
        assert!(crons[0].last_run.is_some());

        let history = storage.history();
        let promoted = history
            .iter()
            .find(|row| row.state == StateName::Scheduled && row.reason.is_none());
        assert!(promoted.is_some(), "expected a promoted job's Scheduled audit row");
    }

    /// A job enqueued with a future delay is not claimed before its `due`
    /// time, within the worker's polling tolerance.
    #[tokio::test]
    async fn delayed_job_is_not_claimed_before_due() {
        let storage = Arc::new(InMemoryStorage::new());
        let now = Utc::now();
        let id = storage
            .enqueue(
                "test:echo",
                serde_json::json!({}),
                1,
                Some(now + chrono::Duration::seconds(30)),
                now,
            )
            .await
            .unwrap();

        assert!(storage.fetch_next("worker-0", now).await.unwrap().is_none());
        assert_eq!(storage.state_of(id), Some(StateName::Scheduled));
    }
}
