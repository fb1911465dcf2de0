//! Processing server / supervisor: owns N delayed workers plus the cron
//! worker, wraps each in an infinite-retry decorator, and coordinates shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::config::ProcessorConfig;
use crate::cron::CronWorker;
use crate::error::StorageError;
use crate::executor::JobExecutor;
use crate::pulse::Pulse;
use crate::retry::RetryRegistry;
use crate::storage::Storage;
use crate::worker::DelayedWorker;

const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Wraps a single supervised iteration (`DelayedWorker::run_once` or
/// `CronWorker::run_once`): catches a failure, logs it, backs off with a
/// growing-then-capped delay, and re-invokes, forever, until cancellation.
async fn run_forever<F, Fut>(name: &str, mut stopping: watch::Receiver<bool>, mut step: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), StorageError>>,
{
    let mut backoff = Duration::from_secs(1);
    loop {
        if *stopping.borrow() {
            return;
        }

        match step().await {
            Ok(()) => {
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                warn!(processor = name, error = %e, backoff_secs = backoff.as_secs(), "processor iteration failed; restarting after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = stopping.changed() => {}
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}

/// Owns the worker pool, the cron worker, lifecycle, and the shared pulse.
pub struct ProcessingServer {
    config: ProcessorConfig,
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    pulse: Arc<Pulse>,
    cron_wake: Arc<Notify>,
}

impl ProcessingServer {
    /// Detects parallelism, spawns `N` delayed workers plus one cron worker,
    /// each wrapped in the infinite-retry decorator, and launches them.
    pub fn start(
        config: ProcessorConfig,
        storage: Arc<dyn Storage>,
        executor: Arc<dyn JobExecutor>,
        retry_registry: Arc<RetryRegistry>,
    ) -> Self {
        let worker_count = config.resolved_worker_count();
        let (stop_tx, stop_rx) = watch::channel(false);
        let pulse = Arc::new(Pulse::new(worker_count));

        let mut handles = Vec::with_capacity(worker_count + 1);

        for index in 0..worker_count {
            let mut worker = DelayedWorker::new(
                index,
                storage.clone(),
                executor.clone(),
                retry_registry.clone(),
                config.default_retry_behavior,
                pulse.clone(),
                config.polling_delay,
                config.dead_letter_after_give_up,
                stop_rx.clone(),
            );
            let stopping = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                run_forever("delayed-worker", stopping, move || worker.run_once()).await;
            }));
        }

        let cron_wake = Arc::new(Notify::new());
        let mut cron_worker = CronWorker::new(storage.clone(), stop_rx.clone(), config.polling_delay, cron_wake.clone());
        let cron_stopping = stop_rx.clone();
        handles.push(tokio::spawn(async move {
            run_forever("cron-worker", cron_stopping, move || cron_worker.run_once()).await;
        }));

        let reap_storage = storage.clone();
        let lease_duration = chrono::Duration::from_std(config.lease_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let reap_interval = config.reap_interval;
        let mut reap_stopping = stop_rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if *reap_stopping.borrow() {
                    return;
                }
                let now = Utc::now();
                match reap_storage.reap_stale(now - lease_duration, now).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(reaped = n, "requeued stale claims past their lease"),
                    Err(e) => error!(error = %e, "reaper pass failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(reap_interval) => {}
                    _ = reap_stopping.changed() => {}
                }
            }
        }));

        tracing::info!(worker_count, "processing server started");

        Self {
            config,
            stop_tx,
            handles,
            pulse,
            cron_wake,
        }
    }

    /// Wakes exactly one `Waiting` delayed worker, or does nothing if at
    /// least one worker is already draining the queue. Called by the enqueue
    /// API after every write.
    pub fn pulse(&self) {
        self.pulse.signal();
    }

    /// Wakes the cron worker immediately instead of leaving it asleep until
    /// its current earliest-next-fire timer elapses. Called after a cron
    /// registration changes what's due soonest.
    pub fn pulse_cron(&self) {
        self.cron_wake.notify_one();
    }

    /// Signals cancellation and waits up to `shutdown_timeout` for every
    /// worker to drain. Never returns an error: failures are logged, not
    /// propagated, matching "Dispose never throws."
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);

        let drain = futures::future::join_all(self.handles);
        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(error = ?e, "processor task panicked during shutdown");
                        }
                    }
                }
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "processing server shutdown timed out; some workers may still be finishing their current job"
                );
            }
        }
    }
}
