//! Processing server configuration.

use std::time::Duration;

use crate::retry::RetryBehavior;

/// Configuration recognized by the processing server.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum idle sleep between fetch attempts in a worker. Default 15s.
    pub polling_delay: Duration,
    /// Applied when a job target doesn't provide its own `Retryable` behavior.
    pub default_retry_behavior: RetryBehavior,
    /// Overrides auto-detected parallelism degree `N`. `None` uses
    /// `std::thread::available_parallelism()`.
    pub worker_count: Option<usize>,
    /// Upper bound for graceful drain on shutdown. Default 60s.
    pub shutdown_timeout: Duration,
    /// Whether a job that exhausts its retry budget is also appended to the
    /// `Storage::record_dead_letter` sink. Default `false`: the dead-job
    /// queue's existence is left open to the `Storage` implementer, so
    /// writing to it is opt-in.
    pub dead_letter_after_give_up: bool,
    /// A `Processing` job whose claim is older than this is assumed to have
    /// lost its worker and is requeued by the reaper. Must comfortably
    /// exceed the longest expected job execution time. Default 10 minutes.
    pub lease_duration: Duration,
    /// How often the reaper checks for stale claims. Default 30s.
    pub reap_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            polling_delay: Duration::from_secs(15),
            default_retry_behavior: RetryBehavior::default(),
            worker_count: None,
            shutdown_timeout: Duration::from_secs(60),
            dead_letter_after_give_up: false,
            lease_duration: Duration::from_secs(600),
            reap_interval: Duration::from_secs(30),
        }
    }
}

impl ProcessorConfig {
    pub fn with_polling_delay(mut self, delay: Duration) -> Self {
        self.polling_delay = delay;
        self
    }

    pub fn with_default_retry_behavior(mut self, behavior: RetryBehavior) -> Self {
        self.default_retry_behavior = behavior;
        self
    }

    pub fn with_worker_count(mut self, n: usize) -> Self {
        self.worker_count = Some(n);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_dead_letter_after_give_up(mut self, enabled: bool) -> Self {
        self.dead_letter_after_give_up = enabled;
        self
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Resolves `worker_count`, defaulting to available hardware parallelism.
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
