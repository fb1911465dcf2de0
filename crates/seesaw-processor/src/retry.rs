//! Retry policy: maps (attempt count, job-defined behavior) to a next-delay or give-up.

use chrono::{DateTime, Utc};

/// `(retry?, max-attempts, backoff-function)` triple consulted after a failed attempt.
///
/// The default is exponential-ish with jitter to avoid thundering herds when many
/// jobs fail around the same time: `retry_in(n) = n^4 + 15 + random(0..30)` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryBehavior {
    pub retry: bool,
    pub retry_count: u32,
}

impl Default for RetryBehavior {
    fn default() -> Self {
        Self {
            retry: true,
            retry_count: 25,
        }
    }
}

impl RetryBehavior {
    pub fn new(retry: bool, retry_count: u32) -> Self {
        Self { retry, retry_count }
    }

    /// Seconds to wait before the `attempt`-th retry (1-based: `attempt` is the
    /// post-increment `Retries` value).
    pub fn retry_in(&self, attempt: u32) -> i64 {
        let base = (attempt as i64).pow(4) + 15;
        base + fastrand::i64(0..30)
    }
}

/// Per-job-type opt-in to a custom [`RetryBehavior`], standing in for a
/// `Retryable` capability probed on a job's target instance.
///
/// Rust's `Any` only downcasts to a concrete type, not to a second trait
/// object, so there's no analogue of "check whether this deserialized command
/// also implements `Retryable`" without either boxing a vtable pointer inside
/// every command or adding a capability method to the shared `Command` trait
/// (which would pull this crate's types into the ambient `seesaw-core` layer).
/// Since the registry is already keyed by job-type string at registration
/// time, tying the override to that same key is the natural place for it:
/// a target opts in by registering its behavior once, not per instance.
#[derive(Default)]
pub struct RetryRegistry {
    behaviors: std::collections::HashMap<&'static str, RetryBehavior>,
}

impl RetryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: &'static str, behavior: RetryBehavior) {
        self.behaviors.insert(job_type, behavior);
    }

    pub fn behavior_for(&self, job_type: &str, default: RetryBehavior) -> RetryBehavior {
        self.behaviors.get(job_type).copied().unwrap_or(default)
    }
}

/// Outcome of applying the retry decision rule to a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Exhausted (or opted out of) retries; transition to `Failed`.
    GiveUp,
    /// Stay `Scheduled`; bump `retries` and advance `due`.
    Retry { retries: i64, due: DateTime<Utc> },
}

/// Applies the retry decision rule: increment retries, give up at
/// `retry_count`, otherwise advance `due` from the job's original `added`
/// timestamp by `retry_in(retries)` seconds: `due = added + retry_in(retries)`.
pub fn decide(behavior: &RetryBehavior, added: DateTime<Utc>, current_retries: i64) -> RetryDecision {
    if !behavior.retry {
        return RetryDecision::GiveUp;
    }

    let retries = current_retries + 1;
    if retries as u32 >= behavior.retry_count {
        return RetryDecision::GiveUp;
    }

    let delay = behavior.retry_in(retries as u32);
    let due = added + chrono::Duration::seconds(delay);
    RetryDecision::Retry { retries, due }
}
