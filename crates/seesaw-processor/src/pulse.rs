//! Pulse primitive: wakes exactly one idle worker per signal.
//!
//! `tokio::sync::Notify` already has the semantics this needs: a
//! `notify_one()` with nobody waiting stores a permit so the very next
//! `notified().await` returns immediately, and a `notify_one()` with waiters
//! present wakes exactly one of them — a shared auto-reset event, built in.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared wake signal for a fixed-size pool of delayed workers.
pub struct Pulse {
    notify: Notify,
    waiting: Vec<AtomicBool>,
}

impl Pulse {
    pub fn new(worker_count: usize) -> Self {
        Self {
            notify: Notify::new(),
            waiting: (0..worker_count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Called by a worker right before it blocks on `wait`.
    pub fn mark_waiting(&self, worker_index: usize) {
        self.waiting[worker_index].store(true, Ordering::SeqCst);
    }

    /// Called by a worker as soon as it wakes (for any reason).
    pub fn mark_active(&self, worker_index: usize) {
        self.waiting[worker_index].store(false, Ordering::SeqCst);
    }

    /// Advisory and racy by design: used only to skip the signal when a worker
    /// is visibly busy. Correctness never depends on this being exact.
    fn all_waiting(&self) -> bool {
        self.waiting.iter().all(|w| w.load(Ordering::SeqCst))
    }

    /// Wakes one waiting worker, unless at least one worker is already active
    /// (fast path: someone is draining the queue already, so this enqueue will
    /// be picked up without a wakeup).
    pub fn signal(&self) {
        if self.all_waiting() {
            self.notify.notify_one();
        }
    }

    /// Blocks until notified or `timeout` elapses. Does not touch the waiting
    /// flags; callers bracket this with `mark_waiting`/`mark_active`.
    pub async fn wait(&self, timeout: std::time::Duration) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_wakes_a_waiting_worker_promptly() {
        let pulse = Arc::new(Pulse::new(1));
        pulse.mark_waiting(0);

        let waiter = {
            let pulse = pulse.clone();
            tokio::spawn(async move {
                pulse.wait(Duration::from_secs(5)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        pulse.signal();

        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("worker should wake well before the 5s timeout")
            .unwrap();
    }

    #[tokio::test]
    async fn signal_is_a_noop_when_a_worker_is_active() {
        let pulse = Pulse::new(2);
        pulse.mark_waiting(0);
        // worker 1 never marks itself waiting: it's busy draining.
        pulse.signal();
        // No panic, no waiters to wake: nothing observable to assert beyond
        // `all_waiting` gating the notify, exercised indirectly here.
    }

    #[tokio::test]
    async fn wait_times_out_without_a_signal() {
        let pulse = Pulse::new(1);
        pulse.mark_waiting(0);
        let start = tokio::time::Instant::now();
        pulse.wait(Duration::from_millis(20)).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
