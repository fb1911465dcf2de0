//! Cron/recurring processor: promotes due recurring entries into ordinary jobs.
//!
//! Next-fire computation is kept here rather than pushed into the storage
//! layer, so a `Storage` implementation never needs to understand cron
//! expressions — it only needs `all_cron_jobs`/`promote_cron`, treating the
//! cron parser as an external collaborator.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

use crate::error::StorageError;
use crate::storage::Storage;

/// Computes the next fire time for a cron expression after `from`.
/// Returns `None` if the expression fails to parse (logged by the caller).
///
/// Expressions are six fields (seconds first), per the `cron` crate's
/// convention — the usual five-field `* * * * *` crontab syntax is rejected.
pub fn next_fire(cron_expr: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = cron::Schedule::from_str(cron_expr).ok()?;
    schedule.after(&from).next()
}

/// Singleton processor promoting due `CronJob` rows into ordinary jobs.
pub struct CronWorker {
    storage: Arc<dyn Storage>,
    stopping: watch::Receiver<bool>,
    fallback_poll: Duration,
    wake: Arc<Notify>,
}

impl CronWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        stopping: watch::Receiver<bool>,
        fallback_poll: Duration,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            storage,
            stopping,
            fallback_poll,
            wake,
        }
    }

    /// One supervised pass: promote every due entry, then sleep until the
    /// earliest next-fire time across all registered cron jobs.
    pub async fn run_once(&mut self) -> Result<(), StorageError> {
        let now = Utc::now();
        let crons = self.storage.all_cron_jobs().await?;

        let mut earliest = None;
        for cron in &crons {
            let from = cron.last_run.unwrap_or(now - chrono::Duration::seconds(1));
            match next_fire(&cron.cron_expr, from) {
                Some(next) if next <= now => {
                    match self.storage.promote_cron(&cron.name, now).await {
                        Ok(job_id) => {
                            info!(cron = %cron.name, job_id = %job_id, "promoted recurring job");
                        }
                        Err(e) => {
                            error!(cron = %cron.name, error = %e, "failed to promote recurring job");
                        }
                    }
                    if let Some(after_promotion) = next_fire(&cron.cron_expr, now) {
                        earliest = Some(earliest.map_or(after_promotion, |e: DateTime<Utc>| e.min(after_promotion)));
                    }
                }
                Some(next) => {
                    earliest = Some(earliest.map_or(next, |e: DateTime<Utc>| e.min(next)));
                }
                None => {
                    warn!(cron = %cron.name, expr = %cron.cron_expr, "unparseable cron expression; skipping");
                }
            }
        }

        if *self.stopping.borrow() {
            return Ok(());
        }

        let sleep_for = match earliest {
            Some(next) => (next - Utc::now()).to_std().unwrap_or(self.fallback_poll),
            None => self.fallback_poll,
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = self.stopping.changed() => {}
            _ = self.wake.notified() => {}
        }
        Ok(())
    }
}
