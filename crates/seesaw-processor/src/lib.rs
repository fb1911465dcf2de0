//! A durable background job runtime embedded in the host process.
//!
//! Client code enqueues units of work — fire-and-forget, delayed, or recurring
//! on a cron expression — and a fixed pool of delayed workers plus one cron
//! worker drain them from a [`Storage`] backend with at-least-once execution,
//! bounded retry, and persistent state tracking across restarts.
//!
//! Built on top of `seesaw-core`'s command/effect machinery: a job's
//! invocation descriptor is a registered, versioned command (see
//! `seesaw_core::job::CommandRegistry`), and running it means dispatching the
//! reconstructed command to its already-wired effect (see [`executor`]).
//!
//! ```text
//! EnqueueApi.enqueue()  ──►  Storage  ──►  ProcessingServer.pulse()
//!                                               │
//!                               ┌───────────────┴───────────────┐
//!                               ▼                                ▼
//!                       DelayedWorker × N                  CronWorker
//!                       fetch → execute → transition       promote due entries
//! ```

pub mod config;
pub mod cron;
pub mod enqueue;
pub mod error;
pub mod executor;
pub mod memory;
pub mod model;
pub mod pulse;
pub mod retry;
pub mod storage;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod scenario_tests;

pub use config::ProcessorConfig;
pub use enqueue::EnqueueApi;
pub use error::{JobExecutionError, StorageError};
pub use executor::{DispatcherExecutor, JobExecutor};
pub use memory::InMemoryStorage;
pub use model::{CronJob, DeadJobRow, Job, JobId, StateName, StateRow};
pub use pulse::Pulse;
pub use retry::{RetryBehavior, RetryDecision, RetryRegistry};
pub use storage::Storage;
pub use supervisor::ProcessingServer;
