//! Command dispatcher for routing commands to effects.
//!
//! The `Dispatcher` is responsible for:
//! 1. Routing commands to the correct effect handler
//! 2. Handling inline vs background execution
//! 3. Providing the effect context

use std::any::TypeId;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::core::{AnyCommand, Command, CorrelationId, ExecutionMode, JobSpec};
use crate::effect_impl::{AnyEffect, Effect, EffectContext, EffectWrapper};
use crate::engine::{InflightBatch, InflightTracker};
use crate::error::{BatchOutcome, CommandFailed, SeesawError};
use tracing::error;

/// Job queue trait for background and scheduled command execution.
///
/// Implement this trait to integrate with your job system (e.g., PostgreSQL-based queue).
/// The job queue receives pre-serialized command payloads along with their metadata.
///
/// # Example Implementation
///
/// ```ignore
/// use seesaw::{JobQueue, JobSpec};
/// use chrono::{DateTime, Utc};
/// use uuid::Uuid;
///
/// struct MyJobQueue { /* ... */ }
///
/// #[async_trait]
/// impl JobQueue for MyJobQueue {
///     async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> Result<Uuid> {
///         // Insert into jobs table
///         let job_id = self.db.insert_job(
///             spec.job_type,
///             payload,
///             spec.idempotency_key,
///             spec.priority,
///             spec.max_retries,
///         ).await?;
///
///         Ok(job_id)
///     }
///
///     async fn schedule(&self, payload: serde_json::Value, spec: JobSpec, run_at: DateTime<Utc>) -> Result<Uuid> {
///         // Similar to enqueue but with run_at timestamp
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Enqueue a command for immediate background execution.
    ///
    /// # Arguments
    ///
    /// * `payload` - The serialized command payload (JSON)
    /// * `spec` - Job metadata (type, idempotency key, retries, etc.)
    ///
    /// # Returns
    ///
    /// The job ID of the enqueued command.
    async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> Result<Uuid>;

    /// Schedule a command for execution at a specific time.
    ///
    /// The job queue implementation is responsible for executing the command at or after
    /// the specified time.
    ///
    /// # Arguments
    ///
    /// * `payload` - The serialized command payload (JSON)
    /// * `spec` - Job metadata (type, idempotency key, retries, etc.)
    /// * `run_at` - When to execute the command
    ///
    /// # Returns
    ///
    /// The job ID of the scheduled command.
    async fn schedule(
        &self,
        payload: serde_json::Value,
        spec: JobSpec,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid>;
}

/// A no-op job queue that rejects all background and scheduled commands.
///
/// Use this when you don't need background or scheduled command execution.
pub struct NoOpJobQueue;

#[async_trait::async_trait]
impl JobQueue for NoOpJobQueue {
    async fn enqueue(&self, _payload: serde_json::Value, _spec: JobSpec) -> Result<Uuid> {
        Err(anyhow!(
            "background commands not supported: no job queue configured"
        ))
    }

    async fn schedule(
        &self,
        _payload: serde_json::Value,
        _spec: JobSpec,
        _run_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        Err(anyhow!(
            "scheduled commands not supported: no job queue configured"
        ))
    }
}

/// Command dispatcher for routing commands to effects.
///
/// The `Dispatcher` maintains a registry of effects keyed by command type.
/// When a command is dispatched, the dispatcher:
/// 1. Looks up the effect for the command type
/// 2. Checks the command's execution mode
/// 3. Either executes inline or enqueues for background processing
///
/// # Example
///
/// ```ignore
/// let dispatcher = Dispatcher::new(deps, bus)
///     .with_effect::<CreateUserCommand, _>(CreateUserEffect)
///     .with_effect::<DeleteUserCommand, _>(DeleteUserEffect);
///
/// // Dispatch a command
/// let cmd = Box::new(CreateUserCommand { email: "test@example.com".into() });
/// dispatcher.dispatch(cmd).await?;
/// ```
pub struct Dispatcher<D> {
    effects: HashMap<TypeId, Box<dyn AnyEffect<D>>>,
    deps: Arc<D>,
    bus: EventBus,
    job_queue: Arc<dyn JobQueue>,
}

impl<D: Send + Sync + 'static> Dispatcher<D> {
    /// Create a new dispatcher without a job queue.
    ///
    /// Background commands will fail with an error.
    pub fn new(deps: D, bus: EventBus) -> Self {
        Self {
            effects: HashMap::new(),
            deps: Arc::new(deps),
            bus,
            job_queue: Arc::new(NoOpJobQueue),
        }
    }

    /// Create a new dispatcher with pre-wrapped Arc dependencies.
    ///
    /// Use this when you need to share the deps with other parts of the system.
    pub fn from_arc(deps: Arc<D>, bus: EventBus) -> Self {
        Self {
            effects: HashMap::new(),
            deps,
            bus,
            job_queue: Arc::new(NoOpJobQueue),
        }
    }

    /// Create a new dispatcher with a job queue for background execution.
    pub fn with_job_queue(deps: D, bus: EventBus, job_queue: Arc<dyn JobQueue>) -> Self {
        Self {
            effects: HashMap::new(),
            deps: Arc::new(deps),
            bus,
            job_queue,
        }
    }

    /// Create a new dispatcher with pre-wrapped Arc dependencies and a job queue.
    pub fn from_arc_with_job_queue(
        deps: Arc<D>,
        bus: EventBus,
        job_queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            effects: HashMap::new(),
            deps,
            bus,
            job_queue,
        }
    }

    /// Register an effect handler for a command type.
    ///
    /// # Panics
    ///
    /// Panics if an effect is already registered for this command type.
    /// Use `try_with_effect` for a non-panicking version, or
    /// `with_effect_replace` if you want to replace an existing effect.
    pub fn with_effect<C, E>(self, effect: E) -> Self
    where
        C: Command,
        E: Effect<C, D>,
    {
        self.try_with_effect::<C, E>(effect).unwrap_or_else(|e| {
            panic!("{}", e);
        })
    }

    /// Register an effect handler for a command type, returning an error if
    /// an effect is already registered.
    ///
    /// This is the non-panicking version of `with_effect`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let dispatcher = Dispatcher::new(deps, bus)
    ///     .try_with_effect::<CreateCommand, _>(CreateEffect)?
    ///     .try_with_effect::<DeleteCommand, _>(DeleteEffect)?;
    /// ```
    pub fn try_with_effect<C, E>(mut self, effect: E) -> Result<Self>
    where
        C: Command,
        E: Effect<C, D>,
    {
        let type_id = TypeId::of::<C>();
        if self.effects.contains_key(&type_id) {
            return Err(SeesawError::EffectAlreadyRegistered {
                type_name: std::any::type_name::<C>(),
            }
            .into());
        }
        self.effects
            .insert(type_id, Box::new(EffectWrapper::new(effect)));
        Ok(self)
    }

    /// Register an effect handler, replacing any existing handler.
    pub fn with_effect_replace<C, E>(mut self, effect: E) -> Self
    where
        C: Command,
        E: Effect<C, D>,
    {
        let type_id = TypeId::of::<C>();
        self.effects
            .insert(type_id, Box::new(EffectWrapper::new(effect)));
        self
    }

    /// Dispatch a batch of commands of the same type.
    ///
    /// Routes the commands to the appropriate effect based on their type.
    /// All commands in the batch must have the same `TypeId`.
    ///
    /// - Single command: calls `execute` directly
    /// - Multiple commands: calls `execute_batch` and handles `BatchOutcome`
    ///
    /// # Returns
    ///
    /// - `Ok(())` if all commands succeeded
    /// - `Err` if any command failed (error contains context about which failed)
    ///
    /// # Panics
    ///
    /// Panics if commands have different `TypeId`s (runtime guarantees this).
    pub async fn dispatch(&self, commands: Vec<Box<dyn AnyCommand>>) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }

        let type_id = commands[0].command_type_id();
        let effect = self.effects.get(&type_id).ok_or_else(|| {
            SeesawError::NoEffectRegistered {
                type_id,
                type_name: "unknown", // TypeId doesn't preserve type name at runtime
            }
        })?;

        let ctx = EffectContext::new(self.deps.clone(), self.bus.clone());

        if commands.len() == 1 {
            // Single command: direct path, no batch overhead
            let command = commands.into_iter().next().unwrap();
            let envelope = effect.execute_any(command.into_any(), ctx).await?;
            // Runtime is the sole emitter
            self.bus.emit_envelope(envelope);
            Ok(())
        } else {
            // Batch: delegate to execute_any_batch
            let commands_any: Vec<_> = commands.into_iter().map(|c| c.into_any()).collect();
            let envelopes = effect.execute_any_batch(commands_any, ctx).await?;
            // Runtime is the sole emitter - emit all returned events
            for envelope in envelopes {
                self.bus.emit_envelope(envelope);
            }
            Ok(())
        }
    }

    /// Dispatch a single command.
    ///
    /// Convenience method that wraps the command in a vec.
    /// Handles execution mode routing (inline, background, scheduled).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A background/scheduled command doesn't provide a `job_spec()`
    /// - A background/scheduled command doesn't provide `serialize_to_json()`
    /// - The job queue returns an error
    /// - The inline effect returns an error
    pub async fn dispatch_one(&self, command: Box<dyn AnyCommand>) -> Result<()> {
        let mode = command.get_execution_mode();

        match mode {
            ExecutionMode::Inline => self.dispatch(vec![command]).await,
            ExecutionMode::Background => {
                let spec = command.get_job_spec().ok_or_else(|| {
                    anyhow!(
                        "command with TypeId {:?} uses Background execution mode but did not provide job_spec()",
                        command.command_type_id()
                    )
                })?;
                let payload = command.get_serialize_to_json().ok_or_else(|| {
                    anyhow!(
                        "command with TypeId {:?} uses Background execution mode but did not provide serialize_to_json()",
                        command.command_type_id()
                    )
                })?;
                self.job_queue.enqueue(payload, spec).await.map(|_| ())
            }
            ExecutionMode::Scheduled { run_at } => {
                let spec = command.get_job_spec().ok_or_else(|| {
                    anyhow!(
                        "command with TypeId {:?} uses Scheduled execution mode but did not provide job_spec()",
                        command.command_type_id()
                    )
                })?;
                let payload = command.get_serialize_to_json().ok_or_else(|| {
                    anyhow!(
                        "command with TypeId {:?} uses Scheduled execution mode but did not provide serialize_to_json()",
                        command.command_type_id()
                    )
                })?;
                self.job_queue
                    .schedule(payload, spec, run_at)
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Dispatch a batch of commands with correlation tracking.
    ///
    /// This method uses the receipt pattern for accurate inflight tracking:
    /// 1. Creates an `InflightBatch` receipt (increments count)
    /// 2. Creates an EffectContext with the correlation ID
    /// 3. Dispatches the commands
    /// 4. Completes the receipt with the outcome (decrements based on success)
    ///
    /// # Partial Success Handling
    ///
    /// When a batch partially succeeds, only the succeeded count is decremented.
    /// This enables accurate `emit_and_await` behavior and proper retry semantics.
    ///
    /// # Panic Safety
    ///
    /// If execution panics before completion, the `InflightBatch` logs a warning
    /// on drop. The timeout backstop in `emit_and_await` handles cleanup.
    pub async fn dispatch_with_correlation(
        &self,
        commands: Vec<Box<dyn AnyCommand>>,
        cid: CorrelationId,
        inflight: Option<&Arc<InflightTracker>>,
    ) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }

        let batch_size = commands.len();
        let type_id = commands[0].command_type_id();

        let effect = self
            .effects
            .get(&type_id)
            .ok_or_else(|| SeesawError::NoEffectRegistered {
                type_id,
                type_name: "unknown",
            })?;

        // Create context with correlation ID for event propagation
        let ctx = EffectContext::with_correlation(
            self.deps.clone(),
            self.bus.clone(),
            cid,
            inflight.cloned(),
        );

        // Use receipt pattern for batch tracking (if inflight tracker provided)
        let batch: Option<InflightBatch> =
            inflight.map(|tracker| tracker.begin_batch(cid, batch_size));

        if commands.len() == 1 {
            // Single command: direct path
            let command = commands.into_iter().next().unwrap();

            // Wrap effect execution with panic catching
            // AssertUnwindSafe is required because effect/ctx are not UnwindSafe
            let result = AssertUnwindSafe(effect.execute_any(command.into_any(), ctx))
                .catch_unwind()
                .await;

            // Convert panic to error
            let result = match result {
                Ok(inner) => inner,
                Err(panic_info) => {
                    let panic_msg = extract_panic_message(&panic_info);
                    error!(%cid, panic = %panic_msg, "effect panicked");
                    Err(anyhow::anyhow!("effect panicked: {}", panic_msg))
                }
            };

            // Complete batch with synthetic outcome
            if let Some(batch) = batch {
                let outcome = match &result {
                    Ok(_) => BatchOutcome::Complete,
                    Err(e) => BatchOutcome::Partial {
                        succeeded: 0,
                        failed_at: 0,
                        error: anyhow::anyhow!("{}", e),
                    },
                };
                batch.complete(outcome);
            }

            match result {
                Ok(envelope) => {
                    // Runtime is the sole emitter
                    self.bus.emit_envelope(envelope);
                    Ok(())
                }
                Err(e) => {
                    // Log raw error for developers (before sanitization)
                    error!(%cid, error = ?e, "effect failed");

                    // Record error for correlation tracking (so emit_and_await returns it)
                    if let Some(tracker) = inflight {
                        tracker.record_error(cid, anyhow::anyhow!("{}", e));
                    }

                    // Emit sanitized CommandFailed event with same correlation ID
                    // so dispatch_request can match it
                    let failed = CommandFailed::from_error(&e, "unknown", cid);
                    self.bus.emit_with_correlation(failed, cid);
                    Ok(())
                }
            }
        } else {
            // Batch: delegate to execute_any_batch
            let commands_any: Vec<_> = commands.into_iter().map(|c| c.into_any()).collect();

            // Wrap effect execution with panic catching
            let result = AssertUnwindSafe(effect.execute_any_batch(commands_any, ctx))
                .catch_unwind()
                .await;

            // Convert panic to error
            let result = match result {
                Ok(inner) => inner,
                Err(panic_info) => {
                    let panic_msg = extract_panic_message(&panic_info);
                    error!(%cid, panic = %panic_msg, "batch effect panicked");
                    Err(anyhow::anyhow!("batch effect panicked: {}", panic_msg))
                }
            };

            // Complete batch with outcome based on success/failure
            if let Some(batch) = batch {
                let outcome = match &result {
                    Ok(_) => {
                        // All succeeded
                        BatchOutcome::Complete
                    }
                    Err(e) => BatchOutcome::Partial {
                        succeeded: 0, // Conservative: assume failure at start
                        failed_at: 0,
                        error: anyhow::anyhow!("{}", e),
                    },
                };
                batch.complete(outcome);
            }

            match result {
                Ok(envelopes) => {
                    // Runtime is the sole emitter - emit all returned events
                    for envelope in envelopes {
                        self.bus.emit_envelope(envelope);
                    }
                    Ok(())
                }
                Err(e) => {
                    // Log raw error for developers (before sanitization)
                    error!(%cid, error = ?e, "batch effect failed");

                    // Record error for correlation tracking
                    if let Some(tracker) = inflight {
                        tracker.record_error(cid, anyhow::anyhow!("batch failed: {}", e));
                    }

                    // Emit sanitized CommandFailed event with same correlation ID
                    // so dispatch_request can match it
                    let failed = CommandFailed::from_error(&e, "unknown", cid);
                    self.bus.emit_with_correlation(failed, cid);
                    Ok(())
                }
            }
        }
    }

    /// Check if an effect is registered for a command type.
    pub fn has_effect<C: Command>(&self) -> bool {
        self.effects.contains_key(&TypeId::of::<C>())
    }

    /// Returns the number of registered effects.
    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Get access to the dependencies.
    pub fn deps(&self) -> &D {
        &self.deps
    }

    /// Get access to the event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

/// Extract a human-readable message from a panic payload.
fn extract_panic_message(panic_info: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<D> std::fmt::Debug for Dispatcher<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("effect_count", &self.effects.len())
            .finish_non_exhaustive()
    }
}
