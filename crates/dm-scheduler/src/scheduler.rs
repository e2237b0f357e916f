use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerOutcome;
use crate::handle::{FollowUpHandle, SchedulerHandle};
use crate::retry::RetryPolicy;
use crate::state::State;
use crate::task::DispatchedTask;

/// Executes one task `action`. Implementations are the refresh-entity
/// handler and the report-handler family in the replicator crate; this
/// crate only knows about the trait.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        task: DispatchedTask,
        follow_ups: &mut FollowUpHandle,
    ) -> Result<(), HandlerOutcome>;
}

/// Maps a task's `action` string to the handler that runs it. Dispatching
/// an action with no registered handler is a configuration error caught at
/// startup, not a per-task failure.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(action.into(), handler);
        self
    }

    fn get(&self, action: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(action).cloned()
    }
}

/// The worker pool described in the scheduler's component design: a
/// single-process, multi-threaded cooperative pool dispatching `Task`
/// units, with resource coalescing, schedule-key de-duplication, and
/// commit-group follow-ups.
pub struct Scheduler {
    state: Arc<State>,
    registry: Arc<HandlerRegistry>,
    retry_policy: RetryPolicy,
    cancellation: CancellationToken,
}

impl Scheduler {
    #[must_use]
    pub fn new(registry: HandlerRegistry, retry_policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(State::new()),
            registry: Arc::new(registry),
            retry_policy,
            cancellation: CancellationToken::new(),
        }
    }

    /// Opens a new root commit group for producers outside the worker pool
    /// (the message consumer, the report-follow-up loop).
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(Arc::clone(&self.state))
    }

    /// Queued-but-not-dispatched plus currently-executing task count. Part
    /// of the C9 idle check: the core is idle only once this is zero.
    #[must_use]
    pub fn remaining_task_count(&self) -> usize {
        self.state.remaining_task_count()
    }

    /// Signals every worker to stop taking new tasks once their current one
    /// finishes. Does not forcibly cancel in-flight handler futures.
    pub fn shut_down(&self) {
        self.cancellation.cancel();
    }

    /// Spawns `concurrency` worker loops and returns their join handles so
    /// a caller can await a full drain on shutdown.
    pub fn spawn_workers(&self, concurrency: usize) -> Vec<JoinHandle<()>> {
        (0..concurrency)
            .map(|worker_index| {
                let state = Arc::clone(&self.state);
                let registry = Arc::clone(&self.registry);
                let retry_policy = self.retry_policy;
                let cancellation = self.cancellation.clone();
                tokio::spawn(async move {
                    worker_loop(worker_index, state, registry, retry_policy, cancellation).await;
                })
            })
            .collect()
    }
}

async fn worker_loop(
    worker_index: usize,
    state: Arc<State>,
    registry: Arc<HandlerRegistry>,
    retry_policy: RetryPolicy,
    cancellation: CancellationToken,
) {
    loop {
        let Some(task) = state.next_dispatchable(cancellation.cancelled()).await else {
            tracing::debug!(worker_index, "scheduler worker draining, no more tasks will be taken");
            return;
        };

        let resource = task.resource.clone();
        let attempt = task.attempt;
        let Some(handler) = registry.get(&task.action) else {
            tracing::error!(action = %task.action, "no handler registered for action, dropping task");
            state.release(resource.as_ref());
            continue;
        };

        let dispatched: DispatchedTask = task.clone().into();
        let mut follow_ups = FollowUpHandle::default();
        let outcome = handler.handle(dispatched, &mut follow_ups).await;

        match outcome {
            Ok(()) => {
                state.release(resource.as_ref());
                let batch = follow_ups.into_committed_batch();
                if !batch.is_empty() {
                    state.enqueue_batch(batch);
                }
            }
            Err(HandlerOutcome::Retryable(report)) => {
                state.release(resource.as_ref());
                if retry_policy.exhausted(attempt) {
                    tracing::error!(
                        action = %task.action, attempt, error = ?report,
                        "task exhausted retry budget, dropping",
                    );
                } else {
                    let delay = retry_policy.delay_for(attempt);
                    tracing::warn!(
                        action = %task.action, attempt, ?delay, error = ?report,
                        "task failed retryably, requeueing after backoff",
                    );
                    tokio::time::sleep(delay).await;
                    state.requeue(task);
                }
            }
            Err(HandlerOutcome::Fatal(report)) => {
                state.release(resource.as_ref());
                tracing::error!(action = %task.action, error = ?report, "task failed fatally, dropping");
            }
        }
    }
}
