use std::sync::Arc;

use crate::state::State;
use crate::task::NewTask;

/// A staged batch of tasks, shared by both handle flavors below.
#[derive(Debug, Default)]
pub(crate) struct TaskBatch {
    staged: Vec<NewTask>,
    committed: bool,
}

impl TaskBatch {
    fn enqueue(&mut self, task: NewTask) {
        self.staged.push(task);
    }
}

/// A commit group used by producers outside the worker pool: the message
/// consumer (one batch of `REFRESH_ENTITY` tasks per inbound message) and
/// the report-follow-up loop (one batch of `UPDATE_*` tasks per cycle).
///
/// Tasks staged through [`enqueue`](Self::enqueue) are invisible to the
/// scheduler until [`commit`](Self::commit) publishes them in one atomic
/// batch; dropping the handle without committing, or calling
/// [`rollback`](Self::rollback), discards them.
#[must_use = "a SchedulerHandle enqueues nothing until commit() is called"]
pub struct SchedulerHandle {
    state: Arc<State>,
    batch: TaskBatch,
}

impl SchedulerHandle {
    pub(crate) fn new(state: Arc<State>) -> Self {
        Self {
            state,
            batch: TaskBatch::default(),
        }
    }

    pub fn enqueue(&mut self, task: NewTask) {
        self.batch.enqueue(task);
    }

    /// Publishes every staged task atomically. Returns the number that were
    /// newly queued (tasks coalesced into an existing one don't count).
    pub fn commit(mut self) -> usize {
        self.batch.committed = true;
        self.state.enqueue_batch(std::mem::take(&mut self.batch.staged))
    }

    /// Discards every staged task; nothing is published.
    pub fn rollback(self) {}
}

/// A commit group handed to a [`crate::Handler`] for the follow-up tasks it
/// wants to chain from its own task's outcome.
///
/// Unlike [`SchedulerHandle`], committing here does not publish directly:
/// the worker pool publishes the batch only if the handler's task itself
/// completes successfully, so a handler that stages follow-ups and then
/// fails partway through never leaks them onto the queue.
#[derive(Default)]
pub struct FollowUpHandle {
    batch: TaskBatch,
}

impl FollowUpHandle {
    pub fn enqueue(&mut self, task: NewTask) {
        self.batch.enqueue(task);
    }

    /// Marks the staged tasks as eligible for publication once the parent
    /// task succeeds. A handler that never calls this has its follow-ups
    /// discarded even on success.
    pub fn commit(&mut self) {
        self.batch.committed = true;
    }

    /// Clears staged tasks; useful when a handler decides partway through
    /// that the follow-ups it built no longer apply.
    pub fn rollback(&mut self) {
        self.batch = TaskBatch::default();
    }

    pub(crate) fn into_committed_batch(self) -> Vec<NewTask> {
        if self.batch.committed {
            self.batch.staged
        } else {
            Vec::new()
        }
    }
}
