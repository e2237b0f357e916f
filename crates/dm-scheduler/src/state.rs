use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::resource::Resource;
use crate::task::{NewTask, QueuedTask};

/// The scheduler's in-memory queue: one FIFO ordering of queued tasks, a
/// dedup index keyed by `schedule_key` covering everything still in that
/// queue, and the set of resources currently held by in-flight tasks.
///
/// Dispatch scans the queue front-to-back and takes the first task whose
/// resource (if any) isn't currently held. Because the scan never reorders
/// the queue, the relative order of two tasks sharing a resource is
/// preserved, giving FIFO-among-waiters for free without a separate
/// per-resource queue.
pub(crate) struct State {
    queue: Mutex<Inner>,
    notify: Notify,
}

struct Inner {
    tasks: VecDeque<QueuedTask>,
    by_schedule_key: HashMap<u64, usize>,
    in_flight_resources: HashSet<Resource>,
    in_flight_count: usize,
    next_id: u64,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Inner {
                tasks: VecDeque::new(),
                by_schedule_key: HashMap::new(),
                in_flight_resources: HashSet::new(),
                in_flight_count: 0,
                next_id: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Publishes a batch atomically: all tasks are merged into the queue
    /// under a single lock acquisition. Returns the number of tasks that
    /// were newly queued (coalesced duplicates are not counted).
    pub(crate) fn enqueue_batch(&self, tasks: Vec<NewTask>) -> usize {
        if tasks.is_empty() {
            return 0;
        }
        let mut inner = self.queue.lock().expect("scheduler queue mutex poisoned");
        let mut newly_queued = 0;
        for task in tasks {
            let key = task.schedule_key();
            if let Some(&index) = inner.by_schedule_key.get(&key) {
                inner.tasks[index].multiplicity += task.multiplicity;
                continue;
            }
            let id = inner.next_id;
            inner.next_id += 1;
            let index = inner.tasks.len();
            inner.tasks.push_back(QueuedTask::from_new(id, task));
            inner.by_schedule_key.insert(key, index);
            newly_queued += 1;
        }
        drop(inner);
        if newly_queued > 0 {
            self.notify.notify_waiters();
        }
        newly_queued
    }

    /// Re-admits a task that failed retryably. Bypasses dedup: a retried
    /// task keeps its identity and attempt count rather than being treated
    /// as a fresh submission.
    pub(crate) fn requeue(&self, mut task: QueuedTask) {
        task.attempt += 1;
        let mut inner = self.queue.lock().expect("scheduler queue mutex poisoned");
        let index = inner.tasks.len();
        inner.by_schedule_key.insert(task.schedule_key, index);
        inner.tasks.push_back(task);
        drop(inner);
        self.notify.notify_waiters();
    }

    fn try_take_dispatchable(&self) -> Option<QueuedTask> {
        let mut inner = self.queue.lock().expect("scheduler queue mutex poisoned");
        let position = inner.tasks.iter().position(|task| {
            task.resource
                .as_ref()
                .map_or(true, |resource| !inner.in_flight_resources.contains(resource))
        })?;
        let task = inner.tasks.remove(position).expect("position came from this deque");
        inner.by_schedule_key.remove(&task.schedule_key);
        // Removing from the middle invalidates every index after it.
        Self::reindex_from(&mut inner, position);
        if let Some(resource) = task.resource.clone() {
            inner.in_flight_resources.insert(resource);
        }
        inner.in_flight_count += 1;
        Some(task)
    }

    fn reindex_from(inner: &mut Inner, from: usize) {
        for index in from..inner.tasks.len() {
            inner.by_schedule_key.insert(inner.tasks[index].schedule_key, index);
        }
    }

    /// Waits until a dispatchable task exists, or returns `None` once
    /// `cancelled` resolves first.
    pub(crate) async fn next_dispatchable(&self, cancelled: impl std::future::Future<Output = ()>) -> Option<QueuedTask> {
        tokio::pin!(cancelled);
        loop {
            // Register for the next notification before checking the queue:
            // `notify_waiters` wakes only already-registered waiters and
            // stores no permit, so polling this after a failed take would
            // let a concurrent enqueue's notification pass by unseen.
            let notified = self.notify.notified();
            if let Some(task) = self.try_take_dispatchable() {
                return Some(task);
            }
            tokio::select! {
                () = notified => {}
                () = &mut cancelled => return None,
            }
        }
    }

    /// Releases the resource a completed task held, allowing the next
    /// waiter on it to become dispatchable.
    pub(crate) fn release(&self, resource: Option<&Resource>) {
        {
            let mut inner = self.queue.lock().expect("scheduler queue mutex poisoned");
            if let Some(resource) = resource {
                inner.in_flight_resources.remove(resource);
            }
            inner.in_flight_count = inner.in_flight_count.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Queued-but-not-dispatched plus in-flight task count, for the C9
    /// idle check.
    pub(crate) fn remaining_task_count(&self) -> usize {
        let inner = self.queue.lock().expect("scheduler queue mutex poisoned");
        inner.tasks.len() + inner.in_flight_count
    }
}
