use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use crate::resource::Resource;

/// A task as submitted by a producer (message consumer, a handler's
/// follow-ups, the report-follow-up loop), before it enters the queue.
///
/// `parameters` is a JSON object. `serde_json::Map` is backed by a
/// `BTreeMap` in this workspace (the `preserve_order` feature is not
/// enabled), so its serialized form is already key-sorted — which is what
/// makes [`NewTask::schedule_key`] deterministic regardless of the order
/// callers insert parameters in.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub action: String,
    pub parameters: Value,
    pub resource: Option<Resource>,
    pub multiplicity: u32,
}

impl NewTask {
    #[must_use]
    pub fn new(action: impl Into<String>, parameters: Value) -> Self {
        Self {
            action: action.into(),
            parameters,
            resource: None,
            multiplicity: 1,
        }
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    #[must_use]
    pub fn with_multiplicity(mut self, multiplicity: u32) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    /// A deterministic hash of `action`, `resource`, and the canonical
    /// (key-sorted) form of `parameters`. Two tasks with the same key are
    /// coalesced by the scheduler rather than both dispatched.
    #[must_use]
    pub fn schedule_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.action.hash(&mut hasher);
        self.resource.as_ref().map(ToString::to_string).hash(&mut hasher);
        self.parameters.to_string().hash(&mut hasher);
        hasher.finish()
    }
}

/// A task sitting in the scheduler's queue, possibly absorbed into by
/// several coalesced [`NewTask`] submissions.
#[derive(Debug, Clone)]
pub(crate) struct QueuedTask {
    pub id: u64,
    pub schedule_key: u64,
    pub action: String,
    pub parameters: Value,
    pub resource: Option<Resource>,
    pub multiplicity: u32,
    pub attempt: u32,
}

impl QueuedTask {
    pub(crate) fn from_new(id: u64, task: NewTask) -> Self {
        let schedule_key = task.schedule_key();
        Self {
            id,
            schedule_key,
            action: task.action,
            parameters: task.parameters,
            resource: task.resource,
            multiplicity: task.multiplicity,
            attempt: 0,
        }
    }
}

/// A task handed to a [`crate::Handler`] for execution.
#[derive(Debug, Clone)]
pub struct DispatchedTask {
    pub id: u64,
    pub action: String,
    pub parameters: Value,
    pub resource: Option<Resource>,
    /// Number of coalesced submissions this dispatch represents.
    pub multiplicity: u32,
    /// Zero on first dispatch; incremented on every retry.
    pub attempt: u32,
}

impl From<QueuedTask> for DispatchedTask {
    fn from(task: QueuedTask) -> Self {
        Self {
            id: task.id,
            action: task.action,
            parameters: task.parameters,
            resource: task.resource,
            multiplicity: task.multiplicity,
            attempt: task.attempt,
        }
    }
}
