//! The consumer loop shared by all three backends (§4.5): poll, schedule
//! one `REFRESH_ENTITY` task per affected entity as a single commit
//! group, then ack or nack depending on whether the commit went through.

use std::sync::Arc;

use dm_scheduler::{NewTask, Resource, Scheduler};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::source::MessageSource;

pub struct Consumer {
    source: Arc<dyn MessageSource>,
    scheduler: Arc<Scheduler>,
    cancellation: CancellationToken,
}

impl Consumer {
    #[must_use]
    pub fn new(source: Arc<dyn MessageSource>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            source,
            scheduler,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn shut_down(&self) {
        self.cancellation.cancel();
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.source.pending_count()
    }

    /// Spawns `concurrency` loops pulling from the same source, per §6's
    /// "concurrency of 2x core concurrency" for the broker/cloud
    /// backends. The database backend tolerates the same shape even
    /// though its single-writer SQLite mart serializes every claim
    /// anyway.
    pub fn spawn(&self, concurrency: usize) -> Vec<JoinHandle<()>> {
        (0..concurrency)
            .map(|worker_index| {
                let source = Arc::clone(&self.source);
                let scheduler = Arc::clone(&self.scheduler);
                let cancellation = self.cancellation.clone();
                tokio::spawn(async move { run_loop(worker_index, source, scheduler, cancellation).await })
            })
            .collect()
    }
}

async fn run_loop(
    worker_index: usize,
    source: Arc<dyn MessageSource>,
    scheduler: Arc<Scheduler>,
    cancellation: CancellationToken,
) {
    loop {
        let delivery = match source.poll(&cancellation).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(_shutdown) => {
                tracing::debug!(worker_index, "consumer worker draining");
                return;
            }
        };

        let mut handle = scheduler.handle();
        for entity_id in &delivery.message.affected_entities {
            handle.enqueue(
                NewTask::new("REFRESH_ENTITY", json!({ "entity_id": entity_id.get() }))
                    .with_resource(Resource::entity(*entity_id)),
            );
        }
        handle.commit();
        source.ack(delivery).await;
    }
}
