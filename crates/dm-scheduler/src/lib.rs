//! An in-memory, resource-coalescing task scheduler.
//!
//! Deliberately knows nothing about entities, reports, or the mart: it
//! dispatches opaque `(action, parameters)` tasks to registered handlers,
//! serializing tasks that share a [`Resource`] and coalescing tasks that
//! share a `schedule_key`. This keeps it unit-testable without a database
//! or message broker in the loop.

mod error;
mod handle;
mod retry;
mod scheduler;
mod state;
mod task;

pub mod resource;

pub use error::{HandlerFailed, HandlerOutcome, RetryRequested};
pub use handle::{FollowUpHandle, SchedulerHandle};
pub use resource::Resource;
pub use retry::RetryPolicy;
pub use scheduler::{Handler, HandlerRegistry, Scheduler};
pub use task::{DispatchedTask, NewTask};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        seen_multiplicity: Arc<std::sync::Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(
            &self,
            task: DispatchedTask,
            _follow_ups: &mut FollowUpHandle,
        ) -> Result<(), HandlerOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_multiplicity.lock().unwrap().push(task.multiplicity);
            Ok(())
        }
    }

    fn make_scheduler(handler: Arc<dyn Handler>) -> Scheduler {
        let mut registry = HandlerRegistry::new();
        registry.register("REFRESH_ENTITY", handler);
        Scheduler::new(registry, RetryPolicy::default())
    }

    #[tokio::test]
    async fn duplicate_schedule_keys_coalesce_into_one_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handler = Arc::new(CountingHandler {
            calls: Arc::clone(&calls),
            seen_multiplicity: Arc::clone(&seen),
        });
        let scheduler = make_scheduler(handler);
        let _workers = scheduler.spawn_workers(1);

        let mut handle = scheduler.handle();
        for _ in 0..3 {
            handle.enqueue(
                NewTask::new("REFRESH_ENTITY", json!({"entity_id": 42}))
                    .with_resource(Resource::entity(42)),
            );
        }
        handle.commit();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap().as_slice(), &[3]);
    }

    #[tokio::test]
    async fn resource_coalescing_serializes_same_resource_tasks() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct RecordingHandler {
            order: Arc<std::sync::Mutex<Vec<i64>>>,
        }

        #[async_trait]
        impl Handler for RecordingHandler {
            async fn handle(
                &self,
                task: DispatchedTask,
                _follow_ups: &mut FollowUpHandle,
            ) -> Result<(), HandlerOutcome> {
                let entity_id = task.parameters["entity_id"].as_i64().unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.order.lock().unwrap().push(entity_id);
                Ok(())
            }
        }

        let mut registry = HandlerRegistry::new();
        registry.register(
            "REFRESH_ENTITY",
            Arc::new(RecordingHandler { order: Arc::clone(&order) }) as Arc<dyn Handler>,
        );
        let scheduler = Scheduler::new(registry, RetryPolicy::default());
        let _workers = scheduler.spawn_workers(4);

        let mut handle = scheduler.handle();
        // Two distinct tasks on the *same* resource must not run concurrently.
        handle.enqueue(
            NewTask::new("REFRESH_ENTITY", json!({"entity_id": 1, "tag": "a"}))
                .with_resource(Resource::entity(7)),
        );
        handle.enqueue(
            NewTask::new("REFRESH_ENTITY", json!({"entity_id": 2, "tag": "b"}))
                .with_resource(Resource::entity(7)),
        );
        handle.commit();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(order.lock().unwrap().as_slice(), &[1, 2]);
    }

    #[tokio::test]
    async fn follow_ups_are_discarded_unless_committed() {
        struct ForgetfulHandler;

        #[async_trait]
        impl Handler for ForgetfulHandler {
            async fn handle(
                &self,
                _task: DispatchedTask,
                follow_ups: &mut FollowUpHandle,
            ) -> Result<(), HandlerOutcome> {
                follow_ups.enqueue(NewTask::new("UPDATE_DATA_SOURCE_SUMMARY", json!({})));
                // Deliberately never calls commit().
                Ok(())
            }
        }

        let mut registry = HandlerRegistry::new();
        registry.register("REFRESH_ENTITY", Arc::new(ForgetfulHandler) as Arc<dyn Handler>);
        let scheduler = Scheduler::new(registry, RetryPolicy::default());
        let _workers = scheduler.spawn_workers(1);

        let mut handle = scheduler.handle();
        handle.enqueue(NewTask::new("REFRESH_ENTITY", json!({"entity_id": 1})));
        handle.commit();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.remaining_task_count(), 0);
    }

    #[tokio::test]
    async fn committed_follow_ups_are_published_after_success() {
        struct ChainingHandler;

        #[async_trait]
        impl Handler for ChainingHandler {
            async fn handle(
                &self,
                task: DispatchedTask,
                follow_ups: &mut FollowUpHandle,
            ) -> Result<(), HandlerOutcome> {
                if task.action == "REFRESH_ENTITY" {
                    follow_ups.enqueue(NewTask::new("UPDATE_DATA_SOURCE_SUMMARY", json!({"report_key": "DSS::A:"})));
                    follow_ups.commit();
                }
                Ok(())
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        struct CountingReportHandler(Arc<AtomicUsize>);

        #[async_trait]
        impl Handler for CountingReportHandler {
            async fn handle(
                &self,
                _task: DispatchedTask,
                _follow_ups: &mut FollowUpHandle,
            ) -> Result<(), HandlerOutcome> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let mut registry = HandlerRegistry::new();
        registry.register("REFRESH_ENTITY", Arc::new(ChainingHandler) as Arc<dyn Handler>);
        registry.register(
            "UPDATE_DATA_SOURCE_SUMMARY",
            Arc::new(CountingReportHandler(Arc::clone(&calls))) as Arc<dyn Handler>,
        );
        let scheduler = Scheduler::new(registry, RetryPolicy::default());
        let _workers = scheduler.spawn_workers(2);

        let mut handle = scheduler.handle();
        handle.enqueue(NewTask::new("REFRESH_ENTITY", json!({"entity_id": 1})));
        handle.commit();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
