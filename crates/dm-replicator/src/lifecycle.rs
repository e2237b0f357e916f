//! Lifecycle and readiness (C9): the service-wide state machine
//! `INITIALIZING -> READY <-> IDLE -> DESTROYED`, the idle-detection
//! poll that underlies both test harnesses and graceful shutdown, and the
//! shutdown sequence itself.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dm_consumer::Consumer;
use dm_scheduler::Scheduler;
use dm_store::{ledger, MartPool};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Initializing = 0,
    Ready = 1,
    Idle = 2,
    Destroyed = 3,
}

impl LifecycleState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Ready,
            3 => Self::Destroyed,
            _ => Self::Idle,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is before the Unix epoch").as_millis() as u64
}

/// Records the last time any unit of work was observed, so `waitUntilIdle`
/// can require a minimum quiet period rather than declaring idle the
/// instant every queue happens to be momentarily empty.
#[derive(Clone)]
pub struct ActivityTracker {
    last_activity_millis: Arc<AtomicU64>,
}

impl ActivityTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { last_activity_millis: Arc::new(AtomicU64::new(now_millis())) }
    }

    pub fn record(&self) {
        self.last_activity_millis.store(now_millis(), Ordering::SeqCst);
    }

    fn quiet_for(&self) -> Duration {
        let elapsed_millis = now_millis().saturating_sub(self.last_activity_millis.load(Ordering::SeqCst));
        Duration::from_millis(elapsed_millis)
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The service's lifecycle state plus the collaborators `waitUntilIdle`
/// polls to decide whether the core is quiescent.
pub struct Lifecycle {
    state: AtomicU8,
    consumer: Arc<Consumer>,
    scheduler: Arc<Scheduler>,
    pool: Arc<MartPool>,
    activity: ActivityTracker,
}

impl Lifecycle {
    #[must_use]
    pub fn new(consumer: Arc<Consumer>, scheduler: Arc<Scheduler>, pool: Arc<MartPool>, activity: ActivityTracker) -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Initializing as u8),
            consumer,
            scheduler,
            pool,
            activity,
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Marks the service `READY`: both the mart accessor and the consumer
    /// have reported their own ready states by the time init completes, so
    /// this is called once schema migration and consumer/worker spawning
    /// both succeed.
    pub fn mark_ready(&self) {
        self.set_state(LifecycleState::Ready);
    }

    pub fn mark_destroyed(&self) {
        self.set_state(LifecycleState::Destroyed);
    }

    async fn currently_quiescent(&self) -> Result<bool, dm_store::MartError> {
        Ok(self.consumer.pending_count() == 0
            && self.scheduler.remaining_task_count() == 0
            && ledger::unleased_count(&self.pool).await? == 0)
    }

    /// Polls until the core has been quiescent — no pending messages, no
    /// remaining scheduler tasks, no unleased ledger rows — for at least
    /// `idle`, or `max_wait` elapses first. Sets the `IDLE` state on
    /// success. Returns whether idle was actually reached.
    pub async fn wait_until_idle(&self, idle: Duration, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        const POLL_INTERVAL: Duration = Duration::from_millis(100);

        loop {
            match self.currently_quiescent().await {
                Ok(true) if self.activity.quiet_for() >= idle => {
                    self.set_state(LifecycleState::Idle);
                    return true;
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(%error, "idle check failed to read ledger, retrying"),
            }

            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// A state-transition companion to `wait_until_idle`: once new work
    /// arrives, a caller that previously observed `IDLE` should call this
    /// to flip back to `READY` before polling for idle again.
    pub fn mark_active(&self) {
        self.activity.record();
        if self.state() == LifecycleState::Idle {
            self.set_state(LifecycleState::Ready);
        }
    }
}

/// The graceful shutdown sequence in §4.9: stop the consumer and let its
/// workers drain, stop taking new scheduler tasks and drain in-flight ones
/// (bounded by `scheduler_drain_timeout`), stop the follow-up loop and let
/// its in-flight lease cycle finish, then mark the service destroyed.
pub async fn shut_down(
    lifecycle: &Lifecycle,
    consumer: &Consumer,
    consumer_workers: Vec<JoinHandle<()>>,
    scheduler: &Scheduler,
    scheduler_workers: Vec<JoinHandle<()>>,
    follow_up_cancellation: CancellationToken,
    follow_up_loop: JoinHandle<()>,
    scheduler_drain_timeout: Option<Duration>,
) {
    consumer.shut_down();
    futures::future::join_all(consumer_workers).await;

    scheduler.shut_down();
    let drain = futures::future::join_all(scheduler_workers);
    match scheduler_drain_timeout {
        Some(timeout) => {
            if tokio::time::timeout(timeout, drain).await.is_err() {
                tracing::warn!(?timeout, "scheduler did not drain before shutdown timeout, abandoning in-flight tasks");
            }
        }
        None => {
            drain.await;
        }
    }

    follow_up_cancellation.cancel();
    if let Err(error) = follow_up_loop.await {
        tracing::warn!(%error, "report follow-up loop task panicked during shutdown");
    }

    lifecycle.mark_destroyed();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dm_consumer::Consumer as ConsumerImpl;
    use dm_scheduler::{HandlerRegistry, RetryPolicy};

    use super::*;

    async fn pool() -> Arc<MartPool> {
        let uri = dm_store::parse_mart_uri("sqlite::memory:").expect("valid in-memory sqlite uri");
        let pool = MartPool::connect(&uri, 1).await.expect("pool connects");
        dm_store::run_migrations(&pool).await.expect("migrations apply");
        Arc::new(pool)
    }

    struct NeverSource;

    #[async_trait::async_trait]
    impl dm_consumer::MessageSource for NeverSource {
        async fn poll(&self, cancellation: &CancellationToken) -> error_stack::Result<Option<dm_consumer::Delivery>, dm_types::Shutdown> {
            cancellation.cancelled().await;
            Err(error_stack::Report::new(dm_types::Shutdown))
        }

        async fn ack(&self, _delivery: dm_consumer::Delivery) {}
        async fn nack(&self, _delivery: dm_consumer::Delivery) {}

        fn pending_count(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn idle_is_reached_once_everything_is_empty() {
        let pool = pool().await;
        let scheduler = Arc::new(Scheduler::new(HandlerRegistry::new(), RetryPolicy::default()));
        let consumer = Arc::new(ConsumerImpl::new(Arc::new(NeverSource), Arc::clone(&scheduler)));

        let lifecycle = Lifecycle::new(consumer, scheduler, pool, ActivityTracker::new());
        let reached = lifecycle.wait_until_idle(Duration::from_millis(10), Duration::from_secs(2)).await;
        assert!(reached);
        assert_eq!(lifecycle.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn idle_times_out_when_ledger_never_drains() {
        let pool = pool().await;
        let key: dm_types::ReportKey = "DSS::A:".parse().unwrap();
        ledger::append(&pool, &key, Some(dm_types::EntityId::new(1)), None, 1, 1, 0).await.unwrap();

        let scheduler = Arc::new(Scheduler::new(HandlerRegistry::new(), RetryPolicy::default()));
        let consumer = Arc::new(ConsumerImpl::new(Arc::new(NeverSource), Arc::clone(&scheduler)));
        let lifecycle = Lifecycle::new(consumer, scheduler, pool, ActivityTracker::new());

        let reached = lifecycle.wait_until_idle(Duration::from_millis(10), Duration::from_millis(150)).await;
        assert!(!reached);
        assert_eq!(lifecycle.state(), LifecycleState::Initializing);
    }
}
