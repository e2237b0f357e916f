//! The data-mart replicator core: wires the refresh-entity handler (C6),
//! the report handler family (C7), the report-follow-up loop (C8), and
//! lifecycle/readiness (C9) around a mart connection pool, an
//! entity-resolution engine accessor, and an info-message source.
//!
//! Nothing in this crate knows which concrete message-source backend or
//! mart dialect is in play — those are selected by the caller (the CLI
//! binary) and handed in already constructed.

mod diff;
pub mod followup;
pub mod lifecycle;
mod refresh;
mod report;

use std::sync::Arc;
use std::time::Duration;

use dm_consumer::{Consumer, MessageSource};
use dm_entity_repo::EntityRepository;
use dm_scheduler::{HandlerRegistry, RetryPolicy, Scheduler};
use dm_store::MartPool;
use dm_types::ReportFamily;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use followup::ProcessingRate;
pub use lifecycle::{ActivityTracker, Lifecycle, LifecycleState};
pub use refresh::RefreshEntityHandler;
pub use report::ReportHandler;

/// Base concurrency knobs derived from `core-concurrency` per §6: the
/// scheduler runs at 2x, the consumer at 2x, and the mart pool size is 1x
/// (SQLite clamps this to 1 regardless, per [`MartPool::connect`]).
#[derive(Debug, Clone, Copy)]
pub struct Concurrency {
    pub core: usize,
}

impl Concurrency {
    #[must_use]
    pub const fn scheduler_workers(self) -> usize {
        self.core * 2
    }

    #[must_use]
    pub const fn consumer_workers(self) -> usize {
        self.core * 2
    }

    #[must_use]
    pub const fn pool_size(self) -> usize {
        self.core
    }
}

/// Everything the replicator core needs to start: already-constructed
/// collaborators and the tuning knobs that shape how many workers run and
/// how aggressively the follow-up loop recovers.
pub struct ReplicatorConfig {
    pub pool: Arc<MartPool>,
    pub entity_repo: Arc<dyn EntityRepository>,
    pub message_source: Arc<dyn MessageSource>,
    pub concurrency: Concurrency,
    pub processing_rate: ProcessingRate,
}

/// The running service: a handle to every spawned background task plus
/// the lifecycle state machine, for readiness polling and graceful
/// shutdown.
pub struct Replicator {
    pool: Arc<MartPool>,
    scheduler: Arc<Scheduler>,
    consumer: Arc<Consumer>,
    lifecycle: Arc<Lifecycle>,
    scheduler_workers: Vec<JoinHandle<()>>,
    consumer_workers: Vec<JoinHandle<()>>,
    follow_up_cancellation: CancellationToken,
    follow_up_loop: JoinHandle<()>,
}

impl Replicator {
    /// Builds the mart schema if absent, wires the handler registry,
    /// seeds the follow-up recovery set from any pending rows left by a
    /// prior run, and spawns every background worker. Marks the service
    /// `READY` once this returns successfully.
    pub async fn start(config: ReplicatorConfig) -> Result<Self, dm_store::MartError> {
        dm_store::run_migrations(&config.pool).await?;

        let recovery_set = followup::seed(&config.pool).await?;

        let mut registry = HandlerRegistry::new();
        let refresh_handler = Arc::new(RefreshEntityHandler::new(
            Arc::clone(&config.entity_repo),
            Arc::clone(&config.pool),
            recovery_set.clone(),
        ));
        registry.register("REFRESH_ENTITY", refresh_handler);

        let report_handler = Arc::new(ReportHandler::new(Arc::clone(&config.pool)));
        for family in ReportFamily::all() {
            registry.register(family.action(), Arc::clone(&report_handler) as Arc<dyn dm_scheduler::Handler>);
        }

        let scheduler = Arc::new(Scheduler::new(registry, RetryPolicy::default()));
        let scheduler_workers = scheduler.spawn_workers(config.concurrency.scheduler_workers());

        let consumer = Arc::new(Consumer::new(Arc::clone(&config.message_source), Arc::clone(&scheduler)));
        let consumer_workers = consumer.spawn(config.concurrency.consumer_workers());

        let follow_up_cancellation = CancellationToken::new();
        let follow_up_loop = followup::spawn(
            recovery_set,
            Arc::clone(&scheduler),
            config.processing_rate.report_update_period(),
            follow_up_cancellation.clone(),
        );

        let lifecycle = Arc::new(Lifecycle::new(
            Arc::clone(&consumer),
            Arc::clone(&scheduler),
            Arc::clone(&config.pool),
            ActivityTracker::new(),
        ));
        lifecycle.mark_ready();

        Ok(Self {
            pool: config.pool,
            scheduler,
            consumer,
            lifecycle,
            scheduler_workers,
            consumer_workers,
            follow_up_cancellation,
            follow_up_loop,
        })
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Polls until the core is quiescent, per [`Lifecycle::wait_until_idle`].
    pub async fn wait_until_idle(&self, idle: Duration, max_wait: Duration) -> bool {
        self.lifecycle.wait_until_idle(idle, max_wait).await
    }

    /// Runs the §4.9 shutdown sequence: stop the consumer, drain the
    /// scheduler (bounded by `scheduler_drain_timeout` if given), stop the
    /// follow-up loop, mark the service `DESTROYED`. Connection release is
    /// left to `self`'s drop once this returns — the pool is an `Arc` the
    /// caller also drops.
    pub async fn shut_down(self, scheduler_drain_timeout: Option<Duration>) {
        lifecycle::shut_down(
            &self.lifecycle,
            &self.consumer,
            self.consumer_workers,
            &self.scheduler,
            self.scheduler_workers,
            self.follow_up_cancellation,
            self.follow_up_loop,
            scheduler_drain_timeout,
        )
        .await;
        drop(self.pool);
    }
}
