//! The report-follow-up scheduler (C8): a dedicated background loop that
//! re-asserts `UPDATE_<FAMILY>` tasks for every report key with
//! outstanding pending-delta rows. This is a recovery net for the
//! fast-path follow-ups [`crate::refresh::RefreshEntityHandler`] already
//! enqueues directly (§4.6 step 9) — a follow-up lost to a crash, a
//! retry-exhausted refresh task, or a restart between a committed delta
//! and its scheduler task is picked up here on the next cycle instead of
//! rotting in the ledger forever.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dm_scheduler::{NewTask, Resource, Scheduler};
use dm_store::{ledger, MartError, MartPool};
use dm_types::ReportKey;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Presets for C8's sleep interval, selected by the `processing-rate`
/// configuration option (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingRate {
    Leisurely,
    Standard,
    Aggressive,
}

impl ProcessingRate {
    #[must_use]
    pub const fn report_update_period(self) -> Duration {
        match self {
            Self::Leisurely => Duration::from_secs(300),
            Self::Standard => Duration::from_secs(60),
            Self::Aggressive => Duration::from_secs(1),
        }
    }
}

/// The in-memory `{report_key}` recovery set described in §4.8's third
/// bullet, fed by the init-time ledger seed and by every refresh that
/// touches a report key. Cloning is cheap; every clone shares the same
/// underlying set.
#[derive(Clone, Default)]
pub struct RecoverySet {
    inner: Arc<Mutex<HashSet<ReportKey>>>,
}

impl RecoverySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `report_key` has outstanding work, to be re-asserted
    /// on the next cycle even if the refresh handler's own direct
    /// follow-up never reaches the scheduler.
    pub fn note(&self, report_key: ReportKey) {
        self.inner.lock().expect("recovery set mutex poisoned").insert(report_key);
    }

    fn snapshot_and_clear(&self) -> HashSet<ReportKey> {
        let mut guard = self.inner.lock().expect("recovery set mutex poisoned");
        std::mem::take(&mut *guard)
    }
}

/// Seeds a fresh [`RecoverySet`] from every report key with at least one
/// unleased pending-delta row, the init-time recovery in §4.8's first
/// bullet.
pub async fn seed(pool: &MartPool) -> Result<RecoverySet, MartError> {
    let set = RecoverySet::new();
    for key in ledger::distinct_keys(pool).await? {
        set.note(key);
    }
    Ok(set)
}

/// Runs the follow-up loop until `cancellation` fires. Each cycle snapshots
/// the recovery set, clears it, and re-enqueues one `UPDATE_<FAMILY>` task
/// per key through a single scheduler commit group; the scheduler's
/// schedule-key de-duplication makes re-asserting a key the refresh
/// handler already enqueued harmless.
pub async fn run(recovery_set: RecoverySet, scheduler: Arc<Scheduler>, period: Duration, cancellation: CancellationToken) {
    loop {
        let keys = recovery_set.snapshot_and_clear();
        if !keys.is_empty() {
            let mut handle = scheduler.handle();
            for key in &keys {
                handle.enqueue(NewTask::new(key.action(), json!({ "report_key": key.to_string() })).with_resource(Resource::report(key)));
            }
            handle.commit();
        }

        tokio::select! {
            () = tokio::time::sleep(period) => {}
            () = cancellation.cancelled() => {
                tracing::debug!("report follow-up loop stopping");
                return;
            }
        }
    }
}

/// Spawns [`run`] on the current Tokio runtime.
#[must_use]
pub fn spawn(recovery_set: RecoverySet, scheduler: Arc<Scheduler>, period: Duration, cancellation: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run(recovery_set, scheduler, period, cancellation))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use dm_scheduler::{DispatchedTask, FollowUpHandle, Handler, HandlerOutcome, HandlerRegistry, RetryPolicy};
    use dm_types::EntityId;

    use super::*;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _task: DispatchedTask, _follow_ups: &mut FollowUpHandle) -> Result<(), HandlerOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn cycle_enqueues_noted_keys_and_clears_the_set() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register("UPDATE_DATA_SOURCE_SUMMARY", Arc::new(CountingHandler(Arc::clone(&calls))) as Arc<dyn Handler>);
        let scheduler = Arc::new(Scheduler::new(registry, RetryPolicy::default()));
        let _workers = scheduler.spawn_workers(1);

        let recovery_set = RecoverySet::new();
        let key: ReportKey = "DSS::A:".parse().unwrap();
        recovery_set.note(key);

        let cancellation = CancellationToken::new();
        let handle = spawn(recovery_set.clone(), Arc::clone(&scheduler), Duration::from_millis(20), cancellation.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancellation.cancel();
        let _ = handle.await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(recovery_set.snapshot_and_clear().is_empty());
    }

    #[tokio::test]
    async fn seed_picks_up_existing_pending_rows() {
        let uri = dm_store::parse_mart_uri("sqlite::memory:").unwrap();
        let pool = MartPool::connect(&uri, 1).await.unwrap();
        dm_store::run_migrations(&pool).await.unwrap();

        let key: ReportKey = "DSS::B:".parse().unwrap();
        ledger::append(&pool, &key, Some(EntityId::new(1)), None, 1, 1, 0).await.unwrap();

        let recovery_set = seed(&pool).await.unwrap();
        assert!(recovery_set.snapshot_and_clear().contains(&key));
    }
}
