//! The report handler family (C7): one handler per report family (data-
//! source summary, cross-source summary, entity-size breakdown,
//! entity-relation breakdown), all sharing the lease-and-apply algorithm
//! in §4.7. The four scheduler actions
//! ([`dm_types::ReportFamily::action`]) are registered against the same
//! [`ReportHandler`] instance; nothing about the algorithm below depends
//! on which family a given `report_key` belongs to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dm_scheduler::{DispatchedTask, FollowUpHandle, Handler, HandlerFailed, HandlerOutcome, RetryRequested};
use dm_store::report::{ApplyOutcome, DetailKey};
use dm_store::{ledger, ledger::PendingDeltaRow, report, MartPool};
use dm_types::{OperationId, ReportKey};
use error_stack::Report;

/// §4.7's fixed lease window. Report handlers hold a lease no longer than
/// this before a concurrent leaser is entitled to reclaim the same rows;
/// step 9's own-lease-duration check aborts a handler that overran it
/// rather than let two handlers apply the same rows twice.
pub const LEASE_DURATION: Duration = Duration::from_secs(60);

pub struct ReportHandler {
    pool: Arc<MartPool>,
    lease_duration: Duration,
}

impl ReportHandler {
    #[must_use]
    pub fn new(pool: Arc<MartPool>) -> Self {
        Self { pool, lease_duration: LEASE_DURATION }
    }

    #[must_use]
    pub fn with_lease_duration(pool: Arc<MartPool>, lease_duration: Duration) -> Self {
        Self { pool, lease_duration }
    }
}

fn parse_report_key(task: &DispatchedTask) -> Result<ReportKey, HandlerOutcome> {
    let text = task.parameters["report_key"]
        .as_str()
        .ok_or_else(|| HandlerOutcome::Fatal(Report::new(HandlerFailed).attach_printable("task parameters missing string report_key")))?;
    text.parse()
        .map_err(|error| HandlerOutcome::Fatal(Report::new(HandlerFailed).attach_printable(format!("unparseable report_key {text:?}: {error}"))))
}

fn mart_error_outcome(context: &'static str, error: dm_store::MartError) -> HandlerOutcome {
    match error {
        dm_store::MartError::Transient(report) => {
            HandlerOutcome::Retryable(Report::new(RetryRequested).attach_printable(format!("{context}: {report}")))
        }
        dm_store::MartError::Fatal(report) => HandlerOutcome::Fatal(Report::new(HandlerFailed).attach_printable(format!("{context}: {report}"))),
    }
}

#[async_trait]
impl Handler for ReportHandler {
    async fn handle(&self, task: DispatchedTask, _follow_ups: &mut FollowUpHandle) -> Result<(), HandlerOutcome> {
        let report_key = parse_report_key(&task)?;
        let lease_id = OperationId::generate();
        let started = Instant::now();

        // Steps 2-4: expire stale leases, take a fresh lease on everything
        // currently unleased for this key, read the leased rows back.
        let lease_duration_secs = i64::try_from(self.lease_duration.as_secs()).unwrap_or(i64::MAX);
        let leased: Vec<PendingDeltaRow> = ledger::lease(&self.pool, &report_key, &lease_id, lease_duration_secs)
            .await
            .map_err(|error| mart_error_outcome("leasing pending rows", error))?;

        if leased.is_empty() {
            return Ok(());
        }

        // Step 5: sum the leased deltas; skip the statistic upsert entirely
        // if everything cancels out.
        let (mut entity_sum, mut record_sum, mut relation_sum) = (0i64, 0i64, 0i64);
        for row in &leased {
            entity_sum += row.entity_delta;
            record_sum += row.record_delta;
            relation_sum += row.relation_delta;
        }
        let statistic = (entity_sum != 0 || record_sum != 0 || relation_sum != 0).then_some((entity_sum, record_sum, relation_sum));

        // Step 6: fold every leased row into a per-(entity, related) detail
        // delta. A row with a `related_id` is a relation-bridge delta and
        // contributes its `relation_delta`; one without is an entity-level
        // delta and contributes its `entity_delta` — `record_delta` feeds
        // only the aggregate statistic above, never the detail table.
        let mut details: HashMap<DetailKey, i64> = HashMap::new();
        for row in &leased {
            let Some(entity_id) = row.entity_id else { continue };
            let delta = if row.related_id.is_some() { row.relation_delta } else { row.entity_delta };
            if delta != 0 {
                *details.entry(DetailKey { entity_id, related_id: row.related_id }).or_insert(0) += delta;
            }
        }
        details.retain(|_, delta| *delta != 0);
        let details: Vec<(DetailKey, i64)> = details.into_iter().collect();

        // Steps 5-9 in one transaction: the statistic upsert, every detail
        // delta, the zero-compaction they imply, and the pending-row
        // cleanup for this lease all commit together, and only if this
        // handler is still within its lease window when the last of them
        // finishes. An overrun rolls every one of those writes back instead
        // of leaving some of them durable for a concurrent leaser to
        // duplicate.
        let lease_duration = self.lease_duration;
        let outcome = report::apply_report_update(&self.pool, &report_key, statistic, &details, &lease_id, move || started.elapsed() > lease_duration)
            .await
            .map_err(|error| mart_error_outcome("applying report update", error))?;

        match outcome {
            ApplyOutcome::Committed { deleted } => {
                if deleted as usize != leased.len() {
                    tracing::warn!(
                        report_key = %report_key, leased = leased.len(), deleted,
                        "leased pending-row count did not match deleted count; another process may have raced this lease",
                    );
                }
                Ok(())
            }
            ApplyOutcome::LeaseExpired => Err(HandlerOutcome::Retryable(
                Report::new(dm_types::LeaseLost).change_context(RetryRequested).attach_printable(format!(
                    "report handler for {report_key} exceeded its {lease_duration:?} lease before committing; rolled back to avoid double-applying"
                )),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use dm_types::EntityId;
    use serde_json::json;

    use super::*;

    async fn pool() -> Arc<MartPool> {
        let uri = dm_store::parse_mart_uri("sqlite::memory:").expect("valid in-memory sqlite uri");
        let pool = MartPool::connect(&uri, 1).await.expect("pool connects");
        dm_store::run_migrations(&pool).await.expect("migrations apply");
        Arc::new(pool)
    }

    fn task(report_key: &str) -> DispatchedTask {
        DispatchedTask {
            id: 1,
            action: "UPDATE_DATA_SOURCE_SUMMARY".to_owned(),
            parameters: json!({ "report_key": report_key }),
            resource: None,
            multiplicity: 1,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn sums_deltas_into_statistic_and_details() {
        let pool = pool().await;
        let key: ReportKey = "DSS::A:".parse().unwrap();

        ledger::append(&pool, &key, Some(EntityId::new(1)), None, 1, 3, 0).await.unwrap();
        ledger::append(&pool, &key, Some(EntityId::new(1)), None, 0, 2, 0).await.unwrap();
        ledger::append(&pool, &key, Some(EntityId::new(2)), None, 1, 1, 0).await.unwrap();

        let handler = ReportHandler::new(Arc::clone(&pool));
        let mut follow_ups = FollowUpHandle::default();
        handler.handle(task("DSS::A:"), &mut follow_ups).await.unwrap();

        let keys = ledger::distinct_keys(&pool).await.unwrap();
        assert!(keys.is_empty(), "all leased rows must be deleted after apply");
        assert_eq!(ledger::unleased_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_sum_statistic_is_skipped_but_rows_still_cleared() {
        let pool = pool().await;
        let key: ReportKey = "DSS::B:".parse().unwrap();

        ledger::append(&pool, &key, Some(EntityId::new(5)), None, 1, 1, 0).await.unwrap();
        ledger::append(&pool, &key, Some(EntityId::new(5)), None, -1, -1, 0).await.unwrap();

        let handler = ReportHandler::new(Arc::clone(&pool));
        let mut follow_ups = FollowUpHandle::default();
        handler.handle(task("DSS::B:"), &mut follow_ups).await.unwrap();

        assert_eq!(ledger::unleased_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_lease_is_a_no_op() {
        let pool = pool().await;
        let handler = ReportHandler::new(pool);
        let mut follow_ups = FollowUpHandle::default();
        handler.handle(task("DSS::NOPE:"), &mut follow_ups).await.unwrap();
    }
}
