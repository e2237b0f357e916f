//! The refresh-entity handler (C6): fetches both sides of one entity,
//! diffs them via [`crate::diff`], and writes the reconciliation to the
//! mart plus the pending-delta ledger that feeds the report handlers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dm_entity_repo::{EngineUnavailable, EntityRepository};
use dm_scheduler::{DispatchedTask, FollowUpHandle, Handler, HandlerFailed, HandlerOutcome, NewTask, Resource, RetryRequested};
use dm_store::apply::{self, PendingDeltaWrite, RefreshWrite};
use dm_store::{ledger, mart_view, MartPool};
use dm_types::EntityId;
use error_stack::Report;
use serde_json::json;

use crate::diff::{compute_refresh_plan, MartSnapshot};
use crate::followup::RecoverySet;

pub struct RefreshEntityHandler {
    entity_repo: Arc<dyn EntityRepository>,
    pool: Arc<MartPool>,
    recovery_set: RecoverySet,
}

impl RefreshEntityHandler {
    #[must_use]
    pub fn new(entity_repo: Arc<dyn EntityRepository>, pool: Arc<MartPool>, recovery_set: RecoverySet) -> Self {
        Self { entity_repo, pool, recovery_set }
    }
}

fn parse_entity_id(task: &DispatchedTask) -> Result<EntityId, HandlerOutcome> {
    task.parameters["entity_id"]
        .as_i64()
        .map(EntityId::new)
        .ok_or_else(|| HandlerOutcome::Fatal(Report::new(HandlerFailed).attach_printable("task parameters missing integer entity_id")))
}

fn engine_unavailable_outcome(context: &'static str, report: Report<EngineUnavailable>) -> HandlerOutcome {
    HandlerOutcome::Retryable(Report::new(RetryRequested).attach_printable(format!("{context}: {report:?}")))
}

#[async_trait]
impl Handler for RefreshEntityHandler {
    async fn handle(&self, task: DispatchedTask, follow_ups: &mut FollowUpHandle) -> Result<(), HandlerOutcome> {
        let entity_id = parse_entity_id(&task)?;

        let engine_view = self
            .entity_repo
            .fetch_entity(entity_id)
            .await
            .map_err(|report| engine_unavailable_outcome("fetching engine view", report))?;

        let row = mart_view::fetch_entity_row_for_update(&self.pool, entity_id)
            .await
            .map_err(|error| mart_error_outcome("reading mart entity row", error))?;
        let records = mart_view::fetch_records(&self.pool, entity_id)
            .await
            .map_err(|error| mart_error_outcome("reading mart records", error))?;
        let relations = mart_view::fetch_relations(&self.pool, entity_id)
            .await
            .map_err(|error| mart_error_outcome("reading mart relations", error))?;

        let candidate_others: Vec<EntityId> = relations
            .iter()
            .map(|relation| relation.related_id)
            .chain(engine_view.iter().flat_map(|view| view.relations.iter().map(|relation| relation.related_id)))
            .filter(|&other| entity_id < other)
            .collect();

        let mut other_entity_sources = HashMap::new();
        for other in candidate_others {
            if other_entity_sources.contains_key(&other) {
                continue;
            }
            let other_records = mart_view::fetch_records(&self.pool, other)
                .await
                .map_err(|error| mart_error_outcome("reading related entity's records", error))?;
            let mut sources: Vec<String> = other_records.into_iter().map(|record| record.data_source).collect();
            sources.sort_unstable();
            sources.dedup();
            other_entity_sources.insert(other, sources);
        }

        let snapshot = MartSnapshot {
            row: row.as_ref(),
            records: &records,
            relations: &relations,
        };
        let plan = compute_refresh_plan(entity_id, engine_view.as_ref(), &snapshot, &other_entity_sources);

        apply_plan(&self.pool, entity_id, &plan).await.map_err(|error| mart_error_outcome("applying refresh plan", error))?;

        for other in &plan.follow_up_entities {
            follow_ups.enqueue(NewTask::new("REFRESH_ENTITY", json!({ "entity_id": other.get() })).with_resource(Resource::entity(*other)));
        }

        // §4.6 step 9: one follow-up per report key touched by this refresh,
        // coalesced by the scheduler's de-duplication rule so arbitrarily
        // many deltas against the same key collapse into one update task.
        // Also note each key in the C8 recovery set, so a follow-up lost to
        // a crash or a retry-exhausted task is re-asserted on its next
        // cycle.
        let touched_keys: HashSet<String> = plan.report_deltas.iter().map(|delta| delta.report_key.to_string()).collect();
        for key_text in &touched_keys {
            let report_key: dm_types::ReportKey = key_text.parse().expect("report deltas always carry a canonical report key");
            follow_ups.enqueue(
                NewTask::new(report_key.action(), json!({ "report_key": key_text }))
                    .with_resource(Resource::report(&report_key)),
            );
            self.recovery_set.note(report_key);
        }

        if !plan.follow_up_entities.is_empty() || !touched_keys.is_empty() {
            follow_ups.commit();
        }

        Ok(())
    }
}

/// Builds the batched write for one refresh and applies it in a single
/// mart transaction (§4.6 step 10): a failure partway must leave the mart
/// exactly where it started, never with the new entity hash committed but
/// its pending deltas lost.
async fn apply_plan(pool: &MartPool, entity_id: EntityId, plan: &crate::diff::RefreshPlan) -> Result<(), dm_store::MartError> {
    let mut write = RefreshWrite::new(entity_id);
    write.record_upserts = plan.record_upserts.clone();
    write.record_deletes = plan.record_deletes.clone();
    write.relation_upserts = plan.relation_upserts.clone();
    write.relation_deletes = plan.relation_deletes.clone();
    write.entity_write = plan.entity_write.clone();
    write.delete_entity = plan.delete_entity;
    write.pending_deltas = plan
        .report_deltas
        .iter()
        .map(|delta| PendingDeltaWrite {
            report_key: delta.report_key.clone(),
            entity_id: delta.entity_id,
            related_id: delta.related_id,
            entity_delta: delta.entity_delta,
            record_delta: delta.record_delta,
            relation_delta: delta.relation_delta,
        })
        .collect();

    apply::apply_refresh(pool, &write).await
}

fn mart_error_outcome(context: &'static str, error: dm_store::MartError) -> HandlerOutcome {
    match error {
        dm_store::MartError::Transient(report) => {
            HandlerOutcome::Retryable(Report::new(RetryRequested).attach_printable(format!("{context}: {report}")))
        }
        dm_store::MartError::Fatal(report) => HandlerOutcome::Fatal(Report::new(HandlerFailed).attach_printable(format!("{context}: {report}"))),
    }
}

#[cfg(test)]
mod tests {
    use dm_entity_repo::MockEntityRepository;
    use dm_types::{EntityView, RecordKey};

    use super::*;

    async fn pool() -> Arc<MartPool> {
        let uri = dm_store::parse_mart_uri("sqlite::memory:").expect("valid in-memory sqlite uri");
        let pool = MartPool::connect(&uri, 1).await.expect("pool connects");
        dm_store::run_migrations(&pool).await.expect("migrations apply");
        Arc::new(pool)
    }

    #[tokio::test]
    async fn new_entity_creates_mart_row_and_data_source_deltas() {
        let pool = pool().await;
        let repo = Arc::new(MockEntityRepository::new());
        repo.set_entity(EntityView {
            entity_id: EntityId::new(1),
            entity_name: Some("ACME".to_owned()),
            record_summary: None,
            members: vec![RecordKey::new("CUSTOMERS", "1")],
            relations: vec![],
        });

        let handler = RefreshEntityHandler::new(repo, Arc::clone(&pool), RecoverySet::new());
        let task = DispatchedTask {
            id: 1,
            action: "REFRESH_ENTITY".to_owned(),
            parameters: json!({ "entity_id": 1 }),
            resource: Some(Resource::entity(1)),
            multiplicity: 1,
            attempt: 0,
        };
        let mut follow_ups = FollowUpHandle::default();
        handler.handle(task, &mut follow_ups).await.expect("refresh succeeds");

        let row = mart_view::fetch_entity_row_for_update(&pool, EntityId::new(1))
            .await
            .expect("read succeeds")
            .expect("row now exists");
        assert_eq!(row.record_count, 1);

        let keys = ledger::distinct_keys(&pool).await.expect("ledger read succeeds");
        assert!(keys.iter().any(|key| key.to_string().starts_with("DSS:")));
    }

    #[tokio::test]
    async fn unchanged_entity_is_a_no_op() {
        let pool = pool().await;
        let repo = Arc::new(MockEntityRepository::new());
        repo.set_entity(EntityView {
            entity_id: EntityId::new(2),
            entity_name: None,
            record_summary: None,
            members: vec![RecordKey::new("CUSTOMERS", "2")],
            relations: vec![],
        });

        let handler =
            RefreshEntityHandler::new(Arc::clone(&repo) as Arc<dyn EntityRepository>, Arc::clone(&pool), RecoverySet::new());
        let make_task = || DispatchedTask {
            id: 1,
            action: "REFRESH_ENTITY".to_owned(),
            parameters: json!({ "entity_id": 2 }),
            resource: Some(Resource::entity(2)),
            multiplicity: 1,
            attempt: 0,
        };

        let mut follow_ups = FollowUpHandle::default();
        handler.handle(make_task(), &mut follow_ups).await.expect("first refresh succeeds");
        let before = ledger::distinct_keys(&pool).await.expect("ledger read succeeds").len();

        let mut follow_ups = FollowUpHandle::default();
        handler.handle(make_task(), &mut follow_ups).await.expect("second refresh succeeds");
        let after = ledger::distinct_keys(&pool).await.expect("ledger read succeeds").len();

        assert_eq!(before, after, "re-running an unchanged refresh must not append further deltas");
    }
}
