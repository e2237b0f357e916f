//! Report statistic/detail apply for the report-handler family (§4.7 steps
//! 5–9): one row per report key in `sz_dm_report` holding running totals,
//! one row per `(entity_id, related_id)` pair in `sz_dm_report_detail`
//! holding the per-entity/per-relation breakdown those totals are built
//! from, and the pending-row cleanup that releases the lease those rows
//! were read under. `related_id = 0` stands in for "no relation", since the
//! detail table's primary key includes it.
//!
//! All of it runs inside one mart transaction, committed only if the lease
//! is still provably held when the last statement finishes — otherwise
//! rolled back, so a handler that overran its lease window never leaves
//! behind a statistic or detail update a concurrent leaser might also apply.

use dm_types::{EntityId, OperationId, ReportKey};

use crate::error::{classify_postgres, MartError};
use crate::pool::MartPool;

const NO_RELATION: i64 = 0;

/// Detail-row key: either one entity id, or the canonical relation-bridge
/// pair, matching §4.7 step 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetailKey {
    pub entity_id: EntityId,
    pub related_id: Option<EntityId>,
}

/// What became of an [`apply_report_update`] call: either it committed
/// (carrying the number of pending rows it deleted, for the caller's own
/// lease-accounting sanity check), or the lease-duration guard fired and
/// every write above was rolled back instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Committed { deleted: u64 },
    LeaseExpired,
}

/// Applies one report handler's statistic upsert (`statistic`, skipped
/// when `None`), its per-key detail deltas, the zero-compaction those
/// deltas imply, and the pending-row cleanup for `lease_id`, all inside one
/// transaction. `deadline_exceeded` is evaluated immediately before the
/// commit/rollback decision — §4.7 step 9's guard against applying a lease
/// that may already have been reclaimed by another worker.
pub async fn apply_report_update(
    pool: &MartPool,
    report_key: &ReportKey,
    statistic: Option<(i64, i64, i64)>,
    details: &[(DetailKey, i64)],
    lease_id: &OperationId,
    deadline_exceeded: impl Fn() -> bool + Send + 'static,
) -> Result<ApplyOutcome, MartError> {
    match pool {
        MartPool::Postgres(_) => apply_report_update_postgres(pool, report_key, statistic, details, lease_id, deadline_exceeded).await,
        MartPool::Sqlite(_) => apply_report_update_sqlite(pool, report_key, statistic, details, lease_id, deadline_exceeded).await,
    }
}

async fn apply_report_update_postgres(
    pool: &MartPool,
    report_key: &ReportKey,
    statistic: Option<(i64, i64, i64)>,
    details: &[(DetailKey, i64)],
    lease_id: &OperationId,
    deadline_exceeded: impl Fn() -> bool,
) -> Result<ApplyOutcome, MartError> {
    let report_key_text = report_key.to_string();
    let lease_id_text = lease_id.as_str().to_owned();

    let mut client = pool.postgres_client().await?;
    let tx = client.transaction().await.map_err(classify_postgres)?;

    if let Some((entity_delta, record_delta, relation_delta)) = statistic {
        tx.execute(
            "INSERT INTO sz_dm_report (report_key, entity_count, record_count, relation_count) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (report_key) DO UPDATE SET \
               entity_count = sz_dm_report.entity_count + EXCLUDED.entity_count, \
               record_count = sz_dm_report.record_count + EXCLUDED.record_count, \
               relation_count = sz_dm_report.relation_count + EXCLUDED.relation_count",
            &[&report_key_text, &entity_delta, &record_delta, &relation_delta],
        )
        .await
        .map_err(classify_postgres)?;
    }

    for (key, delta) in details {
        let entity_id = key.entity_id.get();
        let related_id = key.related_id.map_or(NO_RELATION, EntityId::get);
        tx.execute(
            "INSERT INTO sz_dm_report_detail (report_key, entity_id, related_id, stat_count, modifier_id) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (report_key, entity_id, related_id) DO UPDATE SET \
               stat_count = sz_dm_report_detail.stat_count + EXCLUDED.stat_count, \
               modifier_id = EXCLUDED.modifier_id",
            &[&report_key_text, &entity_id, &related_id, delta, &lease_id_text],
        )
        .await
        .map_err(classify_postgres)?;
    }

    tx.execute(
        "DELETE FROM sz_dm_report_detail WHERE report_key = $1 AND modifier_id = $2 AND stat_count = 0",
        &[&report_key_text, &lease_id_text],
    )
    .await
    .map_err(classify_postgres)?;

    let deleted = tx
        .execute("DELETE FROM sz_dm_pending_report WHERE report_key = $1 AND lease_id = $2", &[&report_key_text, &lease_id_text])
        .await
        .map_err(classify_postgres)?;

    if deadline_exceeded() {
        tx.rollback().await.map_err(classify_postgres)?;
        return Ok(ApplyOutcome::LeaseExpired);
    }

    tx.commit().await.map_err(classify_postgres)?;
    Ok(ApplyOutcome::Committed { deleted })
}

async fn apply_report_update_sqlite(
    pool: &MartPool,
    report_key: &ReportKey,
    statistic: Option<(i64, i64, i64)>,
    details: &[(DetailKey, i64)],
    lease_id: &OperationId,
    deadline_exceeded: impl Fn() -> bool + Send + 'static,
) -> Result<ApplyOutcome, MartError> {
    let report_key_text = report_key.to_string();
    let lease_id_text = lease_id.as_str().to_owned();
    let details = details.to_vec();

    pool.with_sqlite(move |conn| {
        let tx = conn.transaction()?;

        if let Some((entity_delta, record_delta, relation_delta)) = statistic {
            tx.execute(
                "INSERT INTO sz_dm_report (report_key, entity_count, record_count, relation_count) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT (report_key) DO UPDATE SET \
                   entity_count = entity_count + excluded.entity_count, \
                   record_count = record_count + excluded.record_count, \
                   relation_count = relation_count + excluded.relation_count",
                rusqlite::params![report_key_text, entity_delta, record_delta, relation_delta],
            )?;
        }

        for (key, delta) in &details {
            let entity_id = key.entity_id.get();
            let related_id = key.related_id.map_or(NO_RELATION, EntityId::get);
            tx.execute(
                "INSERT INTO sz_dm_report_detail (report_key, entity_id, related_id, stat_count, modifier_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (report_key, entity_id, related_id) DO UPDATE SET \
                   stat_count = stat_count + excluded.stat_count, \
                   modifier_id = excluded.modifier_id",
                rusqlite::params![report_key_text, entity_id, related_id, delta, lease_id_text],
            )?;
        }

        tx.execute(
            "DELETE FROM sz_dm_report_detail WHERE report_key = ?1 AND modifier_id = ?2 AND stat_count = 0",
            rusqlite::params![report_key_text, lease_id_text],
        )?;

        let deleted = tx.execute(
            "DELETE FROM sz_dm_pending_report WHERE report_key = ?1 AND lease_id = ?2",
            rusqlite::params![report_key_text, lease_id_text],
        )?;

        if deadline_exceeded() {
            tx.rollback()?;
            return Ok(ApplyOutcome::LeaseExpired);
        }

        tx.commit()?;
        Ok(ApplyOutcome::Committed { deleted: deleted as u64 })
    })
    .await
}
