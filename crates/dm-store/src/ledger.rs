//! The pending-delta ledger (C3): the durable, append-only staging area
//! between a refresh-entity commit and the report handler that folds its
//! deltas into `sz_dm_report`/`sz_dm_report_detail`.
//!
//! Timestamps are stored as Unix epoch seconds (`BIGINT`/`INTEGER`) rather
//! than a native timestamp type, so the same parameter binding works
//! unchanged across both dialects without pulling in dialect-specific
//! temporal `ToSql` adapters.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use dm_types::{EntityId, OperationId, ReportKey};

use crate::error::{classify_postgres, MartError};
use crate::pool::MartPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeltaRow {
    pub id: i64,
    pub entity_id: Option<EntityId>,
    pub related_id: Option<EntityId>,
    pub entity_delta: i64,
    pub record_delta: i64,
    pub relation_delta: i64,
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
        .try_into()
        .unwrap_or(i64::MAX)
}

/// Appends a new, unleased row. Never coalesces with an existing row at
/// append time — aggregation happens only when a report handler leases a
/// batch (§4.7).
pub async fn append(
    pool: &MartPool,
    report_key: &ReportKey,
    entity_id: Option<EntityId>,
    related_id: Option<EntityId>,
    entity_delta: i64,
    record_delta: i64,
    relation_delta: i64,
) -> Result<(), MartError> {
    let report_key_text = report_key.to_string();
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute(
                    "INSERT INTO sz_dm_pending_report \
                     (report_key, entity_id, related_id, entity_delta, record_delta, relation_delta) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &report_key_text,
                        &entity_id.map(EntityId::get),
                        &related_id.map(EntityId::get),
                        &entity_delta,
                        &record_delta,
                        &relation_delta,
                    ],
                )
                .await
                .map_err(classify_postgres)?;
            Ok(())
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                conn.execute(
                    "INSERT INTO sz_dm_pending_report \
                     (report_key, entity_id, related_id, entity_delta, record_delta, relation_delta) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        report_key_text,
                        entity_id.map(EntityId::get),
                        related_id.map(EntityId::get),
                        entity_delta,
                        record_delta,
                        relation_delta,
                    ],
                )
                .map(|_| ())
            })
            .await
        }
    }
}

/// Distinct report keys with at least one pending row, used at startup to
/// seed the follow-up loop's recovery set.
pub async fn distinct_keys(pool: &MartPool) -> Result<HashSet<ReportKey>, MartError> {
    let texts: Vec<String> = match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .query("SELECT DISTINCT report_key FROM sz_dm_pending_report", &[])
                .await
                .map_err(classify_postgres)?
                .into_iter()
                .map(|row| row.get(0))
                .collect()
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(|conn| {
                let mut statement = conn.prepare("SELECT DISTINCT report_key FROM sz_dm_pending_report")?;
                let rows = statement
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?
        }
    };

    Ok(texts
        .into_iter()
        .filter_map(|text| match text.parse() {
            Ok(key) => Some(key),
            Err(error) => {
                tracing::warn!(%text, %error, "dropping unparseable report key from pending ledger");
                None
            }
        })
        .collect())
}

/// Count of rows with no lease held, used by the C9 idle check: the core
/// is idle only once this reaches zero (everything appended has either
/// been leased for processing or already applied).
pub async fn unleased_count(pool: &MartPool) -> Result<i64, MartError> {
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            let row = client
                .query_one("SELECT COUNT(*) FROM sz_dm_pending_report WHERE lease_id IS NULL", &[])
                .await
                .map_err(classify_postgres)?;
            Ok(row.get(0))
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sz_dm_pending_report WHERE lease_id IS NULL", [], |row| row.get(0))
            })
            .await
        }
    }
}

/// Implements steps 2–4 of the report-handler algorithm: reclaim abandoned
/// leases, take a fresh lease on everything currently unleased for `K`, and
/// read the leased rows back.
pub async fn lease(
    pool: &MartPool,
    report_key: &ReportKey,
    lease_id: &OperationId,
    lease_duration_secs: i64,
) -> Result<Vec<PendingDeltaRow>, MartError> {
    let report_key_text = report_key.to_string();
    let now = now_epoch_seconds();
    let expire_at = now + lease_duration_secs;
    // §4.7 step 2's generous cutoff: reclaim leases that look stale even
    // allowing for up to one full lease window of clock skew, rather than
    // only ones that have strictly expired by this node's clock.
    let reclaim_cutoff = now + 2 * lease_duration_secs;
    let lease_id_text = lease_id.as_str().to_owned();

    match pool {
        MartPool::Postgres(_) => {
            let mut client = pool.postgres_client().await?;
            let tx = client.transaction().await.map_err(classify_postgres)?;

            let expired = tx
                .execute(
                    "UPDATE sz_dm_pending_report SET lease_id = NULL, expire_lease_at = NULL \
                     WHERE report_key = $1 AND lease_id IS NOT NULL AND expire_lease_at < $2",
                    &[&report_key_text, &reclaim_cutoff],
                )
                .await
                .map_err(classify_postgres)?;
            if expired > 0 {
                tracing::warn!(report_key = %report_key_text, rows = expired, "reclaimed abandoned lease(s)");
            }

            tx.execute(
                "UPDATE sz_dm_pending_report SET lease_id = $1, expire_lease_at = $2 \
                 WHERE report_key = $3 AND lease_id IS NULL",
                &[&lease_id_text, &expire_at, &report_key_text],
            )
            .await
            .map_err(classify_postgres)?;

            let rows = tx
                .query(
                    "SELECT id, entity_id, related_id, entity_delta, record_delta, relation_delta \
                     FROM sz_dm_pending_report WHERE report_key = $1 AND lease_id = $2",
                    &[&report_key_text, &lease_id_text],
                )
                .await
                .map_err(classify_postgres)?
                .into_iter()
                .map(|row| PendingDeltaRow {
                    id: row.get(0),
                    entity_id: row.get::<_, Option<i64>>(1).map(EntityId::new),
                    related_id: row.get::<_, Option<i64>>(2).map(EntityId::new),
                    entity_delta: row.get(3),
                    record_delta: row.get(4),
                    relation_delta: row.get(5),
                })
                .collect();

            tx.commit().await.map_err(classify_postgres)?;
            Ok(rows)
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                conn.execute(
                    "UPDATE sz_dm_pending_report SET lease_id = NULL, expire_lease_at = NULL \
                     WHERE report_key = ?1 AND lease_id IS NOT NULL AND expire_lease_at < ?2",
                    rusqlite::params![report_key_text, reclaim_cutoff],
                )?;
                conn.execute(
                    "UPDATE sz_dm_pending_report SET lease_id = ?1, expire_lease_at = ?2 \
                     WHERE report_key = ?3 AND lease_id IS NULL",
                    rusqlite::params![lease_id_text, expire_at, report_key_text],
                )?;
                let mut statement = conn.prepare(
                    "SELECT id, entity_id, related_id, entity_delta, record_delta, relation_delta \
                     FROM sz_dm_pending_report WHERE report_key = ?1 AND lease_id = ?2",
                )?;
                let rows = statement
                    .query_map(rusqlite::params![report_key_text, lease_id_text], |row| {
                        Ok(PendingDeltaRow {
                            id: row.get(0)?,
                            entity_id: row.get::<_, Option<i64>>(1)?.map(EntityId::new),
                            related_id: row.get::<_, Option<i64>>(2)?.map(EntityId::new),
                            entity_delta: row.get(3)?,
                            record_delta: row.get(4)?,
                            relation_delta: row.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
        }
    }
}

/// Deletes every pending row belonging to `lease_id` for `K`, the
/// pending-row cleanup in step 8 of the report-handler algorithm. Returns
/// the number of rows deleted, so the caller can assert it matches the
/// number leased.
pub async fn delete_leased(pool: &MartPool, report_key: &ReportKey, lease_id: &OperationId) -> Result<u64, MartError> {
    let report_key_text = report_key.to_string();
    let lease_id_text = lease_id.as_str().to_owned();
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute(
                    "DELETE FROM sz_dm_pending_report WHERE report_key = $1 AND lease_id = $2",
                    &[&report_key_text, &lease_id_text],
                )
                .await
                .map_err(classify_postgres)
        }
        MartPool::Sqlite(_) => pool
            .with_sqlite(move |conn| {
                conn.execute(
                    "DELETE FROM sz_dm_pending_report WHERE report_key = ?1 AND lease_id = ?2",
                    rusqlite::params![report_key_text, lease_id_text],
                )
                .map(|count| count as u64)
            })
            .await,
    }
}
