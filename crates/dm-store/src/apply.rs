//! Atomic batch-apply for the refresh-entity handler (C6 step 10): every
//! record/relation/entity-row write and pending-delta append that one
//! refresh produces, executed against a single mart transaction.
//!
//! [`crate::mart_view`] and [`crate::ledger::append`] stay as the
//! standalone, individually-autocommitting primitives they always were —
//! useful on their own for tests and ad-hoc tooling — but the production
//! refresh handler needs all of it to land, or none of it, in one commit:
//! a partial write followed by a retry would otherwise leave the mart
//! already reflecting the new entity hash while the pending deltas that
//! describe how it got there were never appended, and a retried refresh
//! that recomputes an unchanged hash never re-derives them.

use dm_types::{EntityId, RecordKey, RelationView, ReportKey};

use crate::error::{classify_postgres, MartError};
use crate::mart_view::MartEntityRow;
use crate::pool::MartPool;

/// One pending-delta row to append, in the shape [`crate::ledger::append`]
/// takes as individual arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeltaWrite {
    pub report_key: ReportKey,
    pub entity_id: Option<EntityId>,
    pub related_id: Option<EntityId>,
    pub entity_delta: i64,
    pub record_delta: i64,
    pub relation_delta: i64,
}

/// Everything one refresh-entity pass needs to persist, for one entity.
#[derive(Debug, Clone)]
pub struct RefreshWrite {
    pub entity_id: EntityId,
    pub record_upserts: Vec<RecordKey>,
    pub record_deletes: Vec<RecordKey>,
    pub relation_upserts: Vec<RelationView>,
    pub relation_deletes: Vec<EntityId>,
    pub entity_write: Option<MartEntityRow>,
    pub delete_entity: bool,
    pub pending_deltas: Vec<PendingDeltaWrite>,
}

impl RefreshWrite {
    #[must_use]
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            record_upserts: Vec::new(),
            record_deletes: Vec::new(),
            relation_upserts: Vec::new(),
            relation_deletes: Vec::new(),
            entity_write: None,
            delete_entity: false,
            pending_deltas: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_upserts.is_empty()
            && self.record_deletes.is_empty()
            && self.relation_upserts.is_empty()
            && self.relation_deletes.is_empty()
            && self.entity_write.is_none()
            && !self.delete_entity
            && self.pending_deltas.is_empty()
    }
}

/// Applies `write` inside one mart transaction, committing exactly once.
/// A no-op `write` (an unchanged refresh) never opens a transaction at all.
pub async fn apply_refresh(pool: &MartPool, write: &RefreshWrite) -> Result<(), MartError> {
    if write.is_empty() {
        return Ok(());
    }
    match pool {
        MartPool::Postgres(_) => apply_refresh_postgres(pool, write).await,
        MartPool::Sqlite(_) => apply_refresh_sqlite(pool, write).await,
    }
}

async fn apply_refresh_postgres(pool: &MartPool, write: &RefreshWrite) -> Result<(), MartError> {
    let id = write.entity_id.get();
    let mut client = pool.postgres_client().await?;
    let tx = client.transaction().await.map_err(classify_postgres)?;

    for record in &write.record_upserts {
        tx.execute(
            "INSERT INTO sz_dm_record (data_source, record_id, entity_id) VALUES ($1, $2, $3) \
             ON CONFLICT (data_source, record_id) DO UPDATE SET entity_id = EXCLUDED.entity_id",
            &[&record.data_source, &record.record_id, &id],
        )
        .await
        .map_err(classify_postgres)?;
    }
    for record in &write.record_deletes {
        tx.execute(
            "DELETE FROM sz_dm_record WHERE data_source = $1 AND record_id = $2",
            &[&record.data_source, &record.record_id],
        )
        .await
        .map_err(classify_postgres)?;
    }
    for relation in &write.relation_upserts {
        let (min, max) = EntityId::ordered_pair(relation.related_id, write.entity_id);
        let (min, max) = (min.get(), max.get());
        let match_level = i16::from(relation.match_level);
        tx.execute(
            "INSERT INTO sz_dm_relation (entity_id_min, entity_id_max, match_level, match_key, principle) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (entity_id_min, entity_id_max) DO UPDATE SET \
               match_level = EXCLUDED.match_level, match_key = EXCLUDED.match_key, principle = EXCLUDED.principle",
            &[&min, &max, &match_level, &relation.match_key, &relation.principle],
        )
        .await
        .map_err(classify_postgres)?;
    }
    for related_id in &write.relation_deletes {
        let (min, max) = EntityId::ordered_pair(write.entity_id, *related_id);
        let (min, max) = (min.get(), max.get());
        tx.execute("DELETE FROM sz_dm_relation WHERE entity_id_min = $1 AND entity_id_max = $2", &[&min, &max])
            .await
            .map_err(classify_postgres)?;
    }
    if let Some(row) = &write.entity_write {
        tx.execute(
            "INSERT INTO sz_dm_entity (entity_id, entity_name, record_summary, record_count, related_count, entity_hash) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (entity_id) DO UPDATE SET \
               entity_name = EXCLUDED.entity_name, record_summary = EXCLUDED.record_summary, \
               record_count = EXCLUDED.record_count, related_count = EXCLUDED.related_count, \
               entity_hash = EXCLUDED.entity_hash",
            &[&id, &row.entity_name, &row.record_summary, &row.record_count, &row.related_count, &row.entity_hash],
        )
        .await
        .map_err(classify_postgres)?;
    }
    if write.delete_entity {
        tx.execute("DELETE FROM sz_dm_entity WHERE entity_id = $1", &[&id]).await.map_err(classify_postgres)?;
    }
    for delta in &write.pending_deltas {
        let report_key_text = delta.report_key.to_string();
        tx.execute(
            "INSERT INTO sz_dm_pending_report \
             (report_key, entity_id, related_id, entity_delta, record_delta, relation_delta) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &report_key_text,
                &delta.entity_id.map(EntityId::get),
                &delta.related_id.map(EntityId::get),
                &delta.entity_delta,
                &delta.record_delta,
                &delta.relation_delta,
            ],
        )
        .await
        .map_err(classify_postgres)?;
    }

    tx.commit().await.map_err(classify_postgres)
}

async fn apply_refresh_sqlite(pool: &MartPool, write: &RefreshWrite) -> Result<(), MartError> {
    let write = write.clone();
    pool.with_sqlite(move |conn| {
        let tx = conn.transaction()?;
        let id = write.entity_id.get();

        for record in &write.record_upserts {
            tx.execute(
                "INSERT INTO sz_dm_record (data_source, record_id, entity_id) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (data_source, record_id) DO UPDATE SET entity_id = excluded.entity_id",
                rusqlite::params![record.data_source, record.record_id, id],
            )?;
        }
        for record in &write.record_deletes {
            tx.execute(
                "DELETE FROM sz_dm_record WHERE data_source = ?1 AND record_id = ?2",
                rusqlite::params![record.data_source, record.record_id],
            )?;
        }
        for relation in &write.relation_upserts {
            let (min, max) = EntityId::ordered_pair(relation.related_id, write.entity_id);
            let (min, max) = (min.get(), max.get());
            let match_level = i16::from(relation.match_level);
            tx.execute(
                "INSERT INTO sz_dm_relation (entity_id_min, entity_id_max, match_level, match_key, principle) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (entity_id_min, entity_id_max) DO UPDATE SET \
                   match_level = excluded.match_level, match_key = excluded.match_key, principle = excluded.principle",
                rusqlite::params![min, max, match_level, relation.match_key, relation.principle],
            )?;
        }
        for related_id in &write.relation_deletes {
            let (min, max) = EntityId::ordered_pair(write.entity_id, *related_id);
            let (min, max) = (min.get(), max.get());
            tx.execute("DELETE FROM sz_dm_relation WHERE entity_id_min = ?1 AND entity_id_max = ?2", rusqlite::params![min, max])?;
        }
        if let Some(row) = &write.entity_write {
            tx.execute(
                "INSERT INTO sz_dm_entity (entity_id, entity_name, record_summary, record_count, related_count, entity_hash) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT (entity_id) DO UPDATE SET \
                   entity_name = excluded.entity_name, record_summary = excluded.record_summary, \
                   record_count = excluded.record_count, related_count = excluded.related_count, \
                   entity_hash = excluded.entity_hash",
                rusqlite::params![id, row.entity_name, row.record_summary, row.record_count, row.related_count, row.entity_hash],
            )?;
        }
        if write.delete_entity {
            tx.execute("DELETE FROM sz_dm_entity WHERE entity_id = ?1", rusqlite::params![id])?;
        }
        for delta in &write.pending_deltas {
            let report_key_text = delta.report_key.to_string();
            tx.execute(
                "INSERT INTO sz_dm_pending_report \
                 (report_key, entity_id, related_id, entity_delta, record_delta, relation_delta) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    report_key_text,
                    delta.entity_id.map(EntityId::get),
                    delta.related_id.map(EntityId::get),
                    delta.entity_delta,
                    delta.record_delta,
                    delta.relation_delta,
                ],
            )?;
        }

        tx.commit()
    })
    .await
}
