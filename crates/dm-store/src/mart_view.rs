//! CRUD primitives over `sz_dm_entity` / `sz_dm_record` / `sz_dm_relation`.
//!
//! This is intentionally low-level: it knows how to read and write rows,
//! not how to diff an engine view against a mart view. The diff algorithm
//! (§4.6) lives in the refresh-entity handler; this module is its mart-side
//! vocabulary.

use dm_types::{EntityId, RecordKey, RelationView};
use rusqlite::OptionalExtension;

use crate::error::{classify_postgres, MartError};
use crate::pool::MartPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MartEntityRow {
    pub entity_id: EntityId,
    pub entity_name: Option<String>,
    pub record_summary: Option<String>,
    pub record_count: i64,
    pub related_count: i64,
    pub entity_hash: String,
}

/// Locks and returns the current `sz_dm_entity` row for `entity_id`, if
/// present. Callers that intend to write must already be inside the
/// transaction this lock belongs to — this crate does not manage
/// transaction scope itself, since a refresh spans several of these calls.
pub async fn fetch_entity_row_for_update(pool: &MartPool, entity_id: EntityId) -> Result<Option<MartEntityRow>, MartError> {
    let id = entity_id.get();
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            let row = client
                .query_opt(
                    "SELECT entity_id, entity_name, record_summary, record_count, related_count, entity_hash \
                     FROM sz_dm_entity WHERE entity_id = $1 FOR UPDATE",
                    &[&id],
                )
                .await
                .map_err(classify_postgres)?;
            Ok(row.map(|row| MartEntityRow {
                entity_id: EntityId::new(row.get(0)),
                entity_name: row.get(1),
                record_summary: row.get(2),
                record_count: row.get(3),
                related_count: row.get(4),
                entity_hash: row.get(5),
            }))
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                conn.query_row(
                    "SELECT entity_id, entity_name, record_summary, record_count, related_count, entity_hash \
                     FROM sz_dm_entity WHERE entity_id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok(MartEntityRow {
                            entity_id: EntityId::new(row.get(0)?),
                            entity_name: row.get(1)?,
                            record_summary: row.get(2)?,
                            record_count: row.get(3)?,
                            related_count: row.get(4)?,
                            entity_hash: row.get(5)?,
                        })
                    },
                )
                .optional()
            })
            .await
        }
    }
}

pub async fn fetch_records(pool: &MartPool, entity_id: EntityId) -> Result<Vec<RecordKey>, MartError> {
    let id = entity_id.get();
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            Ok(client
                .query("SELECT data_source, record_id FROM sz_dm_record WHERE entity_id = $1", &[&id])
                .await
                .map_err(classify_postgres)?
                .into_iter()
                .map(|row| RecordKey::new(row.get::<_, String>(0), row.get::<_, String>(1)))
                .collect())
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                let mut statement = conn.prepare("SELECT data_source, record_id FROM sz_dm_record WHERE entity_id = ?1")?;
                statement
                    .query_map(rusqlite::params![id], |row| {
                        Ok(RecordKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()
            })
            .await
        }
    }
}

pub async fn fetch_relations(pool: &MartPool, entity_id: EntityId) -> Result<Vec<RelationView>, MartError> {
    let id = entity_id.get();
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            Ok(client
                .query(
                    "SELECT entity_id_min, entity_id_max, match_level, match_key, principle \
                     FROM sz_dm_relation WHERE entity_id_min = $1 OR entity_id_max = $1",
                    &[&id],
                )
                .await
                .map_err(classify_postgres)?
                .into_iter()
                .map(|row| row_to_relation(id, row.get(0), row.get(1), row.get(2), row.get(3), row.get(4)))
                .collect())
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                let mut statement = conn.prepare(
                    "SELECT entity_id_min, entity_id_max, match_level, match_key, principle \
                     FROM sz_dm_relation WHERE entity_id_min = ?1 OR entity_id_max = ?1",
                )?;
                statement
                    .query_map(rusqlite::params![id], |row| {
                        Ok(row_to_relation(
                            id,
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()
            })
            .await
        }
    }
}

fn row_to_relation(id: i64, min: i64, max: i64, match_level: i16, match_key: String, principle: String) -> RelationView {
    let related = if min == id { max } else { min };
    RelationView {
        related_id: EntityId::new(related),
        match_level: u8::try_from(match_level).unwrap_or(u8::MAX),
        match_key,
        principle,
    }
}

pub async fn upsert_entity_row(pool: &MartPool, row: &MartEntityRow) -> Result<(), MartError> {
    let id = row.entity_id.get();
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute(
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
        MartPool::Sqlite(_) => {
            let row = row.clone();
            pool.with_sqlite(move |conn| {
                conn.execute(
                    "INSERT INTO sz_dm_entity (entity_id, entity_name, record_summary, record_count, related_count, entity_hash) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT (entity_id) DO UPDATE SET \
                       entity_name = excluded.entity_name, record_summary = excluded.record_summary, \
                       record_count = excluded.record_count, related_count = excluded.related_count, \
                       entity_hash = excluded.entity_hash",
                    rusqlite::params![id, row.entity_name, row.record_summary, row.record_count, row.related_count, row.entity_hash],
                )
                .map(|_| ())
            })
            .await?;
        }
    }
    Ok(())
}

pub async fn delete_entity_row(pool: &MartPool, entity_id: EntityId) -> Result<(), MartError> {
    let id = entity_id.get();
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute("DELETE FROM sz_dm_entity WHERE entity_id = $1", &[&id])
                .await
                .map_err(classify_postgres)?;
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| conn.execute("DELETE FROM sz_dm_entity WHERE entity_id = ?1", rusqlite::params![id]).map(|_| ()))
                .await?;
        }
    }
    Ok(())
}

pub async fn upsert_record(pool: &MartPool, record: &RecordKey, entity_id: EntityId) -> Result<(), MartError> {
    let id = entity_id.get();
    let (data_source, record_id) = (record.data_source.clone(), record.record_id.clone());
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute(
                    "INSERT INTO sz_dm_record (data_source, record_id, entity_id) VALUES ($1, $2, $3) \
                     ON CONFLICT (data_source, record_id) DO UPDATE SET entity_id = EXCLUDED.entity_id",
                    &[&data_source, &record_id, &id],
                )
                .await
                .map_err(classify_postgres)?;
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                conn.execute(
                    "INSERT INTO sz_dm_record (data_source, record_id, entity_id) VALUES (?1, ?2, ?3) \
                     ON CONFLICT (data_source, record_id) DO UPDATE SET entity_id = excluded.entity_id",
                    rusqlite::params![data_source, record_id, id],
                )
                .map(|_| ())
            })
            .await?;
        }
    }
    Ok(())
}

pub async fn delete_record(pool: &MartPool, record: &RecordKey) -> Result<(), MartError> {
    let (data_source, record_id) = (record.data_source.clone(), record.record_id.clone());
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute("DELETE FROM sz_dm_record WHERE data_source = $1 AND record_id = $2", &[&data_source, &record_id])
                .await
                .map_err(classify_postgres)?;
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                conn.execute("DELETE FROM sz_dm_record WHERE data_source = ?1 AND record_id = ?2", rusqlite::params![data_source, record_id])
                    .map(|_| ())
            })
            .await?;
        }
    }
    Ok(())
}

pub async fn upsert_relation(pool: &MartPool, relation: &RelationView, other_endpoint: EntityId) -> Result<(), MartError> {
    let (min, max) = EntityId::ordered_pair(relation.related_id, other_endpoint);
    let (min, max) = (min.get(), max.get());
    let match_level = i16::from(relation.match_level);
    let (match_key, principle) = (relation.match_key.clone(), relation.principle.clone());
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute(
                    "INSERT INTO sz_dm_relation (entity_id_min, entity_id_max, match_level, match_key, principle) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (entity_id_min, entity_id_max) DO UPDATE SET \
                       match_level = EXCLUDED.match_level, match_key = EXCLUDED.match_key, principle = EXCLUDED.principle",
                    &[&min, &max, &match_level, &match_key, &principle],
                )
                .await
                .map_err(classify_postgres)?;
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                conn.execute(
                    "INSERT INTO sz_dm_relation (entity_id_min, entity_id_max, match_level, match_key, principle) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT (entity_id_min, entity_id_max) DO UPDATE SET \
                       match_level = excluded.match_level, match_key = excluded.match_key, principle = excluded.principle",
                    rusqlite::params![min, max, match_level, match_key, principle],
                )
                .map(|_| ())
            })
            .await?;
        }
    }
    Ok(())
}

pub async fn delete_relation(pool: &MartPool, a: EntityId, b: EntityId) -> Result<(), MartError> {
    let (min, max) = EntityId::ordered_pair(a, b);
    let (min, max) = (min.get(), max.get());
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute("DELETE FROM sz_dm_relation WHERE entity_id_min = $1 AND entity_id_max = $2", &[&min, &max])
                .await
                .map_err(classify_postgres)?;
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                conn.execute("DELETE FROM sz_dm_relation WHERE entity_id_min = ?1 AND entity_id_max = ?2", rusqlite::params![min, max])
                    .map(|_| ())
            })
            .await?;
        }
    }
    Ok(())
}
