//! Backing store for the database-backed message consumer (C5): the
//! `sz_dm_info_message` table, claimed with `SELECT … FOR UPDATE SKIP
//! LOCKED` (or the SQLite equivalent — a single connection, so there is
//! never a second writer to skip past).

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::OptionalExtension;

use crate::error::{classify_postgres, MartError};
use crate::pool::MartPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: i64,
    pub payload: String,
}

/// Visibility window a claimed row is hidden from other claimants for,
/// mirroring the cloud queue's visibility timeout so the same consumer
/// loop shape works across backends.
const LOCK_DURATION_SECS: i64 = 60;

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
        .try_into()
        .unwrap_or(i64::MAX)
}

pub async fn enqueue(pool: &MartPool, payload: &str) -> Result<(), MartError> {
    let payload = payload.to_owned();
    let now = now_epoch_seconds();
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute(
                    "INSERT INTO sz_dm_info_message (payload, available_at) VALUES ($1, $2)",
                    &[&payload, &now],
                )
                .await
                .map_err(classify_postgres)?;
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                conn.execute(
                    "INSERT INTO sz_dm_info_message (payload, available_at) VALUES (?1, ?2)",
                    rusqlite::params![payload, now],
                )
                .map(|_| ())
            })
            .await?;
        }
    }
    Ok(())
}

/// Claims one available row: unlocked, or whose lock has expired.
/// PostgreSQL does this with `FOR UPDATE SKIP LOCKED` so concurrent
/// consumers (if ever run more than one) don't block each other on
/// in-flight rows; SQLite has exactly one writer so the equivalent is
/// just an ordinary `UPDATE … WHERE` claim.
pub async fn claim_next(pool: &MartPool) -> Result<Option<QueuedMessage>, MartError> {
    let now = now_epoch_seconds();
    let locked_until = now + LOCK_DURATION_SECS;
    match pool {
        MartPool::Postgres(_) => {
            let mut client = pool.postgres_client().await?;
            let tx = client.transaction().await.map_err(classify_postgres)?;
            let row = tx
                .query_opt(
                    "SELECT id, payload FROM sz_dm_info_message \
                     WHERE available_at <= $1 AND (locked_until IS NULL OR locked_until < $1) \
                     ORDER BY id FOR UPDATE SKIP LOCKED LIMIT 1",
                    &[&now],
                )
                .await
                .map_err(classify_postgres)?;
            let Some(row) = row else {
                tx.commit().await.map_err(classify_postgres)?;
                return Ok(None);
            };
            let id: i64 = row.get(0);
            let payload: String = row.get(1);
            tx.execute(
                "UPDATE sz_dm_info_message SET locked_until = $1 WHERE id = $2",
                &[&locked_until, &id],
            )
            .await
            .map_err(classify_postgres)?;
            tx.commit().await.map_err(classify_postgres)?;
            Ok(Some(QueuedMessage { id, payload }))
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                let tx = conn.transaction()?;
                let claimed: Option<(i64, String)> = tx
                    .query_row(
                        "SELECT id, payload FROM sz_dm_info_message \
                         WHERE available_at <= ?1 AND (locked_until IS NULL OR locked_until < ?1) \
                         ORDER BY id LIMIT 1",
                        rusqlite::params![now],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((id, payload)) = claimed else {
                    tx.commit()?;
                    return Ok(None);
                };
                tx.execute(
                    "UPDATE sz_dm_info_message SET locked_until = ?1 WHERE id = ?2",
                    rusqlite::params![locked_until, id],
                )?;
                tx.commit()?;
                Ok(Some(QueuedMessage { id, payload }))
            })
            .await
        }
    }
}

pub async fn delete(pool: &MartPool, id: i64) -> Result<(), MartError> {
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute("DELETE FROM sz_dm_info_message WHERE id = $1", &[&id])
                .await
                .map_err(classify_postgres)?;
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| conn.execute("DELETE FROM sz_dm_info_message WHERE id = ?1", rusqlite::params![id]).map(|_| ()))
                .await?;
        }
    }
    Ok(())
}

/// Releases a claim without deleting the row, making it immediately
/// reclaimable — the database-queue analogue of a broker nack/requeue.
pub async fn release(pool: &MartPool, id: i64) -> Result<(), MartError> {
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            client
                .execute("UPDATE sz_dm_info_message SET locked_until = NULL WHERE id = $1", &[&id])
                .await
                .map_err(classify_postgres)?;
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(move |conn| {
                conn.execute("UPDATE sz_dm_info_message SET locked_until = NULL WHERE id = ?1", rusqlite::params![id])
                    .map(|_| ())
            })
            .await?;
        }
    }
    Ok(())
}

pub async fn pending_count(pool: &MartPool) -> Result<i64, MartError> {
    match pool {
        MartPool::Postgres(_) => {
            let client = pool.postgres_client().await?;
            let row = client
                .query_one("SELECT COUNT(*) FROM sz_dm_info_message", &[])
                .await
                .map_err(classify_postgres)?;
            Ok(row.get(0))
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(|conn| conn.query_row("SELECT COUNT(*) FROM sz_dm_info_message", [], |row| row.get(0)))
                .await
        }
    }
}

