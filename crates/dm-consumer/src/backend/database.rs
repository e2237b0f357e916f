//! Database-backed queue backend (C5), enabled by `database-info-queue`.
//!
//! Reads rows from `sz_dm_info_message` via [`dm_store::queue`]. On
//! SQLite the mart connection has exactly one writer (per §4.2), so this
//! backend naturally serializes with every other mart write; there is no
//! separate pool to contend over.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dm_store::MartPool;
use dm_types::Shutdown;
use error_stack::{Report, Result};

use crate::message::InfoMessage;
use crate::source::{Delivery, DeliveryToken, MessageSource};

/// How long to sleep between empty polls, so an idle queue doesn't spin
/// the worker against the database.
const EMPTY_POLL_BACKOFF: Duration = Duration::from_millis(500);

pub struct DatabaseSource {
    pool: Arc<MartPool>,
}

impl DatabaseSource {
    #[must_use]
    pub fn new(pool: Arc<MartPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageSource for DatabaseSource {
    async fn poll(&self, cancelled: &tokio_util::sync::CancellationToken) -> Result<Option<Delivery>, Shutdown> {
        let claimed = tokio::select! {
            claimed = dm_store::queue::claim_next(&self.pool) => claimed,
            () = cancelled.cancelled() => return Err(Report::new(Shutdown)),
        };
        let claimed = claimed.map_err(|error| Report::new(Shutdown).attach_printable(format!("{error}")))?;

        let Some(row) = claimed else {
            tokio::select! {
                () = tokio::time::sleep(EMPTY_POLL_BACKOFF) => {}
                () = cancelled.cancelled() => return Err(Report::new(Shutdown)),
            }
            return Ok(None);
        };

        match InfoMessage::parse(row.payload.as_bytes()) {
            Ok(message) => Ok(Some(Delivery::new(message, DeliveryToken::Database { id: row.id }))),
            Err(error) => {
                tracing::warn!(%error, id = row.id, "dropping unparseable queued message");
                if let Err(error) = dm_store::queue::delete(&self.pool, row.id).await {
                    tracing::warn!(%error, "failed to delete unparseable queued message");
                }
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: Delivery) {
        if let DeliveryToken::Database { id } = delivery.token() {
            if let Err(error) = dm_store::queue::delete(&self.pool, *id).await {
                tracing::warn!(%error, id, "failed to delete acked queued message");
            }
        }
    }

    async fn nack(&self, delivery: Delivery) {
        if let DeliveryToken::Database { id } = delivery.token() {
            if let Err(error) = dm_store::queue::release(&self.pool, *id).await {
                tracing::warn!(%error, id, "failed to release nacked queued message");
            }
        }
    }

    fn pending_count(&self) -> usize {
        0
    }
}
