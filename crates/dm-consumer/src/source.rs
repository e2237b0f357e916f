//! The backend-agnostic seam the consumer loop drives.
//!
//! Each of the three deployable backends (broker, cloud queue, database
//! table) implements [`MessageSource`]; the loop in [`crate::consumer`]
//! knows nothing about AMQP, SQS, or SQL beyond this trait.

use async_trait::async_trait;
use dm_types::Shutdown;
use error_stack::Result;

use crate::message::InfoMessage;

/// A handle to one delivered message, opaque beyond its body. Returned
/// alongside the parsed [`InfoMessage`] so the consumer can ack/nack the
/// exact delivery it scheduled from, even though backends represent a
/// "delivery" very differently (an AMQP delivery tag, an SQS receipt
/// handle, a database row id).
pub struct Delivery {
    pub message: InfoMessage,
    token: DeliveryToken,
}

pub(crate) enum DeliveryToken {
    Broker(lapin::message::Delivery),
    Cloud { receipt_handle: String },
    Database { id: i64 },
}

impl Delivery {
    pub(crate) fn new(message: InfoMessage, token: DeliveryToken) -> Self {
        Self { message, token }
    }

    pub(crate) fn token(&self) -> &DeliveryToken {
        &self.token
    }
}

/// Pulls info messages from wherever they're queued and acknowledges (or
/// negatively acknowledges) them once the consumer knows whether the
/// schedule attempt succeeded.
///
/// `poll` returning `Ok(None)` means "nothing available right now, try
/// again" — not end of stream; these sources never end on their own,
/// they're stopped by a cancellation signal (§5's cooperative
/// cancellation).
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn poll(&self, cancelled: &tokio_util::sync::CancellationToken) -> Result<Option<Delivery>, Shutdown>;

    /// Confirms successful processing; the message will not be redelivered.
    async fn ack(&self, delivery: Delivery);

    /// Signals processing failed in a way the message should be
    /// redelivered (per §4.5: scheduling failed, not a parse failure).
    async fn nack(&self, delivery: Delivery);

    /// A rough count of messages not yet acknowledged, used by the C9
    /// idle check. Best-effort; backends that can't cheaply report this
    /// return 0 once their local in-flight set is empty.
    fn pending_count(&self) -> usize;
}
