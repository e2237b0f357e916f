//! AMQP-style broker backend (C5), grounded on the `rabbit-info-uri` +
//! `rabbit-info-queue` configuration pair.
//!
//! Acks on successful scheduler commit, nacks with requeue on failure, per
//! §4.5. The consumer itself (one [`lapin::Consumer`] stream per instance)
//! supplies back-pressure: `basic_consume` with a bounded prefetch via
//! `basic_qos` keeps the broker from flooding us past our own concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dm_types::Shutdown;
use error_stack::{Report, Result, ResultExt};
use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::Mutex;

use crate::message::InfoMessage;
use crate::source::{Delivery, DeliveryToken, MessageSource};

pub struct BrokerSource {
    _connection: Connection,
    _channel: Channel,
    consumer: Mutex<Consumer>,
    in_flight: AtomicUsize,
}

impl BrokerSource {
    pub async fn connect(uri: &str, queue: &str, prefetch: u16) -> Result<Self, Shutdown> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .change_context(Shutdown)
            .attach_printable("failed to connect to the AMQP broker")?;
        let channel = connection.create_channel().await.change_context(Shutdown)?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .change_context(Shutdown)?;

        let consumer = channel
            .basic_consume(
                queue,
                "data-mart-replicator",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .change_context(Shutdown)
            .attach_printable_lazy(|| format!("failed to subscribe to queue {queue:?}"))?;

        Ok(Self {
            _connection: connection,
            _channel: channel,
            consumer: Mutex::new(consumer),
            in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MessageSource for BrokerSource {
    async fn poll(&self, cancelled: &tokio_util::sync::CancellationToken) -> Result<Option<Delivery>, Shutdown> {
        let mut consumer = self.consumer.lock().await;
        let next = tokio::select! {
            next = consumer.next() => next,
            () = cancelled.cancelled() => return Err(Report::new(Shutdown)),
        };
        drop(consumer);

        let Some(delivery) = next else {
            return Err(Report::new(Shutdown).attach_printable("broker consumer stream ended"));
        };
        let delivery = delivery.change_context(Shutdown).attach_printable("broker delivery error")?;

        match InfoMessage::parse(&delivery.data) {
            Ok(message) => {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Delivery::new(message, DeliveryToken::Broker(delivery))))
            }
            Err(error) => {
                tracing::warn!(%error, "dropping unparseable broker message");
                let _ = delivery.ack(BasicAckOptions::default()).await;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: Delivery) {
        if let DeliveryToken::Broker(inner) = delivery.token() {
            if let Err(error) = inner.ack(BasicAckOptions::default()).await {
                tracing::warn!(%error, "failed to ack broker delivery");
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn nack(&self, delivery: Delivery) {
        if let DeliveryToken::Broker(inner) = delivery.token() {
            let options = BasicNackOptions { requeue: true, ..BasicNackOptions::default() };
            if let Err(error) = inner.nack(options).await {
                tracing::warn!(%error, "failed to nack broker delivery");
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn pending_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
