//! Cloud queue backend (C5), grounded on the `sqs-info-uri` configuration
//! option: long-poll receive with visibility-timeout semantics.
//!
//! Unlike the broker backend, a cloud-queue delivery's "lease" on the
//! message (its visibility timeout) can expire while the scheduler
//! commit is still in flight, so each delivery gets a background renewer
//! that extends visibility until the consumer acks or nacks it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use dm_types::Shutdown;
use error_stack::{Report, Result, ResultExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::message::InfoMessage;
use crate::source::{Delivery, DeliveryToken, MessageSource};

/// How far ahead of expiry each renewal extends the timeout, and how
/// often the renewer wakes up to do it. Chosen so a renewal always lands
/// comfortably before the prior one expires even under scheduler jitter.
const VISIBILITY_TIMEOUT_SECS: i32 = 60;
const RENEW_INTERVAL: Duration = Duration::from_secs(40);

pub struct CloudSource {
    client: Client,
    queue_url: String,
    renewers: Mutex<HashMap<String, JoinHandle<()>>>,
    in_flight: AtomicUsize,
}

impl CloudSource {
    pub async fn connect(queue_url: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: Client::new(&config),
            queue_url: queue_url.into(),
            renewers: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    async fn spawn_renewer(&self, receipt_handle: String) {
        let client = self.client.clone();
        let queue_url = self.queue_url.clone();
        let handle_for_task = receipt_handle.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(RENEW_INTERVAL).await;
                let result = client
                    .change_message_visibility()
                    .queue_url(&queue_url)
                    .receipt_handle(&handle_for_task)
                    .visibility_timeout(VISIBILITY_TIMEOUT_SECS)
                    .send()
                    .await;
                if let Err(error) = result {
                    tracing::warn!(%error, "failed to extend SQS visibility timeout, message may be redelivered");
                    return;
                }
            }
        });
        self.renewers.lock().await.insert(receipt_handle, task);
    }

    async fn stop_renewer(&self, receipt_handle: &str) {
        if let Some(task) = self.renewers.lock().await.remove(receipt_handle) {
            task.abort();
        }
    }
}

#[async_trait]
impl MessageSource for CloudSource {
    async fn poll(&self, cancelled: &tokio_util::sync::CancellationToken) -> Result<Option<Delivery>, Shutdown> {
        let receive = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(20)
            .visibility_timeout(VISIBILITY_TIMEOUT_SECS);

        let response = tokio::select! {
            response = receive.send() => response,
            () = cancelled.cancelled() => return Err(Report::new(Shutdown)),
        };
        let response = response.change_context(Shutdown).attach_printable("SQS receive_message failed")?;

        let Some(sqs_message) = response.messages.into_iter().next() else {
            return Ok(None);
        };
        let Some(receipt_handle) = sqs_message.receipt_handle else {
            return Ok(None);
        };
        let body = sqs_message.body.unwrap_or_default();

        match InfoMessage::parse(body.as_bytes()) {
            Ok(message) => {
                self.spawn_renewer(receipt_handle.clone()).await;
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Delivery::new(message, DeliveryToken::Cloud { receipt_handle })))
            }
            Err(error) => {
                tracing::warn!(%error, "dropping unparseable SQS message");
                let _ = self
                    .client
                    .delete_message()
                    .queue_url(&self.queue_url)
                    .receipt_handle(receipt_handle)
                    .send()
                    .await;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: Delivery) {
        if let DeliveryToken::Cloud { receipt_handle } = delivery.token() {
            self.stop_renewer(receipt_handle).await;
            if let Err(error) = self
                .client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(receipt_handle)
                .send()
                .await
            {
                tracing::warn!(%error, "failed to delete acked SQS message");
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn nack(&self, delivery: Delivery) {
        if let DeliveryToken::Cloud { receipt_handle } = delivery.token() {
            self.stop_renewer(receipt_handle).await;
            // Make the message immediately visible again for redelivery.
            let _ = self
                .client
                .change_message_visibility()
                .queue_url(&self.queue_url)
                .receipt_handle(receipt_handle)
                .visibility_timeout(0)
                .send()
                .await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn pending_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
