//! AMQP consumer feeding notification requests to the [`Mailer`].
//!
//! Messages are JSON, either an envelope `{"pattern": "...", "data": {...}}`
//! or a bare mail request. Deliveries are consumed without acknowledgement;
//! a failed dispatch is logged and counted, never requeued.

use std::sync::Arc;

use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::error::ConsumerError;
use crate::mail::{MailRequest, Mailer};

const CONSUMER_TAG: &str = "notimailer";

#[derive(Deserialize)]
#[serde(untagged)]
enum Incoming {
    Envelope {
        pattern: String,
        data: serde_json::Value,
    },
    Bare(MailRequest),
}

/// Decode one delivery body.
///
/// Returns `Ok(None)` for envelopes carrying a different pattern.
///
/// # Errors
/// Returns [`ConsumerError::Decode`] when the body is neither a valid
/// envelope nor a mail request.
pub fn decode_delivery(data: &[u8], pattern: &str) -> Result<Option<MailRequest>, ConsumerError> {
    let incoming: Incoming =
        serde_json::from_slice(data).map_err(|e| ConsumerError::Decode(e.to_string()))?;
    match incoming {
        Incoming::Bare(request) => Ok(Some(request)),
        Incoming::Envelope { pattern: p, .. } if p != pattern => Ok(None),
        Incoming::Envelope { data, .. } => serde_json::from_value(data)
            .map(Some)
            .map_err(|e| ConsumerError::Decode(e.to_string())),
    }
}

/// Queue consumer dispatching each request on its own task.
pub struct MailConsumer {
    config: ServiceConfig,
    mailer: Arc<Mailer>,
}

impl MailConsumer {
    pub fn new(config: ServiceConfig, mailer: Arc<Mailer>) -> Self {
        Self { config, mailer }
    }

    /// Consume until cancelled or the broker closes the stream.
    ///
    /// In-flight dispatches are awaited before returning.
    ///
    /// # Errors
    /// Returns [`ConsumerError::Amqp`] when the broker connection, queue
    /// declaration or delivery stream fails.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        let connection =
            Connection::connect(&self.config.amqp_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let mut consumer = channel
            .basic_consume(
                &self.config.queue,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %self.config.queue,
            pattern = %self.config.pattern,
            concurrency = self.config.concurrency,
            "Consuming notification requests"
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut in_flight = JoinSet::new();

        let result = loop {
            tokio::select! {
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => {
                        metrics::counter!("notimailer_messages_received_total").increment(1);
                        match decode_delivery(&delivery.data, &self.config.pattern) {
                            Ok(Some(request)) => {
                                // No further deliveries are pulled while every slot is busy.
                                let Some(permit) = acquire_slot(&permits, &cancel).await else {
                                    info!("Consumer shutting down gracefully");
                                    break Ok(());
                                };
                                let mailer = self.mailer.clone();
                                in_flight.spawn(async move {
                                    let _permit = permit;
                                    handle_request(&mailer, request).await;
                                });
                            }
                            Ok(None) => {
                                debug!("Skipping message with unhandled pattern");
                            }
                            Err(e) => {
                                warn!(error = %e, "Rejecting undecodable message");
                                metrics::counter!("notimailer_messages_rejected_total").increment(1);
                            }
                        }
                    }
                    Some(Err(e)) => break Err(ConsumerError::from(e)),
                    None => {
                        warn!("Delivery stream closed by broker");
                        break Ok(());
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Dispatch task panicked");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Consumer shutting down gracefully");
                    break Ok(());
                }
            }
        };

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Waiting for in-flight dispatches");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Dispatch task panicked");
            }
        }

        result
    }
}

/// Wait for a free dispatch slot, or `None` once cancelled.
async fn acquire_slot(
    permits: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        permit = permits.clone().acquire_owned() => permit.ok(),
        _ = cancel.cancelled() => None,
    }
}

async fn handle_request(mailer: &Mailer, request: MailRequest) {
    info!(to = %request.to, subject = %request.subject, "Received notification request");
    if let Err(e) = mailer.dispatch(&request).await {
        error!(to = %request.to, error = %e, "Notification dispatch failed");
    }
}

impl std::fmt::Debug for MailConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConsumer")
            .field("queue", &self.config.queue)
            .field("pattern", &self.config.pattern)
            .field("concurrency", &self.config.concurrency)
            .finish()
    }
}
