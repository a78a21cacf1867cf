//! rdkafka transport, compiled with the `kafka` feature.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rdkafka::Message as _;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Header, Headers as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use tokio::sync::watch;
use tracing::{error, info};

use crate::broker::{DeliveryReport, KafkaProducer, KafkaRecord};
use crate::dead_letter::{ConsumedRecord, GuardOutcome, KafkaDeadLetterGuard};
use crate::domain::types::Headers;
use crate::error::PublishError;

const BROKER: &str = "kafka";

// ── Producer ─────────────────────────────────────────────────────────────────

pub struct RdKafkaProducer {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl RdKafkaProducer {
    pub fn new(bootstrap_servers: &str, client_id: &str) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("client.id", client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "5000")
            .create()
            .context("create kafka producer")?;
        info!(bootstrap_servers, client_id, "kafka producer created");
        Ok(Self {
            producer,
            queue_timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl KafkaProducer for RdKafkaProducer {
    async fn send(&self, record: KafkaRecord) -> Result<DeliveryReport, PublishError> {
        let headers = record
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |acc, (key, value)| {
                acc.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_bytes()),
                })
            });
        let mut future_record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&record.topic).headers(headers);
        if let Some(payload) = &record.payload {
            future_record = future_record.payload(payload.as_slice());
        }
        if let Some(key) = &record.key {
            future_record = future_record.key(key.as_slice());
        }

        let (partition, offset) = self
            .producer
            .send(future_record, self.queue_timeout)
            .await
            .map_err(|(err, _)| classify(err))?;
        Ok(DeliveryReport { partition, offset })
    }
}

fn classify(err: KafkaError) -> PublishError {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessage
            | RDKafkaErrorCode::InvalidMessageSize
            | RDKafkaErrorCode::TopicAuthorizationFailed,
        ) => PublishError::rejected(BROKER, err),
        _ => PublishError::unavailable(BROKER, err),
    }
}

// ── Consumer ─────────────────────────────────────────────────────────────────

/// Consumes topics and runs every record through a [`KafkaDeadLetterGuard`].
/// The offset is committed after the guard returns, so a failed record is
/// never redelivered; its copy lives on the dead-letter topic.
pub struct KafkaConsumerLoop {
    consumer: StreamConsumer,
    guard: KafkaDeadLetterGuard,
}

impl KafkaConsumerLoop {
    pub fn new(
        bootstrap_servers: &str,
        group_id: &str,
        topics: &[&str],
        guard: KafkaDeadLetterGuard,
    ) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()
            .context("create kafka consumer")?;
        consumer
            .subscribe(topics)
            .with_context(|| format!("subscribe to {topics:?}"))?;
        info!(group_id, ?topics, "kafka consumer subscribed");
        Ok(Self { consumer, guard })
    }

    pub async fn run<F, Fut, E>(&self, handler: F, mut shutdown: watch::Receiver<bool>)
    where
        F: Fn(ConsumedRecord) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        loop {
            let message = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.consumer.recv() => received,
            };
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    error!(error = %err, "kafka receive failed");
                    continue;
                }
            };

            let record = consumed_record(&message);
            if let GuardOutcome::DeadLetterFailed { destination } =
                self.guard.guard(&record, &handler).await
            {
                error!(
                    topic = %record.topic,
                    offset = record.offset,
                    dlq_topic = %destination,
                    "record lost: handler and dead-letter send both failed"
                );
            }
            if let Err(err) = self.consumer.commit_message(&message, CommitMode::Async) {
                error!(
                    topic = %record.topic,
                    offset = record.offset,
                    error = %err,
                    "offset commit failed"
                );
            }
        }
        info!("kafka consumer loop stopped");
    }
}

/// Key and value are copied as raw bytes; header values are read as text.
fn consumed_record(message: &BorrowedMessage<'_>) -> ConsumedRecord {
    let mut headers = Headers::new();
    if let Some(borrowed) = message.headers() {
        for header in borrowed.iter() {
            if let Some(value) = header.value {
                headers.insert(
                    header.key.to_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                );
            }
        }
    }
    ConsumedRecord {
        topic: message.topic().to_owned(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}
