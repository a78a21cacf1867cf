use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::broker::BrokerPublisher;
use crate::dead_letter::{DeadLetterRecord, Failure};
use crate::domain::types::{AGGREGATE_ID_HEADER, Headers};
use crate::error::PublishError;

/// Default suffix of the dead-letter topic: `orders` → `orders-dlq`.
pub const DEFAULT_DLQ_SUFFIX: &str = "-dlq";

/// A record as handed to the Kafka client. Key and payload are raw bytes so a
/// consumed record can be forwarded unchanged; a `None` payload is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Headers,
}

/// Where the broker stored an acknowledged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub partition: i32,
    pub offset: i64,
}

/// Low-level Kafka client capability.
#[async_trait]
pub trait KafkaProducer: Send + Sync {
    async fn send(&self, record: KafkaRecord) -> Result<DeliveryReport, PublishError>;
}

/// Publishes to Kafka and re-routes failed sends to `<topic><dlq_suffix>`.
///
/// The record key is the event's `aggregateId` header, so events of one
/// aggregate land on one partition.
pub struct KafkaPublisher {
    producer: Arc<dyn KafkaProducer>,
    dlq_suffix: String,
}

impl KafkaPublisher {
    pub fn new(producer: Arc<dyn KafkaProducer>, dlq_suffix: impl Into<String>) -> Self {
        Self {
            producer,
            dlq_suffix: dlq_suffix.into(),
        }
    }

    pub fn dlq_topic(&self, topic: &str) -> String {
        format!("{topic}{}", self.dlq_suffix)
    }

    async fn route_to_dead_letter(
        &self,
        topic: &str,
        key: Option<Vec<u8>>,
        payload: &str,
        headers: &Headers,
        err: &PublishError,
    ) {
        let dlq_topic = self.dlq_topic(topic);
        let record = DeadLetterRecord::new(topic, payload, Failure::from_error(err))
            .with_key(key)
            .with_headers(headers.clone())
            .to_kafka_record(dlq_topic.as_str());
        match self.producer.send(record).await {
            Ok(report) => warn!(
                topic,
                dlq_topic = %dlq_topic,
                partition = report.partition,
                offset = report.offset,
                error = %err,
                "kafka send failed, routed to dead-letter topic"
            ),
            Err(dlq_err) => error!(
                topic,
                dlq_topic = %dlq_topic,
                error = %err,
                dlq_error = %dlq_err,
                "kafka send failed and dead-letter send failed too"
            ),
        }
    }
}

#[async_trait]
impl BrokerPublisher for KafkaPublisher {
    fn broker(&self) -> &'static str {
        "kafka"
    }

    async fn send_with_headers(
        &self,
        destination: &str,
        payload: &str,
        headers: &Headers,
    ) -> Result<(), PublishError> {
        let key = headers
            .get(AGGREGATE_ID_HEADER)
            .map(|id| id.as_bytes().to_vec());
        let record = KafkaRecord {
            topic: destination.to_owned(),
            key: key.clone(),
            payload: Some(payload.as_bytes().to_vec()),
            headers: headers.clone(),
        };
        match self.producer.send(record).await {
            Ok(report) => {
                debug!(
                    topic = destination,
                    partition = report.partition,
                    offset = report.offset,
                    "kafka record delivered"
                );
                Ok(())
            }
            Err(err) => {
                self.route_to_dead_letter(destination, key, payload, headers, &err)
                    .await;
                // The caller still sees the failure; retry and settle act on it.
                Err(err)
            }
        }
    }
}
