use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, warn};

use crate::broker::KafkaProducer;
use crate::dead_letter::{DeadLetterRecord, Failure, GuardOutcome};
use crate::domain::types::{FORCE_ERROR_HEADER, Headers};

/// A record pulled off a Kafka topic, key and value exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Headers,
}

impl ConsumedRecord {
    pub fn forces_error(&self) -> bool {
        forces_error(&self.headers)
    }
}

pub(crate) fn forces_error(headers: &Headers) -> bool {
    headers
        .get(FORCE_ERROR_HEADER)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// Runs consumer handlers and turns their failures into a record on
/// `<topic><dlq_suffix>` carrying the original key, value and position.
pub struct KafkaDeadLetterGuard {
    producer: Arc<dyn KafkaProducer>,
    dlq_suffix: String,
}

impl KafkaDeadLetterGuard {
    pub fn new(producer: Arc<dyn KafkaProducer>, dlq_suffix: impl Into<String>) -> Self {
        Self {
            producer,
            dlq_suffix: dlq_suffix.into(),
        }
    }

    pub fn dlq_topic(&self, topic: &str) -> String {
        format!("{topic}{}", self.dlq_suffix)
    }

    /// Run `handler` on `record`. An `Err` or a panic from the handler is
    /// dead-lettered and swallowed.
    pub async fn guard<F, Fut, E>(&self, record: &ConsumedRecord, handler: F) -> GuardOutcome
    where
        F: FnOnce(ConsumedRecord) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let failure = if record.forces_error() {
            Failure::forced()
        } else {
            let owned = record.clone();
            match AssertUnwindSafe(async move { handler(owned).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => return GuardOutcome::Handled,
                Ok(Err(err)) => Failure::from_error(&err),
                Err(panic) => Failure::from_panic(panic.as_ref()),
            }
        };
        self.dead_letter(record, failure).await
    }

    pub async fn dead_letter(&self, record: &ConsumedRecord, failure: Failure) -> GuardOutcome {
        let destination = self.dlq_topic(&record.topic);
        let dlq =
            DeadLetterRecord::from_bytes(record.topic.as_str(), record.payload.clone(), failure)
                .with_key(record.key.clone())
                .with_headers(record.headers.clone())
                .with_position(record.partition, record.offset);

        match self.producer.send(dlq.to_kafka_record(destination.as_str())).await {
            Ok(_) => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    dlq_topic = %destination,
                    error_class = %dlq.failure.class,
                    error = %dlq.failure.message,
                    "consumer handler failed, record dead-lettered"
                );
                GuardOutcome::DeadLettered { destination }
            }
            Err(err) => {
                error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    dlq_topic = %destination,
                    error = %dlq.failure.message,
                    dlq_error = %err,
                    "consumer handler failed and dead-letter send failed"
                );
                GuardOutcome::DeadLetterFailed { destination }
            }
        }
    }
}
