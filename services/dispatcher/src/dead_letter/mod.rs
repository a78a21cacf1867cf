//! Dead-letter routing for messages that could not be sent or processed.
//!
//! Producer side: [`crate::broker::KafkaPublisher`] re-publishes a failed send
//! to `<topic><suffix>`. Consumer side: the guards in [`kafka`] and [`jms`]
//! turn a failing handler into a dead-letter send so consumption continues.

use std::any::Any;
use std::fmt::Display;

use uuid::Uuid;

use crate::broker::{JmsMessage, KafkaRecord};
use crate::domain::types::{CORRELATION_ID_HEADER, Headers};

pub mod jms;
pub mod kafka;

pub use jms::JmsDeadLetterGuard;
pub use kafka::{ConsumedRecord, KafkaDeadLetterGuard};

/// Kafka dead-letter headers.
pub const DLT_ORIGINAL_TOPIC: &str = "dlt-original-topic";
pub const DLT_ORIGINAL_PARTITION: &str = "dlt-original-partition";
pub const DLT_ORIGINAL_OFFSET: &str = "dlt-original-offset";
pub const DLT_EXCEPTION_CLASS: &str = "dlt-exception-class";
pub const DLT_EXCEPTION_MESSAGE: &str = "dlt-exception-message";

/// JMS dead-letter properties.
pub const ORIGINAL_DESTINATION_PROPERTY: &str = "originalDestination";
pub const ERROR_PROPERTY: &str = "error";
pub const ERROR_CLASS_PROPERTY: &str = "errorClass";

/// Error class used when the force-error header short-circuits a handler.
pub const FORCED_ERROR_CLASS: &str = "ForcedError";
/// Error class used when a handler panics.
pub const PANIC_CLASS: &str = "panic";

/// What went wrong, reduced to the two strings a dead-letter message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub class: String,
    pub message: String,
}

impl Failure {
    /// Class is the Rust type name of the error.
    pub fn from_error<E: Display + ?Sized>(err: &E) -> Self {
        Self {
            class: std::any::type_name::<E>().to_owned(),
            message: err.to_string(),
        }
    }

    pub fn forced() -> Self {
        Self {
            class: FORCED_ERROR_CLASS.to_owned(),
            message: "failure forced by message header".to_owned(),
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_owned());
        Self {
            class: PANIC_CLASS.to_owned(),
            message,
        }
    }
}

/// Result of running a message through a dead-letter guard. The guard never
/// propagates the handler's failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Handled,
    DeadLettered { destination: String },
    /// The handler failed and the dead-letter send failed too; the message is
    /// only in the logs now.
    DeadLetterFailed { destination: String },
}

/// A message that failed, addressed to a dead-letter destination. Built on
/// the fly and never persisted or read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub original_destination: String,
    pub key: Option<Vec<u8>>,
    /// Raw value; `None` for a tombstone.
    pub payload: Option<Vec<u8>>,
    /// Headers (Kafka) or properties (JMS) of the original message.
    pub headers: Headers,
    pub failure: Failure,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub correlation_id: Option<String>,
}

impl DeadLetterRecord {
    pub fn new(
        original_destination: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        failure: Failure,
    ) -> Self {
        Self::from_bytes(original_destination, Some(payload.into()), failure)
    }

    /// Keeps `payload` byte for byte, including an absent one.
    pub fn from_bytes(
        original_destination: impl Into<String>,
        payload: Option<Vec<u8>>,
        failure: Failure,
    ) -> Self {
        Self {
            original_destination: original_destination.into(),
            key: None,
            payload,
            headers: Headers::new(),
            failure,
            partition: None,
            offset: None,
            correlation_id: None,
        }
    }

    pub fn with_key(mut self, key: Option<Vec<u8>>) -> Self {
        self.key = key;
        self
    }

    /// Keep the original headers; the correlation id is taken from them
    /// unless one was already set.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        if self.correlation_id.is_none() {
            self.correlation_id = headers.get(CORRELATION_ID_HEADER).cloned();
        }
        self.headers = headers;
        self
    }

    pub fn with_position(mut self, partition: i32, offset: i64) -> Self {
        self.partition = Some(partition);
        self.offset = Some(offset);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        if correlation_id.is_some() {
            self.correlation_id = correlation_id;
        }
        self
    }

    /// Original headers plus the `dlt-*` diagnostics.
    pub fn kafka_headers(&self) -> Headers {
        let mut headers = self.headers.clone();
        headers.insert(
            DLT_ORIGINAL_TOPIC.to_owned(),
            self.original_destination.clone(),
        );
        headers.insert(DLT_EXCEPTION_CLASS.to_owned(), self.failure.class.clone());
        headers.insert(
            DLT_EXCEPTION_MESSAGE.to_owned(),
            self.failure.message.clone(),
        );
        if let Some(partition) = self.partition {
            headers.insert(DLT_ORIGINAL_PARTITION.to_owned(), partition.to_string());
        }
        if let Some(offset) = self.offset {
            headers.insert(DLT_ORIGINAL_OFFSET.to_owned(), offset.to_string());
        }
        if let Some(correlation_id) = &self.correlation_id {
            headers
                .entry(CORRELATION_ID_HEADER.to_owned())
                .or_insert_with(|| correlation_id.clone());
        }
        headers
    }

    /// Same key and payload, addressed to `topic`.
    pub fn to_kafka_record(&self, topic: impl Into<String>) -> KafkaRecord {
        KafkaRecord {
            topic: topic.into(),
            key: self.key.clone(),
            payload: self.payload.clone(),
            headers: self.kafka_headers(),
        }
    }

    /// Same body and correlation id, addressed to `destination`, with the
    /// original properties plus `originalDestination`, `error`, `errorClass`.
    pub fn to_jms_message(&self, destination: impl Into<String>) -> JmsMessage {
        let mut properties = self.headers.clone();
        properties.remove(CORRELATION_ID_HEADER);
        properties.insert(
            ORIGINAL_DESTINATION_PROPERTY.to_owned(),
            self.original_destination.clone(),
        );
        properties.insert(ERROR_PROPERTY.to_owned(), self.failure.message.clone());
        properties.insert(ERROR_CLASS_PROPERTY.to_owned(), self.failure.class.clone());
        JmsMessage {
            destination: destination.into(),
            correlation_id: Some(
                self.correlation_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
            body: String::from_utf8_lossy(self.payload.as_deref().unwrap_or_default())
                .into_owned(),
            properties,
        }
    }
}
