//! Broker-send capability and its two implementations.
//!
//! The dispatcher only sees [`BrokerPublisher`]; which brokers are in play is
//! decided once, when the list of [`PublishTarget`]s is built from config.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::types::Headers;
use crate::error::PublishError;

pub mod jms;
pub mod kafka;

pub use jms::{JmsClient, JmsMessage, JmsPublisher};
pub use kafka::{DeliveryReport, KafkaProducer, KafkaPublisher, KafkaRecord};

/// Send a payload plus string headers to a named destination.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Short broker name for logs and errors.
    fn broker(&self) -> &'static str;

    async fn send_with_headers(
        &self,
        destination: &str,
        payload: &str,
        headers: &Headers,
    ) -> Result<(), PublishError>;
}

/// One enabled delivery target: a destination on a broker.
#[derive(Clone)]
pub struct PublishTarget {
    pub destination: String,
    pub publisher: Arc<dyn BrokerPublisher>,
}

impl PublishTarget {
    pub fn new(destination: impl Into<String>, publisher: Arc<dyn BrokerPublisher>) -> Self {
        Self {
            destination: destination.into(),
            publisher,
        }
    }

    pub async fn send(&self, payload: &str, headers: &Headers) -> Result<(), PublishError> {
        self.publisher
            .send_with_headers(&self.destination, payload, headers)
            .await
    }
}

impl fmt::Debug for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishTarget")
            .field("broker", &self.publisher.broker())
            .field("destination", &self.destination)
            .finish()
    }
}
