use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::broker::BrokerPublisher;
use crate::domain::types::{CORRELATION_ID_HEADER, Headers};
use crate::error::PublishError;

/// A text message addressed to a JMS queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JmsMessage {
    pub destination: String,
    pub correlation_id: Option<String>,
    pub body: String,
    /// String properties set on the message.
    pub properties: Headers,
}

impl JmsMessage {
    /// Builds a message from outbox headers: `correlationId` becomes the JMS
    /// correlation id (a fresh UUID when absent), every other header becomes a
    /// string property.
    pub fn from_headers(destination: &str, body: &str, headers: &Headers) -> Self {
        let mut properties = headers.clone();
        let correlation_id = properties
            .remove(CORRELATION_ID_HEADER)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            destination: destination.to_owned(),
            correlation_id: Some(correlation_id),
            body: body.to_owned(),
            properties,
        }
    }
}

/// Low-level JMS client capability.
#[async_trait]
pub trait JmsClient: Send + Sync {
    async fn send(&self, message: JmsMessage) -> Result<(), PublishError>;
}

/// Publishes text messages through a [`JmsClient`]. No dead-letter routing on
/// the producer side; the broker's own redelivery policy applies.
pub struct JmsPublisher {
    client: Arc<dyn JmsClient>,
}

impl JmsPublisher {
    pub fn new(client: Arc<dyn JmsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrokerPublisher for JmsPublisher {
    fn broker(&self) -> &'static str {
        "activemq"
    }

    async fn send_with_headers(
        &self,
        destination: &str,
        payload: &str,
        headers: &Headers,
    ) -> Result<(), PublishError> {
        let message = JmsMessage::from_headers(destination, payload, headers);
        let correlation_id = message.correlation_id.clone();
        self.client.send(message).await?;
        debug!(
            destination,
            correlation_id = correlation_id.as_deref().unwrap_or_default(),
            "jms message sent"
        );
        Ok(())
    }
}
