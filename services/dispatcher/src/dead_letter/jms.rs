use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, warn};

use crate::broker::{JmsClient, JmsMessage};
use crate::dead_letter::kafka::forces_error;
use crate::dead_letter::{DeadLetterRecord, Failure, GuardOutcome};

/// Default dead-letter queue of ActiveMQ.
pub const DEFAULT_DLQ_DESTINATION: &str = "ActiveMQ.DLQ";

/// Runs JMS listener handlers and sends failing messages to one fixed
/// dead-letter destination, keeping the correlation id.
pub struct JmsDeadLetterGuard {
    client: Arc<dyn JmsClient>,
    dlq_destination: String,
}

impl JmsDeadLetterGuard {
    pub fn new(client: Arc<dyn JmsClient>, dlq_destination: impl Into<String>) -> Self {
        Self {
            client,
            dlq_destination: dlq_destination.into(),
        }
    }

    pub fn dlq_destination(&self) -> &str {
        &self.dlq_destination
    }

    pub async fn guard<F, Fut, E>(&self, message: &JmsMessage, handler: F) -> GuardOutcome
    where
        F: FnOnce(JmsMessage) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let failure = if forces_error(&message.properties) {
            Failure::forced()
        } else {
            let owned = message.clone();
            match AssertUnwindSafe(async move { handler(owned).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => return GuardOutcome::Handled,
                Ok(Err(err)) => Failure::from_error(&err),
                Err(panic) => Failure::from_panic(panic.as_ref()),
            }
        };
        self.dead_letter(message, failure).await
    }

    pub async fn dead_letter(&self, message: &JmsMessage, failure: Failure) -> GuardOutcome {
        let destination = self.dlq_destination.clone();
        let record = DeadLetterRecord::new(
            message.destination.as_str(),
            message.body.as_str(),
            failure,
        )
        .with_correlation_id(message.correlation_id.clone())
        .with_headers(message.properties.clone());
        let dlq = record.to_jms_message(destination.as_str());
        let correlation_id = dlq.correlation_id.clone().unwrap_or_default();

        match self.client.send(dlq).await {
            Ok(()) => {
                warn!(
                    destination = %message.destination,
                    dlq_destination = %destination,
                    correlation_id = %correlation_id,
                    error = %record.failure.message,
                    "listener failed, message dead-lettered"
                );
                GuardOutcome::DeadLettered { destination }
            }
            Err(err) => {
                error!(
                    destination = %message.destination,
                    dlq_destination = %destination,
                    correlation_id = %correlation_id,
                    error = %record.failure.message,
                    dlq_error = %err,
                    "listener failed and dead-letter send failed"
                );
                GuardOutcome::DeadLetterFailed { destination }
            }
        }
    }
}
