use std::time::Duration;

use herald_core::error::AppError;

/// Failure of the outbox table (claim, settle, insert, stats).
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox storage error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl OutboxError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<OutboxError> for AppError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::Internal(e) => AppError::Internal(e),
        }
    }
}

/// Failure of a broker send, or of the policies wrapped around it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Broker unreachable or not acknowledging; worth retrying.
    #[error("{broker} unavailable: {cause}")]
    Unavailable { broker: String, cause: String },
    /// Broker refused the message; retrying will not help.
    #[error("{broker} rejected message: {cause}")]
    Rejected { broker: String, cause: String },
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
    #[error("circuit breaker {name} is open")]
    CircuitOpen { name: String },
}

impl PublishError {
    pub fn unavailable(broker: impl Into<String>, cause: impl ToString) -> Self {
        Self::Unavailable {
            broker: broker.into(),
            cause: cause.to_string(),
        }
    }

    pub fn rejected(broker: impl Into<String>, cause: impl ToString) -> Self {
        Self::Rejected {
            broker: broker.into(),
            cause: cause.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "BROKER_UNAVAILABLE",
            Self::Rejected { .. } => "BROKER_REJECTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
        }
    }

    /// Transient failures are retried with backoff; the rest fail the event at once.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout(_))
    }
}

/// Abort reason of a dispatch cycle.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] OutboxError),
    /// Every claimed event was dispatched but `count` of them could not be
    /// settled and remain `IN_PROGRESS`.
    #[error("{count} outbox events could not be settled: {source}")]
    Unsettled { count: usize, source: OutboxError },
}
