use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// String map carried next to every payload. Key order is irrelevant.
pub type Headers = HashMap<String, String>;

/// Header holding the correlation id shared by every hop of an event.
pub const CORRELATION_ID_HEADER: &str = "correlationId";

/// W3C trace-context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Event metadata added to outbound headers at dispatch time.
pub const EVENT_ID_HEADER: &str = "eventId";
pub const EVENT_TYPE_HEADER: &str = "eventType";
pub const AGGREGATE_TYPE_HEADER: &str = "aggregateType";
pub const AGGREGATE_ID_HEADER: &str = "aggregateId";

/// Test hook: a consumed message carrying this header with value `true` is
/// failed by the dead-letter guard without reaching the handler.
pub const FORCE_ERROR_HEADER: &str = "x-force-error";

/// Lifecycle of an outbox row. Transitions only move forward:
/// `New → InProgress → {Published | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    New,
    InProgress,
    Published,
    Failed,
}

impl OutboxStatus {
    pub const ALL: [OutboxStatus; 4] = [
        OutboxStatus::New,
        OutboxStatus::InProgress,
        OutboxStatus::Published,
        OutboxStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::InProgress => "IN_PROGRESS",
            Self::Published => "PUBLISHED",
            Self::Failed => "FAILED",
        }
    }

    /// `Published` and `Failed` rows are never touched again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Failed)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown outbox status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OutboxStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "PUBLISHED" => Ok(Self::Published),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

/// Event to be written to the outbox together with a business change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: String,
    pub headers: Headers,
}

impl NewOutboxEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload: payload.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A persisted outbox row, as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    pub id: i64,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: String,
    pub headers: Headers,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Row count per status, served by `GET /outbox/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub new: u64,
    pub in_progress: u64,
    pub published: u64,
    pub failed: u64,
}

impl OutboxStats {
    pub fn record(&mut self, status: OutboxStatus, count: u64) {
        match status {
            OutboxStatus::New => self.new += count,
            OutboxStatus::InProgress => self.in_progress += count,
            OutboxStatus::Published => self.published += count,
            OutboxStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.new + self.in_progress + self.published + self.failed
    }
}
